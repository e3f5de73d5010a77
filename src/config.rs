use failure::{Error, ResultExt};
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::duration_shim;

/// Everything needed to run an archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub github: GitHubConfig,
}

impl Config {
    /// Load the config from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());

        let contents = fs::read_to_string(path)
            .with_context(|_| format!("Unable to read {}", path.display()))?;

        Config::from_toml(&contents)
    }

    pub fn from_toml(src: &str) -> Result<Config, Error> {
        let cfg = toml::from_str(src).context("Invalid config file")?;
        Ok(cfg)
    }

    /// An example config showing every setting.
    pub fn example() -> Config {
        let mut cfg = Config::default();
        cfg.general.exclude = vec![String::from("rust-lang/rust")];
        cfg
    }

    pub fn as_toml(&self) -> String {
        match toml::to_string_pretty(self) {
            Ok(s) => s,
            Err(e) => unreachable!("Config is always serializable: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct General {
    /// Where the finished tarball gets written.
    pub output_dir: PathBuf,
    /// Where the temporary working directory is created. Defaults to the
    /// system temp directory.
    pub work_dir: Option<PathBuf>,
    /// The gzip level, `-1` for the library default, `0` for none, up to `9`.
    pub compression_level: i32,
    /// How long a single `git clone` may take. `0` means forever.
    #[serde(with = "duration_shim")]
    pub clone_timeout: Duration,
    /// Pass `--recurse-submodules` to `git clone`.
    pub submodules: bool,
    /// Full names (`owner/repo`) which should never be cloned.
    pub exclude: Vec<String>,
    /// The pause between launching successive listing requests or clones.
    #[serde(with = "duration_shim")]
    pub launch_delay: Duration,
    /// How many discovered repositories may be waiting for a download slot
    /// before discovery pauses.
    pub queue_capacity: usize,
    pub max_concurrent_clones: usize,
    pub max_concurrent_queries: usize,
}

impl General {
    pub const DEFAULT_COMPRESSION_LEVEL: i32 = -1;

    /// The clone deadline, if there is one.
    pub fn timeout(&self) -> Option<Duration> {
        if self.clone_timeout == Duration::from_secs(0) {
            None
        } else {
            Some(self.clone_timeout)
        }
    }
}

impl Default for General {
    fn default() -> General {
        General {
            output_dir: PathBuf::from("."),
            work_dir: None,
            compression_level: General::DEFAULT_COMPRESSION_LEVEL,
            clone_timeout: Duration::from_secs(10 * 60),
            submodules: false,
            exclude: Vec::new(),
            launch_delay: Duration::from_millis(250),
            queue_capacity: 64,
            max_concurrent_clones: 8,
            max_concurrent_queries: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GitHubConfig {
    pub api_root: String,
    /// Used to build the anonymous clone URL for `owner/repo` names.
    pub clone_root: String,
    /// Used to build the SSH clone URL for `owner/repo` names.
    pub ssh_host: String,
    pub agent: String,
    pub page_size: u32,
    /// List (and clone) private repositories using an API token.
    pub authenticated: bool,
}

impl GitHubConfig {
    pub const DEFAULT_AGENT: &'static str = "repo-archive";
}

impl Default for GitHubConfig {
    fn default() -> GitHubConfig {
        GitHubConfig {
            api_root: String::from("https://api.github.com"),
            clone_root: String::from("https://github.com"),
            ssh_host: String::from("github.com"),
            agent: GitHubConfig::DEFAULT_AGENT.into(),
            page_size: 100,
            authenticated: false,
        }
    }
}
