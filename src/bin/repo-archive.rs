#[macro_use]
extern crate log;

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use env_logger::Builder;
use failure::{Error, ResultExt};
use futures::stream::{self, Stream, StreamExt};
use log::LevelFilter;
use repo_archive::report::{self, Verbosity};
use repo_archive::utils::parse_duration;
use repo_archive::{Config, Driver, GitCli, GitHub, Summary};
use sec::Secret;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG: &str = "~/.repo-archive.toml";

#[tokio::main]
async fn main() {
    let args = Args::from_args();

    if args.example_config {
        println!("{}", Config::example().as_toml());
        return;
    }

    match run(args).await {
        Ok(summary) => {
            println!("archive created: {}", summary.archive.display());
        },
        Err(e) => {
            eprintln!("Error: {}", e);

            for cause in e.iter_causes() {
                eprintln!("\tCaused By: {}", cause);
            }

            process::exit(1);
        },
    }
}

async fn run(args: Args) -> Result<Summary, Error> {
    initialize_logging(&args)?;
    let cfg = args.config()?;

    if log_enabled!(log::Level::Debug) {
        for line in format!("{:#?}", cfg).lines() {
            debug!("{}", line);
        }
    }

    let token = if cfg.github.authenticated {
        Some(api_token()?)
    } else {
        None
    };

    let provider = GitHub::new(cfg.github.clone(), token)?;
    let cloner = GitCli::new(cfg.general.submodules);
    let (reporter, rx) = report::channel();
    let sink = tokio::spawn(report::sink(rx, args.verbosity()));

    let driver = Driver::new(cfg, Arc::new(provider), Arc::new(cloner), reporter);

    let token = driver.cancellation_token();
    tokio::spawn(async move {
        let signals = stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok().map(|_| ((), ()))
        });

        if handle_interrupts(Box::pin(signals), token).await {
            eprintln!("Interrupted again, exiting without cleaning up");
            process::exit(130);
        }
    });

    let outcome = driver.run(&args.names).await;

    // hang up on the sink so it flushes everything and exits
    drop(driver);
    let stats = sink.await.context("The logging task panicked")?;

    if stats.errors > 0 {
        warn!("{} errors were encountered along the way", stats.errors);
    }
    if let Ok(ref summary) = outcome {
        info!(
            "Archived {} of {} repositories ({} entries)",
            summary.totals.succeeded, summary.totals.discovered, summary.entries
        );
    }

    outcome
}

/// Cancel the run on the first interrupt. Returns `true` if a second one
/// arrives while we're still cleaning up.
async fn handle_interrupts<S>(mut signals: S, token: CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if signals.next().await.is_none() {
        return false;
    }

    warn!("Interrupted, cleaning up (press Ctrl-C again to exit immediately)...");
    token.cancel();

    signals.next().await.is_some()
}

/// Get the API token from `$GITHUB_TOKEN`, falling back to asking for it.
fn api_token() -> Result<Secret<String>, Error> {
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        if !token.trim().is_empty() {
            debug!("Using the API token from $GITHUB_TOKEN");
            return Ok(Secret::new(token.trim().to_string()));
        }
    }

    let token = dialoguer::Password::new()
        .with_prompt("GitHub API token")
        .interact()
        .context("Unable to read the API token")?;

    Ok(Secret::new(token))
}

#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(
    name = "repo-archive",
    about = "Clone every repository belonging to some GitHub accounts into one tarball."
)]
struct Args {
    #[structopt(
        short = "c",
        long = "config",
        default_value = "~/.repo-archive.toml",
        help = "The configuration file to use."
    )]
    config_file: String,
    #[structopt(
        long = "example-config",
        help = "Generate an example config and immediately exit."
    )]
    example_config: bool,
    #[structopt(
        short = "l",
        long = "level",
        allow_hyphen_values = true,
        help = "The gzip compression level (-1 for the default, 0-9)"
    )]
    level: Option<i32>,
    #[structopt(short = "q", long = "quiet", help = "Only print warnings and errors")]
    quiet: bool,
    #[structopt(
        short = "v",
        long = "verbose",
        parse(from_occurrences),
        conflicts_with = "quiet",
        help = "Verbose output (repeat for more verbosity)"
    )]
    verbosity: u64,
    #[structopt(short = "s", long = "submodules", help = "Recursively clone submodules")]
    submodules: bool,
    #[structopt(
        short = "t",
        long = "timeout",
        parse(try_from_str = parse_duration),
        help = "The git clone timeout (e.g. \"10m\"), \"0\" for none"
    )]
    timeout: Option<Duration>,
    #[structopt(
        short = "a",
        long = "auth",
        help = "Use an API token to find (and clone) private repositories"
    )]
    authenticated: bool,
    #[structopt(
        short = "x",
        long = "exclude",
        use_delimiter = true,
        help = "Comma-separated owner/repo names to skip"
    )]
    exclude: Vec<String>,
    #[structopt(
        short = "o",
        long = "output",
        parse(from_os_str),
        help = "Where to write the archive"
    )]
    output: Option<PathBuf>,
    #[structopt(
        name = "NAME",
        required_unless = "example-config",
        help = "Users, organisations or owner/repo names to archive"
    )]
    names: Vec<String>,
}

impl Args {
    fn config(&self) -> Result<Config, Error> {
        let config_file =
            shellexpand::full(&self.config_file).context("Unable to expand wildcards")?;
        let config_file = Path::new(&*config_file);

        let mut cfg = if config_file.exists() {
            Config::from_file(config_file).context("Couldn't load the config")?
        } else if self.config_file == DEFAULT_CONFIG {
            debug!("No config file found, using the defaults");
            Config::default()
        } else {
            return Err(failure::err_msg(format!(
                "The config file {} doesn't exist",
                config_file.display()
            )));
        };

        self.apply_overrides(&mut cfg);
        Ok(cfg)
    }

    /// Command-line flags take precedence over the config file.
    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.level {
            cfg.general.compression_level = level;
        }
        if let Some(timeout) = self.timeout {
            cfg.general.clone_timeout = timeout;
        }
        if let Some(ref output) = self.output {
            cfg.general.output_dir = output.clone();
        }
        if self.submodules {
            cfg.general.submodules = true;
        }
        if self.authenticated {
            cfg.github.authenticated = true;
        }
        cfg.general.exclude.extend(
            self.exclude
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        );
    }

    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbosity > 0 {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

fn initialize_logging(args: &Args) -> Result<(), Error> {
    let mut builder = Builder::new();

    let level = match (args.quiet, args.verbosity) {
        (true, _) => LevelFilter::Warn,
        (false, 0) | (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };

    builder.filter(Some("repo_archive"), level);

    if let Ok(filter) = env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }

    builder.format(|out, record| match record.line() {
        Some(line) => writeln!(
            out,
            "{} [{:5}] ({}#{}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            line,
            record.args()
        ),
        None => writeln!(
            out,
            "{} [{:5}] ({}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        ),
    });

    builder.try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_iter_safe(args).unwrap()
    }

    #[test]
    fn flags_override_the_config() {
        let args = parse(&[
            "repo-archive",
            "-l",
            "-1",
            "-t",
            "0",
            "-s",
            "-a",
            "-x",
            "alice/big,bob/huge",
            "-o",
            "/backups",
            "alice",
            "bob/repo1",
        ]);
        let mut cfg = Config::default();

        args.apply_overrides(&mut cfg);

        assert_eq!(cfg.general.compression_level, -1);
        assert_eq!(cfg.general.timeout(), None);
        assert!(cfg.general.submodules);
        assert!(cfg.github.authenticated);
        assert_eq!(cfg.general.exclude, vec!["alice/big", "bob/huge"]);
        assert_eq!(cfg.general.output_dir, PathBuf::from("/backups"));
        assert_eq!(args.names, vec!["alice", "bob/repo1"]);
    }

    #[test]
    fn quiet_and_verbose_are_mutually_exclusive() {
        assert!(Args::from_iter_safe(&["repo-archive", "-q", "-v", "alice"]).is_err());
        assert_eq!(parse(&["repo-archive", "-q", "alice"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["repo-archive", "-vv", "alice"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["repo-archive", "alice"]).verbosity(), Verbosity::Normal);
    }

    #[test]
    fn at_least_one_name_is_required() {
        assert!(Args::from_iter_safe(&["repo-archive"]).is_err());
        assert!(parse(&["repo-archive", "--example-config"]).names.is_empty());
    }

    #[tokio::test]
    async fn the_first_interrupt_cancels_the_run() {
        let token = CancellationToken::new();

        let forced = handle_interrupts(stream::iter(vec![()]), token.clone()).await;

        assert!(!forced);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn a_second_interrupt_forces_an_exit() {
        let token = CancellationToken::new();

        let forced = handle_interrupts(stream::iter(vec![(), ()]), token.clone()).await;

        assert!(forced);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn no_interrupts_leaves_the_run_alone() {
        let token = CancellationToken::new();

        let forced = handle_interrupts(stream::empty(), token.clone()).await;

        assert!(!forced);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn bad_timeouts_are_rejected() {
        assert!(Args::from_iter_safe(&["repo-archive", "-t", "soon", "alice"]).is_err());
    }
}
