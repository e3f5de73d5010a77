use async_trait::async_trait;
use failure::{Error, ResultExt};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::CloneFailed;

/// Something which can copy a remote repository onto disk.
///
/// Dropping the returned future must stop the clone, that's how timeouts
/// and cancellation are implemented.
#[async_trait]
pub trait Cloner: Send + Sync {
    /// Clone `url` into `dest_dir`, which won't exist yet.
    async fn clone_repo(&self, url: &str, dest_dir: &Path) -> Result<(), Error>;
}

/// Clone by shelling out to the `git` executable.
#[derive(Debug, Clone, PartialEq)]
pub struct GitCli {
    program: String,
    submodules: bool,
}

impl GitCli {
    pub fn new(submodules: bool) -> GitCli {
        GitCli {
            program: String::from("git"),
            submodules,
        }
    }

    fn command(&self, url: &str, dest_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("clone").arg("--quiet").arg("--no-hardlinks");

        if self.submodules {
            cmd.arg("--recurse-submodules").arg("--jobs").arg("16");
        }

        cmd.arg(url)
            .arg(dest_dir)
            .stdin(Stdio::null())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        cmd
    }
}

impl Default for GitCli {
    fn default() -> GitCli {
        GitCli::new(false)
    }
}

#[async_trait]
impl Cloner for GitCli {
    async fn clone_repo(&self, url: &str, dest_dir: &Path) -> Result<(), Error> {
        debug!("Cloning {} into {}", url, dest_dir.display());

        let output = self
            .command(url, dest_dir)
            .output()
            .await
            .context("Unable to invoke git")?;
        trace!("Exit Status: {}", output.status);

        if output.status.success() {
            Ok(())
        } else {
            let name = dest_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| url.to_string());

            Err(CloneFailed {
                name,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into())
        }
    }
}
