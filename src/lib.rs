//! Discover every repository owned by a set of GitHub accounts, clone them
//! all, and bundle the result into a single compressed tarball.
//!
//! The work is split into three concurrent stages which talk to each other
//! over a bounded channel:
//!
//! 1. a dispatcher which turns each name given on the command line into a
//!    discovery task (or, for `owner/repo` names, straight into a [`Repo`]),
//! 2. a download coordinator which clones each [`Repo`] as it arrives, and
//! 3. the [`archive`] step, which only starts once the [`Tracker`] says every
//!    unit of discovery and download work has finished.

#[macro_use]
extern crate log;

pub mod archive;
pub mod config;
pub mod driver;
pub mod errors;
pub mod git;
pub mod providers;
pub mod report;
mod target;
pub mod tracker;
pub mod utils;

pub use crate::config::Config;
pub use crate::driver::{Driver, Summary};
pub use crate::git::{Cloner, GitCli};
pub use crate::providers::{GitHub, Provider};
pub use crate::report::{Message, Reporter, Verbosity};
pub use crate::target::Target;
pub use crate::tracker::{Totals, Tracker, WorkUnit};

use serde_derive::{Deserialize, Serialize};

/// A repository which has been discovered and is waiting to be cloned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    /// The `owner/name` pair, as used by the exclusion list.
    pub full_name: String,
    pub owner: String,
    /// The anonymous (https) clone URL.
    pub clone_url: String,
    /// The URL used when cloning private repositories with credentials.
    pub ssh_url: String,
    pub private: bool,
}

impl Repo {
    /// The repository's name, without the owner.
    pub fn name(&self) -> &str {
        match self.full_name.rfind('/') {
            Some(ix) => &self.full_name[ix + 1..],
            None => &self.full_name,
        }
    }

    /// Pick the URL to clone from.
    pub fn url(&self, authenticated: bool) -> &str {
        if self.private && authenticated {
            &self.ssh_url
        } else {
            &self.clone_url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(private: bool) -> Repo {
        Repo {
            full_name: String::from("alice/dotfiles"),
            owner: String::from("alice"),
            clone_url: String::from("https://github.com/alice/dotfiles.git"),
            ssh_url: String::from("git@github.com:alice/dotfiles.git"),
            private,
        }
    }

    #[test]
    fn name_strips_the_owner() {
        assert_eq!(repo(false).name(), "dotfiles");
    }

    #[test]
    fn only_private_repos_use_ssh_when_authenticated() {
        assert_eq!(repo(false).url(true), "https://github.com/alice/dotfiles.git");
        assert_eq!(repo(true).url(false), "https://github.com/alice/dotfiles.git");
        assert_eq!(repo(true).url(true), "git@github.com:alice/dotfiles.git");
    }
}
