use crate::errors::MalformedName;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Something named on the command line which we want to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every repository belonging to a user or organisation.
    Owner(String),
    /// A single `owner/repo`.
    Repository { owner: String, repo: String },
}

impl Target {
    pub fn owner(&self) -> &str {
        match *self {
            Target::Owner(ref owner) => owner,
            Target::Repository { ref owner, .. } => owner,
        }
    }
}

impl FromStr for Target {
    type Err = MalformedName;

    fn from_str(s: &str) -> Result<Target, MalformedName> {
        let segments: Vec<&str> = s.split('/').collect();

        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(MalformedName(s.to_string()));
        }

        match segments.as_slice() {
            [owner] => Ok(Target::Owner(owner.to_string())),
            [owner, repo] => Ok(Target::Repository {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(MalformedName(s.to_string())),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Target::Owner(ref owner) => write!(f, "{}", owner),
            Target::Repository {
                ref owner,
                ref repo,
            } => write!(f, "{}/{}", owner, repo),
        }
    }
}
