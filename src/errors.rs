//! The errors encountered in this crate.
//!
//! Most functions return a plain `failure::Error`. The types in here are the
//! ones a caller may want to `downcast_ref()` to tell failures apart.

use failure::Fail;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// A name given on the command line was neither `owner` nor `owner/repo`.
#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "\"{}\" is not a valid owner or owner/repository name", _0)]
pub struct MalformedName(pub String);

/// `git clone` didn't finish before its deadline.
#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "{}: clone timed out after {:?}", name, after)]
pub struct CloneTimeout {
    pub name: String,
    pub after: Duration,
}

/// `git clone` exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Fail)]
pub struct CloneFailed {
    pub name: String,
    pub status: Option<i32>,
    pub stderr: String,
}

impl Display for CloneFailed {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: git clone failed", self.name)?;

        if let Some(code) = self.status {
            write!(f, " with return code {}", code)?;
        }

        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, " ({})", stderr)?;
        }

        Ok(())
    }
}

/// Every repository either failed or was skipped, so there's nothing to
/// archive.
#[derive(Debug, Copy, Clone, PartialEq, Fail)]
#[fail(display = "no repositories downloaded")]
pub struct NoRepositories;

/// The run was cancelled before it could finish.
#[derive(Debug, Copy, Clone, PartialEq, Fail)]
#[fail(display = "interrupted")]
pub struct Interrupted;
