use crate::Repo;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use failure::Fail;
use reqwest::StatusCode;

mod github;
mod pagination;

pub use self::github::GitHub;
pub use self::pagination::{last_page, paginated, Page};

/// Something which can list the repositories belonging to an owner.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a single page (starting from `1`) of an owner's repositories.
    async fn page(
        &self,
        owner: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page, FetchError>;

    /// Look up a repository which was named explicitly.
    async fn repository(&self, owner: &str, name: &str) -> Result<Repo, FetchError>;
}

/// Why listing an owner's repositories failed.
#[derive(Debug, Fail)]
pub enum FetchError {
    #[fail(display = "API rate limit exhausted, it resets {}", reset)]
    RateLimited {
        /// A human-readable version of `reset_at`.
        reset: String,
        reset_at: Option<DateTime<Local>>,
    },
    #[fail(display = "Request to {} failed with {}", url, status)]
    BadResponse { url: String, status: StatusCode },
    #[fail(display = "Unable to send the request")]
    Http(#[cause] reqwest::Error),
    #[fail(display = "Unable to deserialize the response")]
    Parse(#[cause] serde_json::Error),
}

impl FetchError {
    pub fn rate_limited(reset_at: Option<DateTime<Local>>) -> FetchError {
        let reset = match reset_at {
            Some(when) => format!("at {}", when.format("%Y-%m-%d %H:%M:%S")),
            None => String::from("at an unknown time"),
        };

        FetchError::RateLimited { reset, reset_at }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(other: reqwest::Error) -> FetchError {
        FetchError::Http(other)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(other: serde_json::Error) -> FetchError {
        FetchError::Parse(other)
    }
}
