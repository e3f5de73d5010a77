use super::{FetchError, Provider};
use crate::Repo;
use async_stream::try_stream;
use futures::stream::Stream;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One page of an owner's repositories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// The final page number, if the server told us.
    pub last: Option<u32>,
    pub repositories: Vec<Repo>,
}

/// Lazily walk every page of an owner's repositories, stopping at the first
/// empty page or once the last page has been read.
///
/// Pages are requested one at a time with a `delay` between them. The stream
/// ends with the first error (e.g. when the rate limit runs out).
pub fn paginated(
    provider: Arc<dyn Provider>,
    owner: String,
    per_page: u32,
    delay: Duration,
) -> impl Stream<Item = Result<Repo, FetchError>> {
    try_stream! {
        let mut current = 1;
        let mut last = None;

        loop {
            trace!("Fetching page {} of {}'s repositories", current, owner);
            let Page { last: reported, repositories } =
                provider.page(&owner, current, per_page).await?;
            last = reported.or(last);

            let empty = repositories.is_empty();
            for repo in repositories {
                yield repo;
            }

            if empty || last.map_or(false, |last| current >= last) {
                break;
            }

            current += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

/// Figure out the last page number from a `Link` header for the `current`
/// page.
///
/// The header looks something like this:
///
/// ```text
/// <https://api.github.com/users/x/repos?page=2>; rel="next", <https://api.github.com/users/x/repos?page=3>; rel="last"
/// ```
///
/// GitHub leaves out `rel="last"` on the final page, so a header without a
/// `rel="next"` means we're already there.
pub fn last_page(link: &str, current: u32) -> Option<u32> {
    let mut has_next = false;

    for value in link.split(',') {
        let mut parts = value.split(';');
        let target = match parts.next() {
            Some(target) => target.trim().trim_start_matches('<').trim_end_matches('>'),
            None => continue,
        };
        let rels: Vec<&str> = parts
            .filter_map(|param| {
                let param = param.trim();
                if param.starts_with("rel=") {
                    Some(param["rel=".len()..].trim_matches('"'))
                } else {
                    None
                }
            })
            .flat_map(|rel| rel.split_whitespace())
            .collect();

        if rels.contains(&"last") {
            if let Some(page) = page_number(target) {
                return Some(page);
            }
        }
        if rels.contains(&"next") {
            has_next = true;
        }
    }

    if has_next {
        None
    } else {
        Some(current)
    }
}

fn page_number(link: &str) -> Option<u32> {
    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}
