use super::{last_page, FetchError, Page, Provider};
use crate::config::GitHubConfig;
use crate::Repo;
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use failure::{Error, ResultExt};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::{Client, Request, RequestBuilder};
use sec::Secret;
use serde_derive::Deserialize;
use std::fmt::{self, Debug, Formatter};

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";
const MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// An interface to the repositories stored on GitHub.
#[derive(Clone)]
pub struct GitHub {
    cfg: GitHubConfig,
    token: Option<Secret<String>>,
    client: Client,
}

impl GitHub {
    /// Create a new `GitHub`. Without a token only public repositories can be
    /// found, even if `cfg.authenticated` is set.
    pub fn new(
        cfg: GitHubConfig,
        token: Option<Secret<String>>,
    ) -> Result<GitHub, Error> {
        if cfg.authenticated && token.is_none() {
            warn!("No API token provided, only public repositories will be found");
        }

        let client = Client::builder()
            .user_agent(cfg.agent.clone())
            .build()
            .context("Unable to create the HTTP client")?;

        Ok(GitHub { cfg, token, client })
    }

    fn token(&self) -> Option<&str> {
        if self.cfg.authenticated {
            self.token.as_ref().map(|tok| tok.reveal().as_str())
        } else {
            None
        }
    }

    fn endpoint(&self, tail: &str) -> String {
        format!("{}/{}", self.cfg.api_root.trim_end_matches('/'), tail)
    }

    async fn send_request(
        &self,
        owner: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page, FetchError> {
        let page_param = page.to_string();
        let per_page_param = per_page.to_string();

        let request = if self.token().is_some() {
            self.get("search/repositories")
                .query(&[("q", format!("user:{}", owner))])
        } else {
            self.get(&format!("users/{}/repos", owner))
        };
        let request = request
            .query(&[("per_page", &per_page_param), ("page", &page_param)])
            .build()?;

        let (headers, body) = self.execute(request, owner).await?;
        let raw: Vec<RawRepo> = if self.token().is_some() {
            serde_json::from_slice::<SearchResults>(&body)?.items
        } else {
            serde_json::from_slice(&body)?
        };

        let last = headers
            .get(LINK)
            .and_then(|link| link.to_str().ok())
            .and_then(|link| last_page(link, page));

        Ok(Page {
            last,
            repositories: raw
                .into_iter()
                .map(|r| self.convert_repo(owner, r))
                .collect(),
        })
    }

    /// Start a GET request against the API, with credentials if we have them.
    fn get(&self, tail: &str) -> RequestBuilder {
        let request = self.client.get(&self.endpoint(tail)).header(ACCEPT, MEDIA_TYPE);

        match self.token() {
            Some(token) => request.header(AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }

    /// Send a request, turning an exhausted rate limit or an unsuccessful
    /// status code into an error before anything tries to parse the body.
    async fn execute(
        &self,
        request: Request,
        owner: &str,
    ) -> Result<(HeaderMap, Vec<u8>), FetchError> {
        debug!("Sending request to {}", request.url());

        if log_enabled!(log::Level::Trace) {
            let mut redacted = format!("Request Headers {:#?}", request.headers());
            if let Some(token) = self.token() {
                redacted = redacted.replace(token, "XXXXXXXXXX");
            }

            for line in redacted.lines() {
                trace!("{}", line);
            }
        }

        let url = request.url().to_string();
        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        debug!("Received response ({})", status);

        if remaining(&headers) == Some(0) {
            warn!("Rate limit exhausted while asking about {}", owner);
            return Err(FetchError::rate_limited(reset_time(&headers)));
        }

        if !status.is_success() {
            warn!("Request failed with {}", status);
            return Err(FetchError::BadResponse { url, status });
        }

        let body = response.bytes().await?;

        Ok((headers, body.to_vec()))
    }

    fn convert_repo(&self, owner: &str, raw: RawRepo) -> Repo {
        Repo {
            full_name: raw.full_name,
            owner: owner.to_string(),
            clone_url: raw.clone_url,
            ssh_url: raw.ssh_url,
            private: raw.private,
        }
    }
}

#[async_trait]
impl Provider for GitHub {
    fn name(&self) -> &str {
        "github"
    }

    async fn page(
        &self,
        owner: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page, FetchError> {
        self.send_request(owner, page, per_page).await
    }

    async fn repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Repo, FetchError> {
        if self.token().is_none() {
            // anonymous clones only ever use the public URL
            return Ok(Repo {
                full_name: format!("{}/{}", owner, name),
                owner: owner.to_string(),
                clone_url: format!(
                    "{}/{}/{}.git",
                    self.cfg.clone_root.trim_end_matches('/'),
                    owner,
                    name
                ),
                ssh_url: format!("git@{}:{}/{}.git", self.cfg.ssh_host, owner, name),
                private: false,
            });
        }

        let request = self.get(&format!("repos/{}/{}", owner, name)).build()?;
        let (_, body) = self.execute(request, owner).await?;
        let raw: RawRepo = serde_json::from_slice(&body)?;

        Ok(self.convert_repo(owner, raw))
    }
}

impl Debug for GitHub {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("GitHub")
            .field("api_root", &self.cfg.api_root)
            .field("authenticated", &self.token().is_some())
            .finish()
    }
}

fn remaining(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RATELIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn reset_time(headers: &HeaderMap) -> Option<chrono::DateTime<Local>> {
    let timestamp: i64 = headers
        .get(RATELIMIT_RESET)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())?;

    Local.timestamp_opt(timestamp, 0).single()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawRepo {
    full_name: String,
    clone_url: String,
    ssh_url: String,
    private: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SearchResults {
    items: Vec<RawRepo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw(full_name: &str) -> serde_json::Value {
        json!({
            "full_name": full_name,
            "clone_url": format!("https://github.com/{}.git", full_name),
            "ssh_url": format!("git@github.com:{}.git", full_name),
            "private": false,
            "owner": { "login": "alice", "type": "User" },
        })
    }

    fn github(server: &MockServer, token: Option<&str>) -> GitHub {
        let cfg = GitHubConfig {
            api_root: server.uri(),
            authenticated: token.is_some(),
            ..Default::default()
        };

        GitHub::new(cfg, token.map(|t| Secret::new(t.to_string()))).unwrap()
    }

    #[tokio::test]
    async fn list_a_users_repositories() {
        let server = MockServer::start().await;
        let link = format!(
            r#"<{0}/users/alice/repos?page=2>; rel="next", <{0}/users/alice/repos?page=4>; rel="last""#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/users/alice/repos"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", link.as_str())
                    .insert_header(RATELIMIT_REMAINING, "59")
                    .set_body_json(json!([raw("alice/a"), raw("alice/b")])),
            )
            .mount(&server)
            .await;

        let got = github(&server, None).page("alice", 1, 2).await.unwrap();

        assert_eq!(got.last, Some(4));
        let names: Vec<_> = got.repositories.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(names, vec!["alice/a", "alice/b"]);
        assert_eq!(got.repositories[0].owner, "alice");
        assert_eq!(got.repositories[0].clone_url, "https://github.com/alice/a.git");
    }

    #[tokio::test]
    async fn an_exhausted_rate_limit_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/alice/repos"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header(RATELIMIT_REMAINING, "0")
                    .insert_header(RATELIMIT_RESET, "1700000000")
                    .set_body_string("{\"message\": \"API rate limit exceeded\"}"),
            )
            .mount(&server)
            .await;

        let err = github(&server, None).page("alice", 1, 100).await.unwrap_err();

        match err {
            FetchError::RateLimited { reset_at, .. } => {
                assert_eq!(reset_at.unwrap().timestamp(), 1_700_000_000);
            },
            other => panic!("Expected a rate limit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn the_rate_limit_is_checked_before_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(RATELIMIT_REMAINING, "0")
                    .set_body_string("this isn't JSON"),
            )
            .mount(&server)
            .await;

        let err = github(&server, None).page("alice", 1, 100).await.unwrap_err();

        assert!(err.to_string().contains("unknown time"), "{}", err);
    }

    #[tokio::test]
    async fn unsuccessful_responses_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = github(&server, None).page("nobody", 1, 100).await.unwrap_err();

        match err {
            FetchError::BadResponse { status, .. } => assert_eq!(status.as_u16(), 404),
            other => panic!("Expected a bad response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn garbage_bodies_are_parse_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = github(&server, None).page("alice", 1, 100).await.unwrap_err();

        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn authenticated_requests_search_with_the_token() {
        let server = MockServer::start().await;
        let mut private = raw("alice/secret");
        private["private"] = json!(true);
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .and(query_param("q", "user:alice"))
            .and(header("authorization", "token hunter2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "total_count": 1, "items": [private] })),
            )
            .mount(&server)
            .await;

        let got = github(&server, Some("hunter2"))
            .page("alice", 1, 100)
            .await
            .unwrap();

        assert_eq!(got.last, None);
        assert_eq!(got.repositories.len(), 1);
        assert!(got.repositories[0].private);
        assert_eq!(got.repositories[0].url(true), "git@github.com:alice/secret.git");
    }

    #[tokio::test]
    async fn anonymous_named_repositories_are_built_locally() {
        let server = MockServer::start().await;

        let got = github(&server, None).repository("bob", "repo1").await.unwrap();

        assert_eq!(got.full_name, "bob/repo1");
        assert_eq!(got.owner, "bob");
        assert!(!got.private);
        assert_eq!(got.url(false), "https://github.com/bob/repo1.git");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_named_repositories_keep_the_https_url_when_authenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/bob/repo1"))
            .and(header("authorization", "token hunter2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(raw("bob/repo1")))
            .expect(1)
            .mount(&server)
            .await;

        let got = github(&server, Some("hunter2"))
            .repository("bob", "repo1")
            .await
            .unwrap();

        assert!(!got.private);
        assert_eq!(got.url(true), "https://github.com/bob/repo1.git");
        server.verify().await;
    }

    #[tokio::test]
    async fn private_named_repositories_are_cloned_over_ssh() {
        let server = MockServer::start().await;
        let mut private = raw("bob/secret");
        private["private"] = json!(true);
        Mock::given(method("GET"))
            .and(path("/repos/bob/secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(private))
            .mount(&server)
            .await;

        let got = github(&server, Some("hunter2"))
            .repository("bob", "secret")
            .await
            .unwrap();

        assert!(got.private);
        assert_eq!(got.url(true), "git@github.com:bob/secret.git");
    }

    #[tokio::test]
    async fn looking_up_a_missing_named_repository_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = github(&server, Some("hunter2"))
            .repository("bob", "nope")
            .await
            .unwrap_err();

        match err {
            FetchError::BadResponse { status, .. } => assert_eq!(status.as_u16(), 404),
            other => panic!("Expected a bad response, got {:?}", other),
        }
    }

    #[test]
    fn debug_output_never_contains_the_token() {
        let cfg = GitHubConfig {
            authenticated: true,
            ..Default::default()
        };
        let gh = GitHub::new(cfg, Some(Secret::new(String::from("hunter2")))).unwrap();

        assert!(!format!("{:?}", gh).contains("hunter2"));
    }
}
