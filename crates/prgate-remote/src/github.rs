//! GitHub REST v3 hosting adapter
//!
//! Thin reqwest wrapper: every method is one request or one page of a
//! listing, except pull-request commits and commit statuses, which are
//! always read in full.
//! Pagination follows the `Link: <...>; rel="next"` header, whose
//! URL becomes the opaque page cursor.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{HostingAdapter, TransportResult};
use crate::types::{
    Commit, Comparison, ComparisonStatus, Contributor, MergeOutcome, Page, PageCursor,
    PullRequest, PullRequestState, RateLimit, RepoSlug, Status, Webhook,
};

const PER_PAGE: u32 = 100;

/// GitHub adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// API root, `https://api.github.com` unless GitHub Enterprise
    pub api_url: String,
    /// Personal access or installation token
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_url: "https://api.github.com".to_string(),
            token: None,
        }
    }
}

impl GithubConfig {
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Hosting adapter backed by the GitHub REST API
pub struct GithubHosting {
    config: GithubConfig,
    http: reqwest::Client,
}

impl GithubHosting {
    pub fn new(config: GithubConfig) -> TransportResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("prgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(GithubHosting { config, http })
    }

    fn repo_url(&self, repo: &RepoSlug, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.config.api_url.trim_end_matches('/'),
            repo.owner,
            repo.name,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        match &self.config.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> TransportResult<Response> {
        debug!(%method, url, "github request");
        let mut builder = self.request(method.clone(), url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        check_status(method, url, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TransportResult<T> {
        let response = self.send(Method::GET, url, None).await?;
        Ok(response.json::<T>().await?)
    }

    /// Fetch one page; `cursor` replaces `first_url` when continuing.
    async fn get_page<W, T>(
        &self,
        first_url: String,
        cursor: Option<&PageCursor>,
        convert: fn(W) -> T,
    ) -> TransportResult<Page<T>>
    where
        W: DeserializeOwned,
    {
        let url = match cursor {
            Some(cursor) => {
                if !cursor.0.starts_with(self.config.api_url.trim_end_matches('/')) {
                    return Err(TransportError::InvalidCursor(cursor.0.clone()));
                }
                cursor.0.clone()
            }
            None => first_url,
        };

        let response = self.send(Method::GET, &url, None).await?;
        let next = next_link(response.headers());
        let items: Vec<W> = response.json().await?;

        Ok(Page {
            items: items.into_iter().map(convert).collect(),
            next,
        })
    }

    /// Follow `next` links from `first_url` until the listing is exhausted.
    async fn get_all<W, T>(&self, first_url: String, convert: fn(W) -> T) -> TransportResult<Vec<T>>
    where
        W: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = self.get_page(first_url.clone(), cursor.as_ref(), convert).await?;
            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }
}

/// Map a non-success status to a `TransportError`.
async fn check_status(method: Method, url: &str, response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|b| b.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());

    Err(match status {
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            TransportError::NotFound(format!("{} ({})", url, message))
        }
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized(message),
        _ => TransportError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            message,
        },
    })
}

/// Extract the `rel="next"` target from a `Link` header.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<PageCursor> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(PageCursor(target.to_string()))
    })
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Deserialize)]
struct WireCommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireCommitDetail,
    author: Option<WireUser>,
    committer: Option<WireUser>,
}

impl From<WireCommit> for Commit {
    fn from(w: WireCommit) -> Self {
        Commit {
            sha: w.sha,
            author: w.author.map(|u| u.login),
            committer: w.committer.map(|u| u.login),
            message: w.commit.message,
        }
    }
}

#[derive(Deserialize)]
struct WireRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct WirePull {
    number: u64,
    state: PullRequestState,
    title: String,
    head: WireRef,
    base: WireRef,
}

impl From<WirePull> for PullRequest {
    fn from(w: WirePull) -> Self {
        PullRequest {
            number: w.number,
            state: w.state,
            title: w.title,
            head_ref: w.head.name,
            head_sha: w.head.sha,
            base_ref: w.base.name,
        }
    }
}

#[derive(Deserialize)]
struct WireComparison {
    status: ComparisonStatus,
    ahead_by: u64,
    behind_by: u64,
}

#[derive(Deserialize)]
struct WireMerge {
    sha: String,
}

#[derive(Deserialize)]
struct WireRate {
    limit: u64,
    remaining: u64,
    reset: i64,
}

#[derive(Deserialize)]
struct WireRateResources {
    core: WireRate,
}

#[derive(Deserialize)]
struct WireRateLimit {
    resources: WireRateResources,
}

#[derive(Deserialize)]
struct WireHookConfig {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WireHook {
    id: u64,
    events: BTreeSet<String>,
    config: WireHookConfig,
}

impl From<WireHook> for Webhook {
    fn from(w: WireHook) -> Self {
        Webhook {
            id: w.id,
            url: w.config.url.unwrap_or_default(),
            events: w.events,
        }
    }
}

fn identity<T>(t: T) -> T {
    t
}

// ---------------------------------------------------------------------------
// HostingAdapter
// ---------------------------------------------------------------------------

#[async_trait]
impl HostingAdapter for GithubHosting {
    async fn merge(
        &self,
        repo: &RepoSlug,
        head: &str,
        base: &str,
    ) -> TransportResult<MergeOutcome> {
        let url = self.repo_url(repo, "/merges");
        let body = serde_json::json!({ "base": base, "head": head });
        let response = self
            .request(Method::POST, &url)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                let merge: WireMerge = response.json().await?;
                Ok(MergeOutcome::Merged { sha: merge.sha })
            }
            StatusCode::NO_CONTENT => Ok(MergeOutcome::AlreadyMerged),
            StatusCode::CONFLICT => {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .map(|b| b.message)
                    .unwrap_or_else(|_| "Merge conflict".to_string());
                Ok(MergeOutcome::Conflict { message })
            }
            _ => {
                check_status(Method::POST, &url, response).await?;
                Err(TransportError::Decode(format!(
                    "unexpected success status from {}",
                    url
                )))
            }
        }
    }

    async fn compare(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> TransportResult<Comparison> {
        let url = self.repo_url(repo, &format!("/compare/{}...{}", base, head));
        let wire: WireComparison = self.get_json(&url).await?;
        Ok(Comparison {
            status: wire.status,
            ahead_by: wire.ahead_by,
            behind_by: wire.behind_by,
        })
    }

    async fn list_pull_requests(
        &self,
        repo: &RepoSlug,
        state: PullRequestState,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<PullRequest>> {
        let url = self.repo_url(
            repo,
            &format!("/pulls?state={}&per_page={}", state.as_str(), PER_PAGE),
        );
        self.get_page(url, cursor, PullRequest::from as fn(WirePull) -> PullRequest)
            .await
    }

    async fn get_pull_request(&self, repo: &RepoSlug, number: u64) -> TransportResult<PullRequest> {
        let url = self.repo_url(repo, &format!("/pulls/{}", number));
        let wire: WirePull = self.get_json(&url).await?;
        Ok(wire.into())
    }

    async fn list_pull_request_commits(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> TransportResult<Vec<Commit>> {
        // the provider stops listing after 250 commits
        let url = self.repo_url(
            repo,
            &format!("/pulls/{}/commits?per_page={}", number, PER_PAGE),
        );
        self.get_all(url, Commit::from as fn(WireCommit) -> Commit)
            .await
    }

    async fn list_contributors(
        &self,
        repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Contributor>> {
        let url = self.repo_url(repo, &format!("/contributors?per_page={}", PER_PAGE));
        self.get_page(url, cursor, identity as fn(Contributor) -> Contributor)
            .await
    }

    async fn list_commits(
        &self,
        repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Commit>> {
        let url = self.repo_url(repo, &format!("/commits?per_page={}", PER_PAGE));
        self.get_page(url, cursor, Commit::from as fn(WireCommit) -> Commit)
            .await
    }

    async fn get_statuses(&self, repo: &RepoSlug, sha: &str) -> TransportResult<Vec<Status>> {
        let url = self.repo_url(
            repo,
            &format!("/commits/{}/statuses?per_page={}", sha, PER_PAGE),
        );
        self.get_all(url, identity as fn(Status) -> Status).await
    }

    async fn create_status(
        &self,
        repo: &RepoSlug,
        sha: &str,
        status: &Status,
    ) -> TransportResult<Status> {
        let url = self.repo_url(repo, &format!("/statuses/{}", sha));
        let response = self
            .send(Method::POST, &url, Some(serde_json::to_value(status)?))
            .await?;
        Ok(response.json().await?)
    }

    async fn get_commit(&self, repo: &RepoSlug, sha: &str) -> TransportResult<Commit> {
        let url = self.repo_url(repo, &format!("/commits/{}", sha));
        let wire: WireCommit = self.get_json(&url).await?;
        Ok(wire.into())
    }

    async fn rate_limit(&self) -> TransportResult<RateLimit> {
        let url = format!("{}/rate_limit", self.config.api_url.trim_end_matches('/'));
        let wire: WireRateLimit = self.get_json(&url).await?;
        let core = wire.resources.core;
        let reset = Utc
            .timestamp_opt(core.reset, 0)
            .single()
            .ok_or_else(|| TransportError::Decode(format!("invalid reset epoch {}", core.reset)))?;
        Ok(RateLimit {
            limit: core.limit,
            remaining: core.remaining,
            reset,
        })
    }

    async fn list_webhooks(&self, repo: &RepoSlug) -> TransportResult<Vec<Webhook>> {
        let url = self.repo_url(repo, &format!("/hooks?per_page={}", PER_PAGE));
        let wire: Vec<WireHook> = self.get_json(&url).await?;
        Ok(wire.into_iter().map(Webhook::from).collect())
    }

    async fn delete_webhook(&self, repo: &RepoSlug, id: u64) -> TransportResult<()> {
        let url = self.repo_url(repo, &format!("/hooks/{}", id));
        self.send(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        repo: &RepoSlug,
        url: &str,
        events: &BTreeSet<String>,
    ) -> TransportResult<Webhook> {
        let endpoint = self.repo_url(repo, "/hooks");
        let body = serde_json::json!({
            "name": "web",
            "active": true,
            "events": events,
            "config": { "url": url, "content_type": "json" },
        });
        let response = self.send(Method::POST, &endpoint, Some(body)).await?;
        let wire: WireHook = response.json().await?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusState;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned JSON on a loopback port, one response per connection.
    /// Each route is `(path, body, next path)`; unknown paths get `[]`.
    async fn serve(routes: Vec<(&str, &str, Option<&str>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes: Vec<(String, String, Option<String>)> = routes
            .into_iter()
            .map(|(path, body, next)| {
                (
                    path.to_string(),
                    body.to_string(),
                    next.map(|n| format!("{}{}", base, n)),
                )
            })
            .collect();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                let (body, next) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, b, n)| (b.clone(), n.clone()))
                    .unwrap_or_else(|| ("[]".to_string(), None));

                let mut response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                    body.len()
                );
                if let Some(next) = next {
                    response.push_str(&format!("link: <{}>; rel=\"next\"\r\n", next));
                }
                response.push_str("\r\n");
                response.push_str(&body);
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        base
    }

    fn hosting(api_url: String) -> GithubHosting {
        GithubHosting::new(GithubConfig {
            api_url,
            token: None,
        })
        .unwrap()
    }

    fn headers(link: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(link).unwrap());
        headers
    }

    #[test]
    fn test_next_link_found_among_relations() {
        let h = headers(
            "<https://api.github.com/repositories/1/contributors?page=2>; rel=\"next\", \
             <https://api.github.com/repositories/1/contributors?page=5>; rel=\"last\"",
        );
        assert_eq!(
            next_link(&h),
            Some(PageCursor(
                "https://api.github.com/repositories/1/contributors?page=2".to_string()
            ))
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let h = headers(
            "<https://api.github.com/repositories/1/contributors?page=4>; rel=\"prev\", \
             <https://api.github.com/repositories/1/contributors?page=1>; rel=\"first\"",
        );
        assert_eq!(next_link(&h), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_wire_commit_maps_logins() {
        let wire: WireCommit = serde_json::from_value(serde_json::json!({
            "sha": "deadbeef",
            "commit": { "message": "fix" },
            "author": { "login": "alice" },
            "committer": null
        }))
        .unwrap();
        let commit = Commit::from(wire);
        assert_eq!(commit.author.as_deref(), Some("alice"));
        assert_eq!(commit.committer, None);
    }

    #[test]
    fn test_wire_hook_without_url_maps_to_empty() {
        let wire: WireHook = serde_json::from_value(serde_json::json!({
            "id": 3,
            "events": ["push", "issue_comment"],
            "config": { "content_type": "json" }
        }))
        .unwrap();
        let hook = Webhook::from(wire);
        assert_eq!(hook.url, "");
        assert_eq!(hook.events.len(), 2);
    }

    #[test]
    fn test_repo_url_trims_trailing_slash() {
        let gh = GithubHosting::new(GithubConfig {
            api_url: "https://ghe.example.com/api/v3/".to_string(),
            token: None,
        })
        .unwrap();
        let url = gh.repo_url(&RepoSlug::new("acme", "widgets"), "/hooks");
        assert_eq!(url, "https://ghe.example.com/api/v3/repos/acme/widgets/hooks");
    }

    #[tokio::test]
    async fn test_statuses_read_past_first_page() {
        let base = serve(vec![
            (
                "/repos/acme/widgets/commits/abc/statuses?per_page=100",
                r#"[{"state":"success","context":"ci/build"}]"#,
                Some("/repos/acme/widgets/commits/abc/statuses?per_page=100&page=2"),
            ),
            (
                "/repos/acme/widgets/commits/abc/statuses?per_page=100&page=2",
                r#"[{"state":"failure","context":"ci/lint","description":"3 warnings"}]"#,
                None,
            ),
        ])
        .await;

        let statuses = hosting(base)
            .get_statuses(&RepoSlug::new("acme", "widgets"), "abc")
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].context, "ci/lint");
        assert_eq!(statuses[1].state, StatusState::Failure);
    }

    #[tokio::test]
    async fn test_pull_request_commits_read_past_first_page() {
        let base = serve(vec![
            (
                "/repos/acme/widgets/pulls/7/commits?per_page=100",
                r#"[{"sha":"c1","commit":{"message":"one"},"author":{"login":"alice"},"committer":null}]"#,
                Some("/repos/acme/widgets/pulls/7/commits?per_page=100&page=2"),
            ),
            (
                "/repos/acme/widgets/pulls/7/commits?per_page=100&page=2",
                r#"[{"sha":"c2","commit":{"message":"two"},"author":null,"committer":{"login":"carol"}}]"#,
                None,
            ),
        ])
        .await;

        let commits = hosting(base)
            .list_pull_request_commits(&RepoSlug::new("acme", "widgets"), 7)
            .await
            .unwrap();

        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["c1", "c2"]);
        assert_eq!(commits[1].committer.as_deref(), Some("carol"));
    }
}
