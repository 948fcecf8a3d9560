//! Transport trait definitions for prgate
//!
//! These traits define the capabilities the repository client consumes:
//! - `HostingAdapter`: source-hosting operations (merges, commits, hooks)
//! - `CiAdapter`: CI operations (build listing, restarts)
//!
//! Both traits are async and provider-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{
    Build, Commit, Comparison, Contributor, MergeOutcome, Page, PageCursor, PullRequest,
    PullRequestState, RateLimit, RepoSlug, RestartResult, Status, Webhook,
};

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Authenticated access to the source-hosting service.
///
/// Listing operations that the provider paginates take an optional cursor:
/// `None` requests the first page, `Some(cursor)` continues from the cursor
/// returned by the previous page.
#[async_trait]
pub trait HostingAdapter: Send + Sync {
    /// Merge `head` (branch or SHA) into the `base` branch.
    async fn merge(&self, repo: &RepoSlug, head: &str, base: &str)
        -> TransportResult<MergeOutcome>;

    /// Compare `head` against `base`.
    async fn compare(&self, repo: &RepoSlug, base: &str, head: &str)
        -> TransportResult<Comparison>;

    async fn list_pull_requests(
        &self,
        repo: &RepoSlug,
        state: PullRequestState,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<PullRequest>>;

    async fn get_pull_request(&self, repo: &RepoSlug, number: u64) -> TransportResult<PullRequest>;

    /// Commits of a pull request, oldest first.
    async fn list_pull_request_commits(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> TransportResult<Vec<Commit>>;

    async fn list_contributors(
        &self,
        repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Contributor>>;

    /// Commits on the default branch, newest first.
    async fn list_commits(
        &self,
        repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Commit>>;

    /// Statuses reported for `sha`, newest first. Empty when none exist.
    async fn get_statuses(&self, repo: &RepoSlug, sha: &str) -> TransportResult<Vec<Status>>;

    async fn create_status(
        &self,
        repo: &RepoSlug,
        sha: &str,
        status: &Status,
    ) -> TransportResult<Status>;

    /// Returns `TransportError::NotFound` for an unknown SHA.
    async fn get_commit(&self, repo: &RepoSlug, sha: &str) -> TransportResult<Commit>;

    async fn rate_limit(&self) -> TransportResult<RateLimit>;

    async fn list_webhooks(&self, repo: &RepoSlug) -> TransportResult<Vec<Webhook>>;

    async fn delete_webhook(&self, repo: &RepoSlug, id: u64) -> TransportResult<()>;

    async fn create_webhook(
        &self,
        repo: &RepoSlug,
        url: &str,
        events: &BTreeSet<String>,
    ) -> TransportResult<Webhook>;
}

/// Authenticated access to the CI service.
#[async_trait]
pub trait CiAdapter: Send + Sync {
    /// Recent builds for `repo` triggered by `event_type`, most recent first.
    ///
    /// The provider bounds how far back this looks.
    async fn list_builds(&self, repo: &RepoSlug, event_type: &str) -> TransportResult<Vec<Build>>;

    async fn restart_build(&self, id: u64) -> TransportResult<RestartResult>;
}
