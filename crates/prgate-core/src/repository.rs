//! Repository client: the sole gateway to the hosting and CI providers.
//!
//! The client is stateless apart from its immutable configuration. Every
//! query goes back to the provider; nothing fetched here is cached, so a
//! decision is always made against the provider's state at call time.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use prgate_remote::{
    CiAdapter, Commit, Contributor, GithubHosting, HostingAdapter, MergeOutcome, Page, PageCursor,
    PullRequest, PullRequestState, RateLimit, RepoSlug, RestartResult, Status, TransportError,
    TransportResult, TravisCi, Webhook,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::error::{GateError, GateResult};

/// CI event type whose builds `trigger_travis_for_pull_request` searches.
const PULL_REQUEST_EVENT: &str = "pull_request";

/// The accumulated result of a multi-page listing.
///
/// A failure on any page after the first ends the listing early instead of
/// failing it: the items gathered so far are returned and the swallowed
/// error is kept in `interrupted`, so callers that care can tell a
/// truncated listing from a complete one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    /// Pages successfully fetched.
    pub pages: usize,
    pub interrupted: Option<TransportError>,
}

impl<T> Paginated<T> {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Position of a commit relative to the default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehindStatus {
    pub behind: bool,
    pub distance: u64,
}

/// What `confirm_webhook_exists` did to reach the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReconciliation {
    pub url: String,
    /// Existing hook that already matched and was left alone.
    pub kept: Option<u64>,
    /// Stale or duplicate hooks removed.
    pub deleted: Vec<u64>,
    pub created: Option<Webhook>,
}

impl WebhookReconciliation {
    /// Whether any remote state was modified.
    pub fn changed(&self) -> bool {
        !self.deleted.is_empty() || self.created.is_some()
    }
}

/// Fetch pages until the provider reports no continuation.
///
/// Pages are requested strictly one after another since each cursor comes
/// from the previous response.
async fn collect_pages<T, F, Fut>(
    slug: &RepoSlug,
    listing: &'static str,
    mut fetch: F,
) -> GateResult<Paginated<T>>
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = TransportResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut pages = 0usize;
    let mut cursor = None;

    loop {
        match fetch(cursor.take()).await {
            Ok(page) => {
                pages += 1;
                items.extend(page.items);
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => {
                        debug!(repo = %slug, listing, pages, total = items.len(), "listing complete");
                        return Ok(Paginated {
                            items,
                            pages,
                            interrupted: None,
                        });
                    }
                }
            }
            Err(e) if pages == 0 => return Err(e.into()),
            Err(e) => {
                warn!(
                    repo = %slug,
                    listing,
                    pages,
                    total = items.len(),
                    error = %e,
                    "page fetch failed, treating as end of listing"
                );
                return Ok(Paginated {
                    items,
                    pages,
                    interrupted: Some(e),
                });
            }
        }
    }
}

/// Authenticated facade over the hosting and CI adapters for one repository.
pub struct RepositoryClient {
    config: RepositoryConfig,
    slug: RepoSlug,
    hosting: Arc<dyn HostingAdapter>,
    ci: Arc<dyn CiAdapter>,
}

impl RepositoryClient {
    /// Build HTTP adapters from the configured credentials.
    pub fn connect(config: RepositoryConfig) -> GateResult<Self> {
        let hosting = GithubHosting::new(config.hosting.clone())?;
        let ci = TravisCi::new(config.ci.clone())?;
        Ok(Self::with_adapters(config, Arc::new(hosting), Arc::new(ci)))
    }

    pub fn with_adapters(
        config: RepositoryConfig,
        hosting: Arc<dyn HostingAdapter>,
        ci: Arc<dyn CiAdapter>,
    ) -> Self {
        let slug = RepoSlug::new(config.organization.clone(), config.repository.clone());
        RepositoryClient {
            config,
            slug,
            hosting,
            ci,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn slug(&self) -> &RepoSlug {
        &self.slug
    }

    /// `"{organization}/{repository}"`
    pub fn repo_slug(&self) -> String {
        self.slug.to_string()
    }

    fn commit_not_found(&self, sha: &str, err: TransportError) -> GateError {
        if err.is_not_found() {
            GateError::CommitNotFound {
                repo: self.repo_slug(),
                sha: sha.to_string(),
            }
        } else {
            err.into()
        }
    }

    fn pull_not_found(&self, number: u64, err: TransportError) -> GateError {
        if err.is_not_found() {
            GateError::PullRequestNotFound {
                repo: self.repo_slug(),
                number,
            }
        } else {
            err.into()
        }
    }

    /// Merge `head` into `base`. Conflicts come back as
    /// [`MergeOutcome::Conflict`]; nothing is retried.
    #[instrument(skip(self), fields(repo = %self.slug))]
    pub async fn merge(&self, head: &str, base: &str) -> GateResult<MergeOutcome> {
        let outcome = self.hosting.merge(&self.slug, head, base).await?;
        match &outcome {
            MergeOutcome::Merged { sha } => info!(merge_sha = %sha, "merged"),
            MergeOutcome::AlreadyMerged => info!("nothing to merge"),
            MergeOutcome::Conflict { message } => warn!(%message, "merge conflict"),
        }
        Ok(outcome)
    }

    /// Compare `sha` with the tip of the default branch.
    pub async fn is_behind_master(&self, sha: &str) -> GateResult<BehindStatus> {
        let comparison = self
            .hosting
            .compare(&self.slug, &self.config.default_branch, sha)
            .await
            .map_err(|e| self.commit_not_found(sha, e))?;

        Ok(BehindStatus {
            behind: comparison.behind_by > 0,
            distance: comparison.behind_by,
        })
    }

    pub async fn get_all_open_pull_requests(&self) -> GateResult<Paginated<PullRequest>> {
        let hosting = Arc::clone(&self.hosting);
        let slug = self.slug.clone();
        collect_pages(&self.slug, "pull_requests", move |cursor| {
            let hosting = Arc::clone(&hosting);
            let slug = slug.clone();
            async move {
                hosting
                    .list_pull_requests(&slug, PullRequestState::Open, cursor.as_ref())
                    .await
            }
        })
        .await
    }

    pub async fn get_contributors(&self) -> GateResult<Paginated<Contributor>> {
        let hosting = Arc::clone(&self.hosting);
        let slug = self.slug.clone();
        collect_pages(&self.slug, "contributors", move |cursor| {
            let hosting = Arc::clone(&hosting);
            let slug = slug.clone();
            async move { hosting.list_contributors(&slug, cursor.as_ref()).await }
        })
        .await
    }

    pub async fn get_commits(&self) -> GateResult<Paginated<Commit>> {
        let hosting = Arc::clone(&self.hosting);
        let slug = self.slug.clone();
        collect_pages(&self.slug, "commits", move |cursor| {
            let hosting = Arc::clone(&hosting);
            let slug = slug.clone();
            async move { hosting.list_commits(&slug, cursor.as_ref()).await }
        })
        .await
    }

    pub async fn get_pull_request(&self, number: u64) -> GateResult<PullRequest> {
        self.hosting
            .get_pull_request(&self.slug, number)
            .await
            .map_err(|e| self.pull_not_found(number, e))
    }

    /// The most recent commit of a pull request.
    pub async fn get_latest_commit(&self, number: u64) -> GateResult<Commit> {
        let pull = self.get_pull_request(number).await?;
        self.latest_commit_of(&pull).await
    }

    /// The most recent commit of an already fetched pull request. The
    /// provider cuts the commit listing short on very long pull requests, so
    /// the head SHA wins whenever the listing does not end on it.
    pub async fn latest_commit_of(&self, pull: &PullRequest) -> GateResult<Commit> {
        let number = pull.number;
        let commits = self
            .hosting
            .list_pull_request_commits(&self.slug, number)
            .await
            .map_err(|e| self.pull_not_found(number, e))?;

        match commits.into_iter().last() {
            None => Err(GateError::EmptyPullRequest {
                repo: self.repo_slug(),
                number,
            }),
            Some(last) if last.sha == pull.head_sha => Ok(last),
            Some(last) => {
                warn!(
                    repo = %self.slug,
                    pr = number,
                    listed = %last.sha,
                    head = %pull.head_sha,
                    "commit listing ends before head"
                );
                self.get_commit(&pull.head_sha).await
            }
        }
    }

    /// All statuses for `sha`; empty when nothing has reported yet.
    pub async fn get_all_statuses_for(&self, sha: &str) -> GateResult<Vec<Status>> {
        Ok(self.hosting.get_statuses(&self.slug, sha).await?)
    }

    #[instrument(skip(self, status), fields(repo = %self.slug, state = %status.state))]
    pub async fn set_status(&self, sha: &str, status: Status) -> GateResult<Status> {
        self.hosting
            .create_status(&self.slug, sha, &status)
            .await
            .map_err(|e| self.commit_not_found(sha, e))
    }

    pub async fn get_commit(&self, sha: &str) -> GateResult<Commit> {
        self.hosting
            .get_commit(&self.slug, sha)
            .await
            .map_err(|e| self.commit_not_found(sha, e))
    }

    pub async fn rate_limit(&self) -> GateResult<RateLimit> {
        Ok(self.hosting.rate_limit().await?)
    }

    /// Make the provider hold exactly one webhook for `url`, subscribed to
    /// exactly `events`.
    ///
    /// A matching hook is kept; every other hook on `url` (stale event set or
    /// duplicate) is deleted concurrently. If any deletion fails the whole
    /// reconciliation fails before anything is created.
    #[instrument(skip(self, events), fields(repo = %self.slug))]
    pub async fn confirm_webhook_exists(
        &self,
        url: &str,
        events: &BTreeSet<String>,
    ) -> GateResult<WebhookReconciliation> {
        let hooks = self.hosting.list_webhooks(&self.slug).await?;

        let mut kept = None;
        let mut stale = Vec::new();
        for hook in hooks.into_iter().filter(|h| h.url == url) {
            if kept.is_none() && &hook.events == events {
                kept = Some(hook.id);
            } else {
                stale.push(hook.id);
            }
        }

        let deletions = stale.iter().map(|&id| async move {
            (id, self.hosting.delete_webhook(&self.slug, id).await)
        });
        let failures: Vec<String> = join_all(deletions)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| format!("hook {}: {}", id, e)))
            .collect();

        if !failures.is_empty() {
            warn!(failed = failures.len(), "stale webhook deletion failed");
            return Err(GateError::Reconciliation {
                url: url.to_string(),
                failures,
            });
        }

        let created = match kept {
            Some(id) => {
                debug!(hook = id, "webhook already up to date");
                None
            }
            None => {
                let hook = self.hosting.create_webhook(&self.slug, url, events).await?;
                info!(hook = hook.id, "webhook created");
                Some(hook)
            }
        };

        Ok(WebhookReconciliation {
            url: url.to_string(),
            kept,
            deleted: stale,
            created,
        })
    }

    /// Reconcile every webhook in the configured map, in URL order.
    pub async fn reconcile_webhooks(&self) -> GateResult<Vec<WebhookReconciliation>> {
        let mut results = Vec::new();
        if let Some(webhooks) = &self.config.webhooks {
            for (url, events) in webhooks {
                results.push(self.confirm_webhook_exists(url, events).await?);
            }
        }
        Ok(results)
    }

    /// Restart the most recent CI build of pull request `number`.
    ///
    /// Only builds the provider still lists are considered.
    #[instrument(skip(self), fields(repo = %self.slug))]
    pub async fn trigger_travis_for_pull_request(&self, number: u64) -> GateResult<RestartResult> {
        let builds = self.ci.list_builds(&self.slug, PULL_REQUEST_EVENT).await?;

        let build = builds
            .into_iter()
            .find(|b| b.pull_request_number == Some(number))
            .ok_or_else(|| GateError::BuildNotFound {
                repo: self.repo_slug(),
                number,
            })?;

        info!(build = build.id, "restarting build");
        Ok(self.ci.restart_build(build.id).await?)
    }
}

impl std::fmt::Display for RepositoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug)
    }
}
