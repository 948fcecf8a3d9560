//! In-memory fakes for transport traits (testing only)
//!
//! Provides `MemoryHosting` and `MemoryCi` that satisfy the adapter
//! contracts without any network access. Both record every call so tests can
//! assert on the exact remote traffic an operation produced, and both accept
//! injected failures.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::error::TransportError;
use crate::transport::*;
use crate::types::*;

/// Branch whose history `list_commits` walks.
pub const DEFAULT_BRANCH: &str = "master";

/// Paginated listings, used to address injected page failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listing {
    PullRequests,
    Contributors,
    Commits,
}

impl Listing {
    fn tag(&self) -> &'static str {
        match self {
            Listing::PullRequests => "pulls",
            Listing::Contributors => "contributors",
            Listing::Commits => "commits",
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryHosting
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HostingState {
    /// branch -> SHAs, oldest first (linear history)
    branches: HashMap<String, Vec<String>>,
    commits: HashMap<String, Commit>,
    comparisons: HashMap<(String, String), Comparison>,
    pulls: BTreeMap<u64, (PullRequest, Vec<String>)>,
    contributors: Vec<Contributor>,
    statuses: HashMap<String, Vec<Status>>,
    webhooks: Vec<Webhook>,
    next_hook_id: u64,
    merges: Vec<(String, String)>,
    merge_outcome: Option<MergeOutcome>,
    page_failures: HashMap<Listing, usize>,
    failing_deletes: HashSet<u64>,
    calls: Vec<String>,
}

/// In-memory hosting provider.
#[derive(Debug)]
pub struct MemoryHosting {
    state: Mutex<HostingState>,
    page_size: usize,
}

impl Default for MemoryHosting {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHosting {
    pub fn new() -> Self {
        Self::with_page_size(30)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(HostingState {
                next_hook_id: 1,
                ..HostingState::default()
            }),
            page_size: page_size.max(1),
        }
    }

    /// Append `commit` to the tip of `branch`.
    pub fn push_commit(&self, branch: &str, commit: Commit) {
        let mut state = self.state.lock().unwrap();
        state
            .branches
            .entry(branch.to_string())
            .or_default()
            .push(commit.sha.clone());
        state.commits.insert(commit.sha.clone(), commit);
    }

    /// Make `commit` resolvable without placing it on any branch.
    pub fn add_commit(&self, commit: Commit) {
        let mut state = self.state.lock().unwrap();
        state.commits.insert(commit.sha.clone(), commit);
    }

    /// Override the answer to `compare(base, head)`.
    pub fn set_comparison(&self, base: &str, head: &str, comparison: Comparison) {
        let mut state = self.state.lock().unwrap();
        state
            .comparisons
            .insert((base.to_string(), head.to_string()), comparison);
    }

    /// Register a pull request and its commit SHAs, oldest first.
    pub fn add_pull_request(&self, pull: PullRequest, commit_shas: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        state.pulls.insert(pull.number, (pull, commit_shas));
    }

    pub fn add_contributor(&self, login: &str, contributions: u64) {
        let mut state = self.state.lock().unwrap();
        state.contributors.push(Contributor {
            login: login.to_string(),
            contributions,
        });
    }

    pub fn add_status(&self, sha: &str, status: Status) {
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .entry(sha.to_string())
            .or_default()
            .insert(0, status);
    }

    /// Register a webhook directly, bypassing call recording.
    pub fn add_webhook(&self, url: &str, events: &[&str]) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_hook_id;
        state.next_hook_id += 1;
        state.webhooks.push(Webhook {
            id,
            url: url.to_string(),
            events: events.iter().map(|e| e.to_string()).collect(),
        });
        id
    }

    pub fn webhooks(&self) -> Vec<Webhook> {
        self.state.lock().unwrap().webhooks.clone()
    }

    pub fn statuses(&self, sha: &str) -> Vec<Status> {
        let state = self.state.lock().unwrap();
        state.statuses.get(sha).cloned().unwrap_or_default()
    }

    /// Merges requested so far as `(head, base)` pairs.
    pub fn merges(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().merges.clone()
    }

    /// Force every subsequent merge to return `outcome`.
    pub fn set_merge_outcome(&self, outcome: MergeOutcome) {
        self.state.lock().unwrap().merge_outcome = Some(outcome);
    }

    /// Fail the fetch of page `page_index` (0-based) of `listing`.
    pub fn fail_page(&self, listing: Listing, page_index: usize) {
        let mut state = self.state.lock().unwrap();
        state.page_failures.insert(listing, page_index);
    }

    pub fn fail_delete(&self, id: u64) {
        self.state.lock().unwrap().failing_deletes.insert(id);
    }

    /// Names of the adapter methods invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    fn page<T: Clone>(
        &self,
        state: &HostingState,
        listing: Listing,
        items: &[T],
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<T>> {
        let offset = match cursor {
            None => 0,
            Some(cursor) => parse_cursor(listing, cursor)?,
        };

        let page_index = offset / self.page_size;
        if state.page_failures.get(&listing) == Some(&page_index) {
            return Err(TransportError::Http(format!(
                "injected failure on {} page {}",
                listing.tag(),
                page_index
            )));
        }

        let end = (offset + self.page_size).min(items.len());
        let slice = items.get(offset..end).unwrap_or_default().to_vec();
        let next = (end < items.len()).then(|| PageCursor(format!("{}:{}", listing.tag(), end)));

        Ok(Page { items: slice, next })
    }
}

fn record(state: &mut HostingState, call: &str) {
    state.calls.push(call.to_string());
}

fn parse_cursor(listing: Listing, cursor: &PageCursor) -> TransportResult<usize> {
    let (tag, offset) = cursor
        .0
        .split_once(':')
        .ok_or_else(|| TransportError::InvalidCursor(cursor.0.clone()))?;
    if tag != listing.tag() {
        return Err(TransportError::InvalidCursor(cursor.0.clone()));
    }
    offset
        .parse()
        .map_err(|_| TransportError::InvalidCursor(cursor.0.clone()))
}

#[async_trait]
impl HostingAdapter for MemoryHosting {
    async fn merge(
        &self,
        _repo: &RepoSlug,
        head: &str,
        base: &str,
    ) -> TransportResult<MergeOutcome> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "merge");

        let pair = (head.to_string(), base.to_string());
        let seen = state.merges.contains(&pair);
        state.merges.push(pair);

        if let Some(outcome) = &state.merge_outcome {
            return Ok(outcome.clone());
        }
        if seen {
            return Ok(MergeOutcome::AlreadyMerged);
        }
        Ok(MergeOutcome::Merged {
            sha: format!("merge-{}", head),
        })
    }

    async fn compare(
        &self,
        _repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> TransportResult<Comparison> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "compare");

        if let Some(c) = state.comparisons.get(&(base.to_string(), head.to_string())) {
            return Ok(c.clone());
        }

        let history = state
            .branches
            .get(base)
            .ok_or_else(|| TransportError::NotFound(format!("branch {}", base)))?;

        if let Some(pos) = history.iter().position(|sha| sha == head) {
            let behind_by = (history.len() - 1 - pos) as u64;
            let status = if behind_by == 0 {
                ComparisonStatus::Identical
            } else {
                ComparisonStatus::Behind
            };
            return Ok(Comparison {
                status,
                ahead_by: 0,
                behind_by,
            });
        }

        if state.commits.contains_key(head) {
            return Ok(Comparison {
                status: ComparisonStatus::Ahead,
                ahead_by: 1,
                behind_by: 0,
            });
        }

        Err(TransportError::NotFound(format!("commit {}", head)))
    }

    async fn list_pull_requests(
        &self,
        _repo: &RepoSlug,
        pr_state: PullRequestState,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<PullRequest>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "list_pull_requests");

        let pulls: Vec<PullRequest> = state
            .pulls
            .values()
            .filter(|(pr, _)| pr.state == pr_state)
            .map(|(pr, _)| pr.clone())
            .collect();
        self.page(&state, Listing::PullRequests, &pulls, cursor)
    }

    async fn get_pull_request(
        &self,
        _repo: &RepoSlug,
        number: u64,
    ) -> TransportResult<PullRequest> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "get_pull_request");

        state
            .pulls
            .get(&number)
            .map(|(pr, _)| pr.clone())
            .ok_or_else(|| TransportError::NotFound(format!("pull request #{}", number)))
    }

    async fn list_pull_request_commits(
        &self,
        _repo: &RepoSlug,
        number: u64,
    ) -> TransportResult<Vec<Commit>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "list_pull_request_commits");

        let (_, shas) = state
            .pulls
            .get(&number)
            .ok_or_else(|| TransportError::NotFound(format!("pull request #{}", number)))?;

        Ok(shas
            .iter()
            .map(|sha| {
                state.commits.get(sha).cloned().unwrap_or_else(|| Commit {
                    sha: sha.clone(),
                    author: None,
                    committer: None,
                    message: String::new(),
                })
            })
            .collect())
    }

    async fn list_contributors(
        &self,
        _repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Contributor>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "list_contributors");

        let contributors = state.contributors.clone();
        self.page(&state, Listing::Contributors, &contributors, cursor)
    }

    async fn list_commits(
        &self,
        _repo: &RepoSlug,
        cursor: Option<&PageCursor>,
    ) -> TransportResult<Page<Commit>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "list_commits");

        let commits: Vec<Commit> = state
            .branches
            .get(DEFAULT_BRANCH)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .filter_map(|sha| state.commits.get(sha).cloned())
                    .collect()
            })
            .unwrap_or_default();
        self.page(&state, Listing::Commits, &commits, cursor)
    }

    async fn get_statuses(&self, _repo: &RepoSlug, sha: &str) -> TransportResult<Vec<Status>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "get_statuses");

        Ok(state.statuses.get(sha).cloned().unwrap_or_default())
    }

    async fn create_status(
        &self,
        _repo: &RepoSlug,
        sha: &str,
        status: &Status,
    ) -> TransportResult<Status> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "create_status");

        if !state.commits.contains_key(sha) {
            return Err(TransportError::NotFound(format!("commit {}", sha)));
        }
        state
            .statuses
            .entry(sha.to_string())
            .or_default()
            .insert(0, status.clone());
        Ok(status.clone())
    }

    async fn get_commit(&self, _repo: &RepoSlug, sha: &str) -> TransportResult<Commit> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "get_commit");

        state
            .commits
            .get(sha)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("commit {}", sha)))
    }

    async fn rate_limit(&self) -> TransportResult<RateLimit> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "rate_limit");

        let used = state.calls.len() as u64;
        Ok(RateLimit {
            limit: 5000,
            remaining: 5000u64.saturating_sub(used),
            reset: Utc.timestamp_opt(0, 0).unwrap(),
        })
    }

    async fn list_webhooks(&self, _repo: &RepoSlug) -> TransportResult<Vec<Webhook>> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "list_webhooks");

        Ok(state.webhooks.clone())
    }

    async fn delete_webhook(&self, _repo: &RepoSlug, id: u64) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "delete_webhook");

        if state.failing_deletes.contains(&id) {
            return Err(TransportError::Status {
                method: "DELETE".to_string(),
                url: format!("hooks/{}", id),
                status: 500,
                message: "injected delete failure".to_string(),
            });
        }

        let before = state.webhooks.len();
        state.webhooks.retain(|h| h.id != id);
        if state.webhooks.len() == before {
            return Err(TransportError::NotFound(format!("hook {}", id)));
        }
        Ok(())
    }

    async fn create_webhook(
        &self,
        _repo: &RepoSlug,
        url: &str,
        events: &BTreeSet<String>,
    ) -> TransportResult<Webhook> {
        let mut state = self.state.lock().unwrap();
        record(&mut state, "create_webhook");

        let hook = Webhook {
            id: state.next_hook_id,
            url: url.to_string(),
            events: events.clone(),
        };
        state.next_hook_id += 1;
        state.webhooks.push(hook.clone());
        Ok(hook)
    }
}

// ---------------------------------------------------------------------------
// MemoryCi
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CiState {
    /// Most recent first, as the provider lists them.
    builds: Vec<Build>,
    restarts: Vec<u64>,
    calls: Vec<String>,
}

/// In-memory CI provider.
#[derive(Debug, Default)]
pub struct MemoryCi {
    state: Mutex<CiState>,
}

impl MemoryCi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a build as the newest one.
    pub fn add_build(&self, build: Build) {
        self.state.lock().unwrap().builds.insert(0, build);
    }

    /// Build ids restarted so far.
    pub fn restarts(&self) -> Vec<u64> {
        self.state.lock().unwrap().restarts.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl CiAdapter for MemoryCi {
    async fn list_builds(&self, _repo: &RepoSlug, event_type: &str) -> TransportResult<Vec<Build>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_builds".to_string());

        Ok(state
            .builds
            .iter()
            .filter(|b| b.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn restart_build(&self, id: u64) -> TransportResult<RestartResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("restart_build".to_string());

        if !state.builds.iter().any(|b| b.id == id) {
            return Err(TransportError::NotFound(format!("build {}", id)));
        }
        state.restarts.push(id);
        Ok(RestartResult {
            build_id: id,
            state_change: "restart".to_string(),
        })
    }
}
