//! Contract tests for the in-memory adapters.
//!
//! The repository client's tests lean on these fakes behaving like the real
//! providers, so the provider-facing guarantees are pinned down here.

use std::collections::BTreeSet;

use prgate_remote::fakes::{Listing, MemoryCi, MemoryHosting, DEFAULT_BRANCH};
use prgate_remote::{
    Build, BuildState, CiAdapter, Commit, ComparisonStatus, HostingAdapter, MergeOutcome,
    RepoSlug, TransportError,
};

fn slug() -> RepoSlug {
    RepoSlug::new("acme", "widgets")
}

fn commit(sha: &str, login: &str) -> Commit {
    Commit {
        sha: sha.to_string(),
        author: Some(login.to_string()),
        committer: Some(login.to_string()),
        message: format!("commit {}", sha),
    }
}

#[tokio::test]
async fn test_contributor_pages_chain_until_exhausted() {
    let hosting = MemoryHosting::with_page_size(2);
    for login in ["a", "b", "c", "d", "e"] {
        hosting.add_contributor(login, 1);
    }

    let first = hosting.list_contributors(&slug(), None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    let cursor = first.next.expect("second page");

    let second = hosting
        .list_contributors(&slug(), Some(&cursor))
        .await
        .unwrap();
    assert_eq!(second.items[0].login, "c");
    let cursor = second.next.expect("third page");

    let third = hosting
        .list_contributors(&slug(), Some(&cursor))
        .await
        .unwrap();
    assert_eq!(third.items.len(), 1);
    assert!(third.next.is_none());
}

#[tokio::test]
async fn test_cursor_from_other_listing_is_rejected() {
    let hosting = MemoryHosting::with_page_size(1);
    hosting.add_contributor("a", 1);
    hosting.add_contributor("b", 1);

    let first = hosting.list_contributors(&slug(), None).await.unwrap();
    let err = hosting
        .list_commits(&slug(), first.next.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidCursor(_)));
}

#[tokio::test]
async fn test_injected_page_failure() {
    let hosting = MemoryHosting::with_page_size(1);
    hosting.add_contributor("a", 1);
    hosting.add_contributor("b", 1);
    hosting.fail_page(Listing::Contributors, 1);

    let first = hosting.list_contributors(&slug(), None).await.unwrap();
    let err = hosting
        .list_contributors(&slug(), first.next.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http(_)));
}

#[tokio::test]
async fn test_compare_counts_distance_on_linear_history() {
    let hosting = MemoryHosting::new();
    hosting.push_commit(DEFAULT_BRANCH, commit("c1", "alice"));
    hosting.push_commit(DEFAULT_BRANCH, commit("c2", "alice"));
    hosting.push_commit(DEFAULT_BRANCH, commit("c3", "bob"));

    let tip = hosting.compare(&slug(), DEFAULT_BRANCH, "c3").await.unwrap();
    assert_eq!(tip.status, ComparisonStatus::Identical);
    assert_eq!(tip.behind_by, 0);

    let old = hosting.compare(&slug(), DEFAULT_BRANCH, "c1").await.unwrap();
    assert_eq!(old.status, ComparisonStatus::Behind);
    assert_eq!(old.behind_by, 2);

    let err = hosting
        .compare(&slug(), DEFAULT_BRANCH, "nope")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_second_identical_merge_reports_already_merged() {
    let hosting = MemoryHosting::new();

    let first = hosting.merge(&slug(), "abc", "master").await.unwrap();
    assert!(matches!(first, MergeOutcome::Merged { .. }));

    let second = hosting.merge(&slug(), "abc", "master").await.unwrap();
    assert_eq!(second, MergeOutcome::AlreadyMerged);
}

#[tokio::test]
async fn test_webhook_create_and_delete() {
    let hosting = MemoryHosting::new();
    let events: BTreeSet<String> = ["push".to_string()].into_iter().collect();

    let hook = hosting
        .create_webhook(&slug(), "https://hooks.example/gate", &events)
        .await
        .unwrap();
    assert_eq!(hosting.webhooks().len(), 1);

    hosting.delete_webhook(&slug(), hook.id).await.unwrap();
    assert!(hosting.webhooks().is_empty());

    let err = hosting.delete_webhook(&slug(), hook.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_ci_lists_newest_first_and_restarts() {
    let ci = MemoryCi::new();
    ci.add_build(Build {
        id: 1,
        pull_request_number: Some(7),
        event_type: "pull_request".to_string(),
        state: BuildState::Failed,
    });
    ci.add_build(Build {
        id: 2,
        pull_request_number: None,
        event_type: "push".to_string(),
        state: BuildState::Passed,
    });
    ci.add_build(Build {
        id: 3,
        pull_request_number: Some(7),
        event_type: "pull_request".to_string(),
        state: BuildState::Passed,
    });

    let builds = ci.list_builds(&slug(), "pull_request").await.unwrap();
    assert_eq!(builds.iter().map(|b| b.id).collect::<Vec<_>>(), vec![3, 1]);

    let result = ci.restart_build(3).await.unwrap();
    assert_eq!(result.build_id, 3);
    assert_eq!(ci.restarts(), vec![3]);
    assert!(ci.restart_build(99).await.is_err());
}
