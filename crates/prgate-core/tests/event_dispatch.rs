//! End-to-end handling of inbound webhook events.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prgate_core::{
    sign, DispatchOutcome, EventDispatcher, EventState, GateError, RepositoryClient,
    RepositoryConfig, SuccessMode, Validator, ValidatorError, ValidatorResult,
};
use prgate_remote::fakes::{MemoryCi, MemoryHosting};
use prgate_remote::{Commit, PullRequest, PullRequestState, StatusState};
use serde_json::{json, Value};
use tracing_test::traced_test;

/// Passes everything and remembers the recheck flag of each call.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, String, bool)>>,
}

#[async_trait]
impl Validator for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn judge(
        &self,
        sha: &str,
        login: &str,
        _repo: &RepositoryClient,
        recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        self.calls
            .lock()
            .unwrap()
            .push((sha.to_string(), login.to_string(), recheck));
        Ok(ValidatorResult::pass())
    }
}

struct Harness {
    dispatcher: EventDispatcher,
    hosting: Arc<MemoryHosting>,
    ci: Arc<MemoryCi>,
    recorder: Arc<Recorder>,
}

fn harness_with(config: RepositoryConfig) -> Harness {
    let hosting = Arc::new(MemoryHosting::new());
    let ci = Arc::new(MemoryCi::new());
    let recorder = Arc::new(Recorder::default());
    let config = config.with_validator(recorder.clone());
    let client = RepositoryClient::with_adapters(config, hosting.clone(), ci.clone());
    Harness {
        dispatcher: EventDispatcher::new(Arc::new(client)),
        hosting,
        ci,
        recorder,
    }
}

fn harness() -> Harness {
    harness_with(RepositoryConfig::new("acme", "widgets"))
}

fn commit(sha: &str, author: &str, committer: Option<&str>) -> Commit {
    Commit {
        sha: sha.to_string(),
        author: Some(author.to_string()),
        committer: committer.map(str::to_string),
        message: String::new(),
    }
}

/// Pull request #7 from `topic` into `release`, two commits, newest by carol.
fn seed_pull_request(hosting: &MemoryHosting, state: PullRequestState) {
    hosting.add_commit(commit("p1", "alice", Some("alice")));
    hosting.add_commit(commit("p2", "dave", Some("carol")));
    hosting.add_pull_request(
        PullRequest {
            number: 7,
            state,
            title: "Widget polish".to_string(),
            head_ref: "topic".to_string(),
            head_sha: "p2".to_string(),
            base_ref: "release".to_string(),
        },
        vec!["p1".to_string(), "p2".to_string()],
    );
}

fn comment_payload(action: &str, on_pull_request: bool) -> Value {
    let pull_request = if on_pull_request {
        json!({ "url": "https://api.github.com/repos/acme/widgets/pulls/7" })
    } else {
        Value::Null
    };
    json!({
        "action": action,
        "issue": { "number": 7, "pull_request": pull_request },
        "comment": { "user": { "login": "maintainer" }, "body": "please recheck" }
    })
}

fn pull_request_payload(action: &str) -> Value {
    json!({
        "action": action,
        "number": 7,
        "pull_request": {
            "head": { "ref": "topic", "sha": "p2" },
            "base": { "ref": "release", "sha": "m9" }
        }
    })
}

#[tokio::test]
async fn test_comment_on_plain_issue_makes_no_remote_calls() {
    let h = harness();

    let outcome = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", false))
        .await
        .unwrap();

    assert_eq!(outcome.state(), EventState::Ignored);
    assert_eq!(h.hosting.call_count(), 0);
    assert_eq!(h.ci.call_count(), 0);
    assert!(h.recorder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bare_comment_payload_on_plain_issue_is_ignored() {
    let h = harness();

    let outcome = h
        .dispatcher
        .dispatch("issue_comment", &json!({ "issue": { "number": 3 } }))
        .await
        .unwrap();

    assert_eq!(outcome.state(), EventState::Ignored);
    assert_eq!(h.hosting.call_count(), 0);
    assert!(h.recorder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_comment_on_pull_request_rechecks_latest_commit() {
    let h = harness();
    seed_pull_request(&h.hosting, PullRequestState::Open);

    let outcome = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", true))
        .await
        .unwrap();

    assert_eq!(outcome.state(), EventState::Merged);
    match &outcome {
        DispatchOutcome::Validated {
            pull_request,
            report,
        } => {
            assert_eq!(*pull_request, 7);
            assert_eq!(report.sha, "p2");
            assert_eq!(report.login, "carol");
        }
        other => panic!("expected validation, got {:?}", other),
    }
    assert_eq!(
        *h.recorder.calls.lock().unwrap(),
        vec![("p2".to_string(), "carol".to_string(), true)]
    );
    assert_eq!(
        h.hosting.merges(),
        vec![("p2".to_string(), "release".to_string())]
    );
}

#[tokio::test]
async fn test_recheck_judges_head_when_listing_stops_short() {
    let h = harness();
    seed_pull_request(&h.hosting, PullRequestState::Open);
    h.hosting.add_commit(commit("p3", "erin", Some("erin")));
    h.hosting.add_pull_request(
        PullRequest {
            number: 7,
            state: PullRequestState::Open,
            title: "Widget polish".to_string(),
            head_ref: "topic".to_string(),
            head_sha: "p3".to_string(),
            base_ref: "release".to_string(),
        },
        vec!["p1".to_string(), "p2".to_string()],
    );

    let outcome = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", true))
        .await
        .unwrap();

    match &outcome {
        DispatchOutcome::Validated { report, .. } => {
            assert_eq!(report.sha, "p3");
            assert_eq!(report.login, "erin");
        }
        other => panic!("expected validation, got {:?}", other),
    }
    assert_eq!(
        h.hosting.merges(),
        vec![("p3".to_string(), "release".to_string())]
    );
}

#[tokio::test]
async fn test_committer_falls_back_to_author() {
    let h = harness();
    seed_pull_request(&h.hosting, PullRequestState::Open);
    h.hosting.add_commit(commit("p2", "dave", None));

    let outcome = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("edited", true))
        .await
        .unwrap();

    match outcome {
        DispatchOutcome::Validated { report, .. } => assert_eq!(report.login, "dave"),
        other => panic!("expected validation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deleted_comment_and_closed_pull_request_are_ignored() {
    let h = harness();
    seed_pull_request(&h.hosting, PullRequestState::Closed);

    let deleted = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("deleted", true))
        .await
        .unwrap();
    assert_eq!(deleted.state(), EventState::Ignored);
    assert_eq!(h.hosting.call_count(), 0);

    let closed = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", true))
        .await
        .unwrap();
    assert_eq!(closed.state(), EventState::Ignored);
    assert!(h.hosting.merges().is_empty());
}

#[tokio::test]
async fn test_comment_on_missing_pull_request_errors() {
    let h = harness();

    let err = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", true))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::PullRequestNotFound { number: 7, .. }));
}

#[traced_test]
#[tokio::test]
async fn test_failed_event_is_logged_with_pull_request() {
    let h = harness();

    let err = h
        .dispatcher
        .dispatch("issue_comment", &comment_payload("created", true))
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::PullRequestNotFound { number: 7, .. }));
    assert!(logs_contain("event failed"));
    assert!(logs_contain("pr=7"));
    assert!(logs_contain("acme/widgets"));
}

#[tokio::test]
async fn test_opened_pull_request_validates_head_without_recheck() {
    let h = harness();
    seed_pull_request(&h.hosting, PullRequestState::Open);

    let outcome = h
        .dispatcher
        .dispatch("pull_request", &pull_request_payload("opened"))
        .await
        .unwrap();

    assert_eq!(outcome.state(), EventState::Merged);
    assert_eq!(
        *h.recorder.calls.lock().unwrap(),
        vec![("p2".to_string(), "carol".to_string(), false)]
    );
}

#[tokio::test]
async fn test_status_mode_event_is_accepted() {
    let h = harness_with(
        RepositoryConfig::new("acme", "widgets").with_success_mode(SuccessMode::Status),
    );
    seed_pull_request(&h.hosting, PullRequestState::Open);

    let outcome = h
        .dispatcher
        .dispatch("pull_request", &pull_request_payload("synchronize"))
        .await
        .unwrap();

    assert_eq!(outcome.state(), EventState::Accepted);
    assert_eq!(h.hosting.statuses("p2")[0].state, StatusState::Success);
    assert!(h.hosting.merges().is_empty());
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let h = harness();

    for (kind, payload) in [
        ("pull_request", pull_request_payload("labeled")),
        ("ping", json!({ "zen": "Keep it logically awesome." })),
        ("push", json!({ "ref": "refs/heads/master" })),
    ] {
        let outcome = h.dispatcher.dispatch(kind, &payload).await.unwrap();
        assert_eq!(outcome.state(), EventState::Ignored, "{}", kind);
    }
    assert_eq!(h.hosting.call_count(), 0);
}

#[tokio::test]
async fn test_signed_delivery() {
    let h = harness_with(RepositoryConfig::new("acme", "widgets").with_webhook_secret("s3cret"));
    let body = serde_json::to_vec(&comment_payload("created", false)).unwrap();

    let forged = h
        .dispatcher
        .dispatch_raw("issue_comment", &body, Some("sha256=00"))
        .await
        .unwrap_err();
    assert!(matches!(forged, GateError::Signature(_)));

    let unsigned = h.dispatcher.dispatch_raw("issue_comment", &body, None).await;
    assert!(matches!(unsigned, Err(GateError::Signature(_))));

    let signature = sign("s3cret", &body).unwrap();
    let outcome = h
        .dispatcher
        .dispatch_raw("issue_comment", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome.state(), EventState::Ignored);
    assert_eq!(h.hosting.call_count(), 0);
}

#[tokio::test]
async fn test_unsigned_delivery_without_secret() {
    let h = harness();

    let outcome = h
        .dispatcher
        .dispatch_raw("ping", br#"{"zen":"Design for failure."}"#, None)
        .await
        .unwrap();
    assert_eq!(outcome.state(), EventState::Ignored);

    let err = h
        .dispatcher
        .dispatch_raw("ping", b"not json", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Payload(_)));
}
