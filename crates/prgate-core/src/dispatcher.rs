//! Inbound webhook events.
//!
//! An event is a type tag (the `X-GitHub-Event` header) plus a JSON payload.
//! Each event is handled on its own: classify, resolve the commit to judge,
//! run the validation pipeline. Nothing is kept between events.

use std::sync::Arc;

use prgate_remote::{MergeOutcome, PullRequestState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, field, info, instrument, Span};

use crate::config::SuccessMode;
use crate::error::{GateError, GateResult};
use crate::pipeline::{CommitTarget, GateAction, OnSuccess, ValidationPipeline, ValidationReport};
use crate::repository::RepositoryClient;
use crate::signature::verify_signature;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentedIssue {
    pub number: u64,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub user: Account,
    #[serde(default)]
    pub body: String,
}

/// Only `issue` is required; a comment on a plain issue is dropped before
/// anything else in the payload is looked at.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    #[serde(default)]
    pub action: Option<CommentAction>,
    pub issue: CommentedIssue,
    #[serde(default)]
    pub comment: Option<Comment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestBody {
    pub head: GitRef,
    pub base: GitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    /// Kept as a string: the provider adds actions over time.
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequestBody,
}

/// A classified inbound event.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    IssueComment(IssueCommentEvent),
    PullRequest(PullRequestEvent),
    Ping,
    Other(String),
}

impl InboundEvent {
    pub fn classify(event_type: &str, payload: &Value) -> GateResult<Self> {
        let decode = |what: &str, err: serde_json::Error| {
            GateError::Payload(format!("{} payload: {}", what, err))
        };
        Ok(match event_type {
            "issue_comment" => InboundEvent::IssueComment(
                IssueCommentEvent::deserialize(payload).map_err(|e| decode(event_type, e))?,
            ),
            "pull_request" => InboundEvent::PullRequest(
                PullRequestEvent::deserialize(payload).map_err(|e| decode(event_type, e))?,
            ),
            "ping" => InboundEvent::Ping,
            other => InboundEvent::Other(other.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Terminal state of a successfully handled event. Failures take the `Err`
/// path instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Ignored,
    Merged,
    /// Accepted and reported through a commit status.
    Accepted,
    Conflicted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Ignored {
        reason: String,
    },
    Validated {
        pull_request: u64,
        report: ValidationReport,
    },
}

impl DispatchOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        DispatchOutcome::Ignored {
            reason: reason.into(),
        }
    }

    pub fn state(&self) -> EventState {
        let report = match self {
            DispatchOutcome::Ignored { .. } => return EventState::Ignored,
            DispatchOutcome::Validated { report, .. } => report,
        };
        match (report.mergeable, &report.action) {
            (false, _) => EventState::Rejected,
            (
                true,
                GateAction::Merged {
                    outcome: MergeOutcome::Conflict { .. },
                },
            ) => EventState::Conflicted,
            (true, GateAction::Merged { .. }) => EventState::Merged,
            (true, GateAction::StatusReported { .. } | GateAction::None) => EventState::Accepted,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct EventDispatcher {
    repo: Arc<RepositoryClient>,
    pipeline: ValidationPipeline,
}

impl EventDispatcher {
    pub fn new(repo: Arc<RepositoryClient>) -> Self {
        let pipeline = ValidationPipeline::new(repo.clone());
        Self { repo, pipeline }
    }

    /// Verify the signature of a raw delivery, when a webhook secret is
    /// configured, then decode and dispatch it.
    pub async fn dispatch_raw(
        &self,
        event_type: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> GateResult<DispatchOutcome> {
        if let Some(secret) = &self.repo.config().webhook_secret {
            verify_signature(secret, body, signature)?;
        }
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| GateError::Payload(format!("invalid JSON: {}", e)))?;
        self.dispatch(event_type, &payload).await
    }

    /// Handle one decoded event. Failures are logged here, inside the event
    /// span, before being returned.
    #[instrument(
        skip(self, payload),
        fields(repo = %self.repo.slug(), pr = field::Empty)
    )]
    pub async fn dispatch(&self, event_type: &str, payload: &Value) -> GateResult<DispatchOutcome> {
        let result = self.handle(event_type, payload).await;
        match &result {
            Ok(outcome) => info!(state = ?outcome.state(), "event handled"),
            Err(err) => error!(error = %err, "event failed"),
        }
        result
    }

    async fn handle(&self, event_type: &str, payload: &Value) -> GateResult<DispatchOutcome> {
        Ok(match InboundEvent::classify(event_type, payload)? {
            InboundEvent::IssueComment(event) => self.on_issue_comment(event).await?,
            InboundEvent::PullRequest(event) => self.on_pull_request(event).await?,
            InboundEvent::Ping => DispatchOutcome::ignored("ping"),
            InboundEvent::Other(kind) => {
                DispatchOutcome::ignored(format!("unhandled event type {}", kind))
            }
        })
    }

    async fn on_issue_comment(&self, event: IssueCommentEvent) -> GateResult<DispatchOutcome> {
        let number = event.issue.number;
        if event.issue.pull_request.is_none() {
            debug!(issue = number, "comment on plain issue");
            return Ok(DispatchOutcome::ignored(format!(
                "#{} is not a pull request",
                number
            )));
        }
        if event.action == Some(CommentAction::Deleted) {
            return Ok(DispatchOutcome::ignored("comment deleted"));
        }

        Span::current().record("pr", number);
        let commenter = event.comment.as_ref().map(|c| c.user.login.as_str());
        debug!(commenter, "recheck requested");
        let pull = self.repo.get_pull_request(number).await?;
        if pull.state != PullRequestState::Open {
            return Ok(DispatchOutcome::ignored(format!(
                "pull request #{} is {}",
                number,
                pull.state.as_str()
            )));
        }

        let latest = self.repo.latest_commit_of(&pull).await?;
        let commit = self.repo.get_commit(&latest.sha).await?;
        let login = commit
            .committer_login()
            .ok_or_else(|| GateError::UnknownAuthor {
                sha: commit.sha.clone(),
            })?;

        let target = CommitTarget::new(commit.sha.clone()).with_login(login);
        let on_success = self.on_success_for(&commit.sha, &pull.base_ref);
        let report = self
            .pipeline
            .perform_complete_validation(&target, true, &on_success)
            .await?;

        Ok(DispatchOutcome::Validated {
            pull_request: number,
            report,
        })
    }

    async fn on_pull_request(&self, event: PullRequestEvent) -> GateResult<DispatchOutcome> {
        if !matches!(event.action.as_str(), "opened" | "reopened" | "synchronize") {
            return Ok(DispatchOutcome::ignored(format!(
                "pull_request action {}",
                event.action
            )));
        }

        Span::current().record("pr", event.number);
        let head = &event.pull_request.head.sha;
        let target = CommitTarget::new(head.clone());
        let on_success = self.on_success_for(head, &event.pull_request.base.name);
        let report = self
            .pipeline
            .perform_complete_validation(&target, false, &on_success)
            .await?;

        Ok(DispatchOutcome::Validated {
            pull_request: event.number,
            report,
        })
    }

    fn on_success_for(&self, sha: &str, base: &str) -> OnSuccess {
        match self.repo.config().on_success {
            SuccessMode::Merge => OnSuccess::Merge {
                head: sha.to_string(),
                base: base.to_string(),
            },
            SuccessMode::Status => OnSuccess::ReportStatus,
        }
    }
}
