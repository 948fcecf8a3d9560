//! Validation pipeline: run every configured validator against one commit and
//! act on the combined verdict.
//!
//! All validators run concurrently and all of them are awaited, so a report
//! always lists every reason a commit was rejected, not just the first. If any
//! validator fails to reach a verdict the whole run is indeterminate and no
//! action is taken.

use std::sync::Arc;

use futures::future::join_all;
use prgate_remote::{MergeOutcome, Status, StatusState};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::{GateError, GateResult};
use crate::repository::RepositoryClient;
use crate::validators::ValidatorResult;

/// Status descriptions longer than this are cut; the provider rejects long ones.
const MAX_DESCRIPTION: usize = 140;

/// The commit under validation. `login` is the account linked to the commit;
/// when absent the pipeline resolves it from the commit itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTarget {
    pub sha: String,
    pub login: Option<String>,
}

impl CommitTarget {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            login: None,
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }
}

/// What to do with a commit every validator accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OnSuccess {
    /// Merge `head` into `base`.
    Merge { head: String, base: String },
    /// Post a commit status; also posts a failure status on rejection.
    ReportStatus,
}

/// Side effect performed by a completed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateAction {
    Merged { outcome: MergeOutcome },
    StatusReported { state: StatusState },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorVerdict {
    pub validator: String,
    pub result: ValidatorResult,
}

/// Outcome of a complete validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub sha: String,
    pub login: String,
    pub recheck: bool,
    pub verdicts: Vec<ValidatorVerdict>,
    /// Logical AND over every verdict.
    pub mergeable: bool,
    pub action: GateAction,
}

impl ValidationReport {
    /// Failure reasons of every rejecting validator, in validator order.
    pub fn reasons(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|v| !v.result.passed)
            .map(|v| match &v.result.reason {
                Some(reason) => reason.clone(),
                None => format!("rejected by {}", v.validator),
            })
            .collect()
    }
}

pub struct ValidationPipeline {
    repo: Arc<RepositoryClient>,
}

impl ValidationPipeline {
    pub fn new(repo: Arc<RepositoryClient>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &RepositoryClient {
        &self.repo
    }

    /// Validate `target` with every configured validator, then merge or post
    /// a status depending on `on_success`.
    ///
    /// Returns [`GateError::Indeterminate`] when any validator errored; in
    /// that case nothing is merged and no status is posted.
    #[instrument(
        skip(self, target, on_success),
        fields(repo = %self.repo.slug(), sha = %target.sha)
    )]
    pub async fn perform_complete_validation(
        &self,
        target: &CommitTarget,
        recheck: bool,
        on_success: &OnSuccess,
    ) -> GateResult<ValidationReport> {
        let login = match &target.login {
            Some(login) => login.clone(),
            None => self.resolve_login(&target.sha).await?,
        };

        let validators = &self.repo.config().validators;
        let results = join_all(
            validators
                .iter()
                .map(|v| v.judge(&target.sha, &login, &self.repo, recheck)),
        )
        .await;

        let mut verdicts = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (validator, result) in validators.iter().zip(results) {
            match result {
                Ok(result) => verdicts.push(ValidatorVerdict {
                    validator: validator.name().to_string(),
                    result,
                }),
                Err(err) => {
                    warn!(validator = validator.name(), error = %err, "validator errored");
                    errors.push(format!("{}: {}", validator.name(), err));
                }
            }
        }

        if !errors.is_empty() {
            error!(?errors, "validation indeterminate");
            return Err(GateError::Indeterminate {
                sha: target.sha.clone(),
                errors,
            });
        }

        let mergeable = verdicts.iter().all(|v| v.result.passed);
        let mut report = ValidationReport {
            sha: target.sha.clone(),
            login,
            recheck,
            verdicts,
            mergeable,
            action: GateAction::None,
        };

        report.action = if mergeable {
            self.accept(&report, on_success).await?
        } else {
            info!(reasons = ?report.reasons(), "commit rejected");
            self.reject(&report, on_success).await?
        };

        Ok(report)
    }

    async fn resolve_login(&self, sha: &str) -> GateResult<String> {
        let commit = self.repo.get_commit(sha).await?;
        commit
            .committer_login()
            .map(str::to_string)
            .ok_or_else(|| GateError::UnknownAuthor {
                sha: sha.to_string(),
            })
    }

    async fn accept(
        &self,
        report: &ValidationReport,
        on_success: &OnSuccess,
    ) -> GateResult<GateAction> {
        match on_success {
            OnSuccess::Merge { head, base } => {
                let outcome = self.repo.merge(head, base).await?;
                Ok(GateAction::Merged { outcome })
            }
            OnSuccess::ReportStatus => {
                self.post_status(&report.sha, StatusState::Success, "all checks passed")
                    .await?;
                Ok(GateAction::StatusReported {
                    state: StatusState::Success,
                })
            }
        }
    }

    async fn reject(
        &self,
        report: &ValidationReport,
        on_success: &OnSuccess,
    ) -> GateResult<GateAction> {
        match on_success {
            OnSuccess::Merge { .. } => Ok(GateAction::None),
            OnSuccess::ReportStatus => {
                let description = report.reasons().join("; ");
                self.post_status(&report.sha, StatusState::Failure, &description)
                    .await?;
                Ok(GateAction::StatusReported {
                    state: StatusState::Failure,
                })
            }
        }
    }

    async fn post_status(&self, sha: &str, state: StatusState, description: &str) -> GateResult<()> {
        let status = Status::new(state, self.repo.config().status_context.clone())
            .with_description(truncate(description, MAX_DESCRIPTION));
        self.repo.set_status(sha, status).await?;
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
