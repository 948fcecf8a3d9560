//! Pluggable commit validators.
//!
//! A validator judges one (commit SHA, author login) pair and answers pass or
//! fail with an optional reason. Failing to reach a verdict is an error, which
//! the pipeline treats very differently from a rejection: see
//! [`crate::pipeline`].

mod allow_list;
mod contributor;
mod contributors_file;
mod statuses;
mod up_to_date;

pub use allow_list::AllowListValidator;
pub use contributor::ContributorValidator;
pub use contributors_file::{
    parse_contributors, ContributorListSource, ContributorsFileValidator, HttpContributorList,
};
pub use statuses::StatusesGreenValidator;
pub use up_to_date::UpToDateValidator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::repository::RepositoryClient;

/// Verdict of a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub passed: bool,
    /// Human-readable explanation, expected on failure.
    pub reason: Option<String>,
}

impl ValidatorResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// A validator could not reach a verdict.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("remote lookup failed: {0}")]
    Remote(#[from] GateError),

    #[error("contributor list unavailable: {0}")]
    Source(String),

    /// The data needed for a negative answer was only partially available.
    #[error("incomplete data: {0}")]
    Incomplete(String),
}

/// Capability shared by every validator.
///
/// `recheck` is set when validation was re-requested by a human after an
/// earlier run; validators that remember negative results must look again.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Stable identifier used in reports and logs.
    fn name(&self) -> &str;

    async fn judge(
        &self,
        sha: &str,
        login: &str,
        repo: &RepositoryClient,
        recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError>;
}
