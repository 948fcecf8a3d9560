//! Reject commits that lag too far behind the default branch.

use async_trait::async_trait;

use super::{Validator, ValidatorError, ValidatorResult};
use crate::repository::RepositoryClient;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpToDateValidator {
    max_behind: u64,
}

impl UpToDateValidator {
    /// `max_behind = 0` demands the commit contain the branch tip.
    pub fn new(max_behind: u64) -> Self {
        Self { max_behind }
    }
}

#[async_trait]
impl Validator for UpToDateValidator {
    fn name(&self) -> &str {
        "up_to_date"
    }

    async fn judge(
        &self,
        sha: &str,
        _login: &str,
        repo: &RepositoryClient,
        _recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        let status = repo.is_behind_master(sha).await?;

        if status.distance > self.max_behind {
            Ok(ValidatorResult::fail(format!(
                "{} is {} commit(s) behind {}; rebase required",
                sha,
                status.distance,
                repo.config().default_branch
            )))
        } else {
            Ok(ValidatorResult::pass())
        }
    }
}
