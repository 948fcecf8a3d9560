//! Require every reported CI context to be green.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use prgate_remote::StatusState;

use super::{Validator, ValidatorError, ValidatorResult};
use crate::repository::RepositoryClient;

/// Passes when the latest status of every context is `success`.
///
/// Contexts in `ignore_contexts` and the gatekeeper's own status context are
/// skipped. A commit with no statuses at all passes.
#[derive(Debug, Clone, Default)]
pub struct StatusesGreenValidator {
    ignore_contexts: BTreeSet<String>,
}

impl StatusesGreenValidator {
    pub fn new(ignore_contexts: BTreeSet<String>) -> Self {
        Self { ignore_contexts }
    }
}

#[async_trait]
impl Validator for StatusesGreenValidator {
    fn name(&self) -> &str {
        "statuses_green"
    }

    async fn judge(
        &self,
        sha: &str,
        _login: &str,
        repo: &RepositoryClient,
        _recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        let statuses = repo.get_all_statuses_for(sha).await?;
        let own_context = repo.config().status_context.as_str();

        // newest first: the first entry per context is the current one
        let mut seen = HashSet::new();
        let problems: Vec<String> = statuses
            .iter()
            .filter(|s| seen.insert(s.context.as_str()))
            .filter(|s| s.context != own_context && !self.ignore_contexts.contains(&s.context))
            .filter(|s| s.state != StatusState::Success)
            .map(|s| format!("{} is {}", s.context, s.state))
            .collect();

        if problems.is_empty() {
            Ok(ValidatorResult::pass())
        } else {
            Ok(ValidatorResult::fail(problems.join(", ")))
        }
    }
}
