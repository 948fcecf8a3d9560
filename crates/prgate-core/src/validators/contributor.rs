//! Require the author to be an existing repository contributor.

use async_trait::async_trait;

use super::{Validator, ValidatorError, ValidatorResult};
use crate::repository::RepositoryClient;

/// Passes logins found among the repository's contributors.
///
/// The contributor listing is paginated. When a later page fails the listing
/// is truncated; a login found in the partial data still passes, but a miss
/// cannot be trusted and is reported as an error rather than a rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContributorValidator;

#[async_trait]
impl Validator for ContributorValidator {
    fn name(&self) -> &str {
        "contributor"
    }

    async fn judge(
        &self,
        _sha: &str,
        login: &str,
        repo: &RepositoryClient,
        _recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        let contributors = repo.get_contributors().await?;

        if contributors
            .items
            .iter()
            .any(|c| c.login.eq_ignore_ascii_case(login))
        {
            return Ok(ValidatorResult::pass());
        }

        match &contributors.interrupted {
            Some(err) => Err(ValidatorError::Incomplete(format!(
                "contributor listing stopped after {} page(s): {}",
                contributors.pages, err
            ))),
            None => Ok(ValidatorResult::fail(format!(
                "{} has not contributed to {} before",
                login,
                repo.repo_slug()
            ))),
        }
    }
}
