//! Static allow list of logins.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::{Validator, ValidatorError, ValidatorResult};
use crate::repository::RepositoryClient;

/// Passes only logins named in the configuration. Logins compare
/// case-insensitively, as the hosting provider treats them.
#[derive(Debug, Clone)]
pub struct AllowListValidator {
    logins: BTreeSet<String>,
}

impl AllowListValidator {
    pub fn new<I, S>(logins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            logins: logins
                .into_iter()
                .map(|l| l.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl Validator for AllowListValidator {
    fn name(&self) -> &str {
        "allow_list"
    }

    async fn judge(
        &self,
        _sha: &str,
        login: &str,
        _repo: &RepositoryClient,
        _recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        if self.logins.contains(&login.to_ascii_lowercase()) {
            Ok(ValidatorResult::pass())
        } else {
            Ok(ValidatorResult::fail(format!(
                "{} is not on the allow list",
                login
            )))
        }
    }
}
