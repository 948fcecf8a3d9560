//! Contributor agreement list fetched from a plain-text URL.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prgate_remote::TransportError;
use tracing::debug;

use super::{Validator, ValidatorError, ValidatorResult};
use crate::repository::RepositoryClient;

/// Source of the signed-contributor list.
#[async_trait]
pub trait ContributorListSource: Send + Sync {
    /// Returns lowercase logins.
    async fn fetch(&self) -> Result<BTreeSet<String>, ValidatorError>;
}

/// Parse one login per line. Blank lines and `#` comments are skipped, a
/// leading `@` is dropped.
pub fn parse_contributors(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.trim_start_matches('@').to_ascii_lowercase())
        .collect()
}

/// Fetches the list over HTTP on every call.
pub struct HttpContributorList {
    url: String,
    http: reqwest::Client,
}

impl HttpContributorList {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("prgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }
}

#[async_trait]
impl ContributorListSource for HttpContributorList {
    async fn fetch(&self) -> Result<BTreeSet<String>, ValidatorError> {
        debug!(url = %self.url, "fetching contributor list");
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ValidatorError::Source(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ValidatorError::Source(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ValidatorError::Source(e.to_string()))?;
        Ok(parse_contributors(&body))
    }
}

/// Passes authors who appear on the contributor list.
///
/// Rejected logins are remembered so repeated events for the same author do
/// not refetch the list. A recheck forgets the memo and looks again, which is
/// how an author who has just signed gets re-evaluated.
pub struct ContributorsFileValidator {
    source: Arc<dyn ContributorListSource>,
    rejected: Mutex<HashSet<String>>,
}

impl ContributorsFileValidator {
    pub fn new(source: Arc<dyn ContributorListSource>) -> Self {
        Self {
            source,
            rejected: Mutex::new(HashSet::new()),
        }
    }

    fn rejection(login: &str) -> ValidatorResult {
        ValidatorResult::fail(format!("{} has not signed the contributor agreement", login))
    }

    fn remembered(&self, login: &str) -> bool {
        self.rejected
            .lock()
            .map(|rejected| rejected.contains(login))
            .unwrap_or(false)
    }

    fn remember(&self, login: String, rejected: bool) {
        if let Ok(mut memo) = self.rejected.lock() {
            if rejected {
                memo.insert(login);
            } else {
                memo.remove(&login);
            }
        }
    }
}

#[async_trait]
impl Validator for ContributorsFileValidator {
    fn name(&self) -> &str {
        "contributors_file"
    }

    async fn judge(
        &self,
        _sha: &str,
        login: &str,
        _repo: &RepositoryClient,
        recheck: bool,
    ) -> Result<ValidatorResult, ValidatorError> {
        let login = login.to_ascii_lowercase();

        if !recheck && self.remembered(&login) {
            debug!(login = %login, "contributor previously rejected");
            return Ok(Self::rejection(&login));
        }

        let signed = self.source.fetch().await?;
        let passed = signed.contains(&login);
        let result = if passed {
            ValidatorResult::pass()
        } else {
            Self::rejection(&login)
        };
        self.remember(login, !passed);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use prgate_remote::fakes::{MemoryCi, MemoryHosting};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticList {
        logins: Mutex<BTreeSet<String>>,
        fetches: AtomicUsize,
    }

    impl StaticList {
        fn new(text: &str) -> Self {
            Self {
                logins: Mutex::new(parse_contributors(text)),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContributorListSource for StaticList {
        async fn fetch(&self) -> Result<BTreeSet<String>, ValidatorError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.logins.lock().unwrap().clone())
        }
    }

    fn repo() -> RepositoryClient {
        RepositoryClient::with_adapters(
            RepositoryConfig::new("acme", "widgets"),
            Arc::new(MemoryHosting::new()),
            Arc::new(MemoryCi::new()),
        )
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let parsed = parse_contributors("# signed\nAlice\n\n@bob  # joined 2024\n   \n");
        assert_eq!(
            parsed.into_iter().collect::<Vec<_>>(),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejection_is_memoized_until_recheck() {
        let source = Arc::new(StaticList::new("alice\n"));
        let validator = ContributorsFileValidator::new(source.clone());
        let repo = repo();

        let first = validator.judge("abc", "carol", &repo, false).await.unwrap();
        assert!(!first.passed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // carol signs; without a recheck the memo answers
        source.logins.lock().unwrap().insert("carol".to_string());
        let cached = validator.judge("abc", "carol", &repo, false).await.unwrap();
        assert!(!cached.passed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        let rechecked = validator.judge("abc", "Carol", &repo, true).await.unwrap();
        assert!(rechecked.passed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        let after = validator.judge("abc", "carol", &repo, false).await.unwrap();
        assert!(after.passed);
    }
}
