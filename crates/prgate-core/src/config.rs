//! Gatekeeper configuration.
//!
//! [`Settings`] is the serialisable file form (TOML). Credentials may be
//! supplied through the environment instead of the file:
//!
//! - `PRGATE_GITHUB_TOKEN`
//! - `PRGATE_TRAVIS_TOKEN`
//! - `PRGATE_WEBHOOK_SECRET`
//!
//! [`Settings::into_repository_config`] turns it into the immutable
//! [`RepositoryConfig`] the repository client owns for its lifetime.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prgate_remote::{GithubConfig, TransportError, TravisConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validators::{
    AllowListValidator, ContributorValidator, ContributorsFileValidator, HttpContributorList,
    StatusesGreenValidator, UpToDateValidator, Validator,
};

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_STATUS_CONTEXT: &str = "prgate";

/// Errors raised while loading or interpreting configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to build provider client: {0}")]
    Client(#[from] TransportError),
}

/// What the pipeline does with a commit that passes every validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessMode {
    /// Merge the validated commit into the pull request's base branch.
    #[default]
    Merge,
    /// Only publish a commit status; merging is left to humans.
    Status,
}

/// Declarative validator entry, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorSpec {
    AllowList {
        logins: BTreeSet<String>,
    },
    Contributor,
    UpToDate {
        #[serde(default)]
        max_behind: u64,
    },
    StatusesGreen {
        #[serde(default)]
        ignore_contexts: BTreeSet<String>,
    },
    ContributorsFile,
}

impl ValidatorSpec {
    fn build(&self, settings: &Settings) -> Result<Arc<dyn Validator>, ConfigError> {
        Ok(match self {
            ValidatorSpec::AllowList { logins } => Arc::new(AllowListValidator::new(logins)),
            ValidatorSpec::Contributor => Arc::new(ContributorValidator),
            ValidatorSpec::UpToDate { max_behind } => {
                Arc::new(UpToDateValidator::new(*max_behind))
            }
            ValidatorSpec::StatusesGreen { ignore_contexts } => {
                Arc::new(StatusesGreenValidator::new(ignore_contexts.clone()))
            }
            ValidatorSpec::ContributorsFile => {
                let url = settings.contributors_url.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(
                        "contributors_file validator requires contributors_url".to_string(),
                    )
                })?;
                let source = HttpContributorList::new(url)?;
                Arc::new(ContributorsFileValidator::new(Arc::new(source)))
            }
        })
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_status_context() -> String {
    DEFAULT_STATUS_CONTEXT.to_string()
}

/// File form of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub organization: String,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub contributors_url: Option<String>,
    #[serde(default)]
    pub on_success: SuccessMode,
    #[serde(default = "default_status_context")]
    pub status_context: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub hosting: GithubConfig,
    #[serde(default)]
    pub ci: TravisConfig,
    #[serde(default)]
    pub validators: Vec<ValidatorSpec>,
    /// Target URL -> subscribed event names
    #[serde(default)]
    pub webhooks: BTreeMap<String, BTreeSet<String>>,
}

impl Settings {
    /// Load a TOML file and overlay credentials from the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml_str(&raw)?;
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay credentials using `lookup`; set values win over the file.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("PRGATE_GITHUB_TOKEN") {
            self.hosting.token = Some(token);
        }
        if let Some(token) = lookup("PRGATE_TRAVIS_TOKEN") {
            self.ci.token = Some(token);
        }
        if let Some(secret) = lookup("PRGATE_WEBHOOK_SECRET") {
            self.webhook_secret = Some(secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.organization.trim().is_empty() || self.repository.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "organization and repository must be set".to_string(),
            ));
        }
        if self.organization.contains('/') || self.repository.contains('/') {
            return Err(ConfigError::Invalid(
                "organization and repository must not contain '/'".to_string(),
            ));
        }
        if self.default_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("default_branch must not be empty".to_string()));
        }
        for (url, events) in &self.webhooks {
            if events.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "webhook {} subscribes to no events",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Validate and build the runtime configuration, instantiating validators
    /// in the configured order.
    pub fn into_repository_config(self) -> Result<RepositoryConfig, ConfigError> {
        self.validate()?;

        let validators = self
            .validators
            .iter()
            .map(|spec| spec.build(&self))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RepositoryConfig {
            hosting: self.hosting,
            ci: self.ci,
            organization: self.organization,
            repository: self.repository,
            default_branch: self.default_branch,
            validators,
            webhooks: (!self.webhooks.is_empty()).then_some(self.webhooks),
            contributors_url: self.contributors_url,
            on_success: self.on_success,
            status_context: self.status_context,
            webhook_secret: self.webhook_secret,
        })
    }
}

/// Immutable runtime configuration of one gated repository.
#[derive(Clone)]
pub struct RepositoryConfig {
    pub hosting: GithubConfig,
    pub ci: TravisConfig,
    pub organization: String,
    pub repository: String,
    pub default_branch: String,
    /// Judged in this order; all must pass.
    pub validators: Vec<Arc<dyn Validator>>,
    pub webhooks: Option<BTreeMap<String, BTreeSet<String>>>,
    pub contributors_url: Option<String>,
    pub on_success: SuccessMode,
    pub status_context: String,
    pub webhook_secret: Option<String>,
}

impl RepositoryConfig {
    /// Configuration with defaults and no validators.
    pub fn new(organization: &str, repository: &str) -> Self {
        RepositoryConfig {
            hosting: GithubConfig::default(),
            ci: TravisConfig::default(),
            organization: organization.to_string(),
            repository: repository.to_string(),
            default_branch: default_branch(),
            validators: Vec::new(),
            webhooks: None,
            contributors_url: None,
            on_success: SuccessMode::default(),
            status_context: default_status_context(),
            webhook_secret: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_webhook(mut self, url: &str, events: &[&str]) -> Self {
        self.webhooks
            .get_or_insert_with(BTreeMap::new)
            .insert(url.to_string(), events.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn with_success_mode(mut self, mode: SuccessMode) -> Self {
        self.on_success = mode;
        self
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }
}

impl std::fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let validators: Vec<&str> = self.validators.iter().map(|v| v.name()).collect();
        f.debug_struct("RepositoryConfig")
            .field("organization", &self.organization)
            .field("repository", &self.repository)
            .field("default_branch", &self.default_branch)
            .field("validators", &validators)
            .field("webhooks", &self.webhooks)
            .field("contributors_url", &self.contributors_url)
            .field("on_success", &self.on_success)
            .field("status_context", &self.status_context)
            .finish_non_exhaustive()
    }
}
