//! Error taxonomy for the gatekeeper.
//!
//! Transport failures travel inside [`GateError::Transport`] untouched; the
//! remaining variants are domain outcomes the caller can act on. A validator
//! rejecting a commit is not an error and never appears here.

use prgate_remote::TransportError;

use crate::config::ConfigError;

/// Errors produced by the repository client, pipeline and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("commit {sha} not found in {repo}")]
    CommitNotFound { repo: String, sha: String },

    #[error("pull request #{number} not found in {repo}")]
    PullRequestNotFound { repo: String, number: u64 },

    #[error("pull request #{number} in {repo} has no commits")]
    EmptyPullRequest { repo: String, number: u64 },

    #[error("no pull-request build found for #{number} in {repo}")]
    BuildNotFound { repo: String, number: u64 },

    #[error("commit {sha} is not linked to any account")]
    UnknownAuthor { sha: String },

    #[error("webhook reconciliation for {url} failed: {}", failures.join("; "))]
    Reconciliation { url: String, failures: Vec<String> },

    #[error("validation of {sha} is indeterminate: {}", errors.join("; "))]
    Indeterminate { sha: String, errors: Vec<String> },

    #[error("invalid event payload: {0}")]
    Payload(String),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for gatekeeper operations.
pub type GateResult<T> = std::result::Result<T, GateError>;
