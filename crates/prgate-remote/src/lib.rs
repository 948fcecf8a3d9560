//! prgate-remote: transport layer for the pull-request gatekeeper
//!
//! This crate owns every byte that crosses the wire. It defines the
//! capability traits the repository client consumes, the wire-neutral
//! types they exchange, and thin HTTP adapters for the hosting and CI
//! providers.
//!
//! ## Layer 0 - Transport
//!
//! Focus: faithful pass-through of provider state, no caching.
//!
//! ## Key Components
//!
//! - `HostingAdapter`: source-hosting operations (GitHub REST v3)
//! - `CiAdapter`: CI operations (Travis CI API v3)
//! - `GithubHosting` / `TravisCi`: reqwest implementations
//! - `fakes`: in-memory adapters for tests

mod error;
pub mod fakes;
pub mod github;
pub mod transport;
pub mod travis;
mod types;

pub use error::TransportError;
pub use github::{GithubConfig, GithubHosting};
pub use transport::{CiAdapter, HostingAdapter, TransportResult};
pub use travis::{TravisCi, TravisConfig};
pub use types::{
    Build, BuildState, Commit, Comparison, ComparisonStatus, Contributor, MergeOutcome, Page,
    PageCursor, PullRequest, PullRequestState, RateLimit, RepoSlug, RestartResult, Status,
    StatusState, Webhook,
};
