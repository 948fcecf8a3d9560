//! prgate core: repository client, validators and event handling
//!
//! ## Layer 1 - Gatekeeping
//!
//! Sits on top of `prgate-remote`, which owns every byte that crosses the
//! network. This crate decides what to ask the providers and what to do with
//! the answers.
//!
//! ## Key Components
//!
//! - `RepositoryClient`: facade over the hosting and CI adapters
//! - `Validator`: pluggable pass/fail judgement of a commit and its author
//! - `ValidationPipeline`: runs every validator and merges or reports
//! - `EventDispatcher`: routes inbound webhook events into the pipeline

pub mod config;
pub mod dispatcher;
mod error;
pub mod pipeline;
pub mod repository;
pub mod signature;
pub mod telemetry;
pub mod validators;

pub use config::{
    ConfigError, RepositoryConfig, Settings, SuccessMode, ValidatorSpec, DEFAULT_BRANCH,
    DEFAULT_STATUS_CONTEXT,
};
pub use dispatcher::{DispatchOutcome, EventDispatcher, EventState, InboundEvent};
pub use error::{GateError, GateResult};
pub use pipeline::{
    CommitTarget, GateAction, OnSuccess, ValidationPipeline, ValidationReport, ValidatorVerdict,
};
pub use repository::{BehindStatus, Paginated, RepositoryClient, WebhookReconciliation};
pub use signature::{sign, verify_signature};
pub use telemetry::init_tracing;
pub use validators::{Validator, ValidatorError, ValidatorResult};
