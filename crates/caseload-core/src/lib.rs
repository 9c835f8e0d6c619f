//! Batch fold of CRM activity history into one reporting record per client.
//!
//! The entry point is [`Pipeline`]: build it from an immutable
//! [`PipelineConfig`], then call [`Pipeline::run`] with a full [`Snapshot`]
//! and a fixed "now". Every run recomputes the whole record set; nothing is
//! patched in place, so re-running against the same snapshot and "now"
//! reproduces the same output.
//!
//! Stage order:
//! - [`classify`] partitions activities into typed subsets.
//! - [`reduce`] collapses each subset to representative rows per account.
//! - [`aggregate`] joins reducer output onto the per-account accumulator and
//!   walks the stage list declared in [`registry`].
//! - [`milestone`], [`kpi`] and [`enrich`] derive the remaining fields.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod dates;
pub mod enrich;
pub mod kpi;
pub mod milestone;
pub mod model;
pub mod reduce;
pub mod registry;
pub mod report;

pub use aggregate::{Pipeline, PipelineOutput, RunDiagnostics, RunReport};
pub use config::PipelineConfig;
pub use dates::{format_timestamp, now_utc, parse_timestamp, Timestamp};
pub use model::{
    AccountId, ActivityEvent, ActivityKind, ClientAccount, Flag, Quarter, ReportingRecord,
    Snapshot, WageRecord,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("stage registry error: {0}")]
    Registry(String),
    #[error("validation error: {0}")]
    Validation(String),
}
