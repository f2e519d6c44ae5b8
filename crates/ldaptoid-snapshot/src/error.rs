//! Error types for the snapshot pipeline.

use thiserror::Error;

/// A refresh/build failure. Adapter failures keep their transient/permanent
/// classification so the scheduler can decide whether backing off helps.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Fetching from the identity provider failed.
    #[error("adapter fetch failed: {0}")]
    Adapter(#[from] ldaptoid_idp::IdpError),

    /// The scheduler has halted after exhausting its retry budget.
    #[error("refresh scheduler is halted after {failures} consecutive failures")]
    Halted { failures: u32 },
}

/// Mapping-store failure. Never fatal to a build; surfaces as degraded
/// health.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mapping store connect failed: {0}")]
    Connect(String),

    #[error("mapping store operation failed: {0}")]
    Operation(String),

    #[error("mapping store operation timed out")]
    Timeout,

    #[error("mapping store record is not valid JSON: {0}")]
    Decode(String),
}
