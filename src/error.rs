//! Error types for the probe engine.
//!
//! Per-operation failures are values, never control flow: probes fold a
//! [`StoreError`] into their counters and keep going. Only [`Error`] escapes a
//! suite, and only when the scratch namespace cannot be prepared.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for suite-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Suite-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The scratch namespace for a suite could not be created.
    #[error("namespace setup failed for {namespace}: {source}")]
    NamespaceSetup {
        namespace: String,
        #[source]
        source: StoreError,
    },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Store operation error surfaced outside a workload.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Administrative command error surfaced outside a workload.
    #[error("admin error: {0}")]
    Admin(#[from] AdminError),
}

/// Errors from a single data operation against the store.
///
/// None of these abort an experiment; they are counted as failed attempts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The member addressed is not (or no longer) the primary.
    #[error("not primary")]
    NotPrimary,

    /// The write was applied on the primary but did not reach the
    /// requested number of replicas before the write timeout.
    #[error("write concern timed out after {elapsed:?}")]
    WriteConcernTimeout { elapsed: Duration },

    /// Transport level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The store does not support the requested feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Anything else reported by the store.
    #[error("store internal: {0}")]
    Internal(String),
}

impl StoreError {
    /// Stable label used to group failures in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Timeout => "timeout",
            StoreError::NotPrimary => "not_primary",
            StoreError::WriteConcernTimeout { .. } => "write_concern_timeout",
            StoreError::Network(_) => "network",
            StoreError::Unsupported(_) => "unsupported",
            StoreError::Internal(_) => "internal",
        }
    }

    /// Whether a retry at a later point could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout
                | StoreError::NotPrimary
                | StoreError::WriteConcernTimeout { .. }
                | StoreError::Network(_)
        )
    }
}

/// Errors from administrative commands (stepdown, status).
///
/// Callers treat these as best effort: log, assume the cluster is unchanged,
/// continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdminError {
    /// The store refused to step down.
    #[error("stepdown rejected: {0}")]
    StepDownRejected(String),

    /// The credentials lack the required role.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The command could not be delivered or answered.
    #[error("admin command unavailable: {0}")]
    Unavailable(String),
}
