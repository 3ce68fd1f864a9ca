//! Error types for the IPAM operator
//!
//! Provides structured error types for the reconciliation loop, the IPAM
//! engine client, and the health broadcast service.

use thiserror::Error;

use crate::engine::EngineError;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("IPAM engine error: {0}")]
    Engine(#[from] EngineError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an optimistic-concurrency conflict on a store
    /// write. Conflicts are retried promptly and never escalate backoff.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Whether retrying can help. Configuration errors only resolve through
    /// operator intervention, so the backoff curve never applies to them.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Configuration(_))
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
