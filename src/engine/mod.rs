//! Allocation engine port
//!
//! The engine owns the actual address-space bookkeeping (pools, prefix
//! trees, conflict resolution). The controller only speaks this contract;
//! [`http::HttpAllocationEngine`] is the production client.

pub mod http;

pub use http::HttpAllocationEngine;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::crd::IPAllocation;

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedPrefix {
    /// Aggregate the allocation was carved from
    pub parent_prefix: String,
    /// The allocated prefix itself
    pub prefix: String,
}

/// Typed engine error kinds.
///
/// `NotFound` and `NotReady` carry "already clean" semantics on deallocate:
/// the engine has no record of the allocation, so there is nothing to undo.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no allocation recorded for {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    #[error("engine not ready: {0}")]
    NotReady(String),

    #[error("address space exhausted: {0}")]
    Exhausted(String),

    #[error("engine failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// Whether a deallocate that returned this error left nothing behind
    pub fn is_already_clean(&self) -> bool {
        matches!(self, EngineError::NotFound { .. } | EngineError::NotReady(_))
    }
}

/// Port for IP prefix allocation operations
#[async_trait]
pub trait AllocationEngine: Send + Sync {
    /// Allocate (or re-verify) a prefix for the given allocation request
    async fn allocate(&self, allocation: &IPAllocation) -> Result<AllocatedPrefix, EngineError>;

    /// Release the allocation backing the given request
    async fn deallocate(&self, allocation: &IPAllocation) -> Result<(), EngineError>;
}

pub type AllocationEngineRef = Arc<dyn AllocationEngine>;
