//! IPAllocation controller
//!
//! The reconciliation driver plus its supporting pieces: the finalizer
//! protocol, backoff bookkeeping, and the shared invocation context.

pub mod context;
pub mod finalizer;
pub mod reconciler;
pub mod retry;

pub use context::Context;
pub use reconciler::{affected_allocations, error_policy, reconcile, run, NOT_READY_REQUEUE};
pub use retry::RetryTracker;
