//! Shared state handed to every reconcile invocation

use crate::engine::AllocationEngineRef;
use crate::store::{AllocationStoreRef, InstanceStoreRef};

use super::retry::RetryTracker;

/// Controller context: store and engine ports plus retry bookkeeping
pub struct Context {
    /// IPAllocation store
    pub allocations: AllocationStoreRef,
    /// NetworkInstance store
    pub instances: InstanceStoreRef,
    /// External allocation engine
    pub engine: AllocationEngineRef,
    /// Consecutive-failure counters feeding the backoff curve
    pub retry: RetryTracker,
}

impl Context {
    pub fn new(
        allocations: AllocationStoreRef,
        instances: InstanceStoreRef,
        engine: AllocationEngineRef,
    ) -> Self {
        Self {
            allocations,
            instances,
            engine,
            retry: RetryTracker::new(),
        }
    }
}
