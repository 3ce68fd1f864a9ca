//! Finalizer protocol
//!
//! The controller finalizer blocks the API server from removing an
//! IPAllocation while engine cleanup is pending. Add and remove are both
//! idempotent: already-desired state is a no-op with no store write.

use tracing::debug;

use crate::crd::{IPAllocation, FINALIZER};
use crate::error::Result;
use crate::store::AllocationStore;

/// Whether the resource already carries the controller finalizer
pub fn has_finalizer(allocation: &IPAllocation) -> bool {
    allocation
        .metadata
        .finalizers
        .as_deref()
        .map(|f| f.iter().any(|x| x == FINALIZER))
        .unwrap_or(false)
}

/// Idempotently add the controller finalizer, persisting on change.
///
/// On success `allocation` is refreshed to the stored copy so later writes
/// carry the new resource version.
pub async fn ensure_finalizer(
    store: &dyn AllocationStore,
    allocation: &mut IPAllocation,
) -> Result<()> {
    if has_finalizer(allocation) {
        return Ok(());
    }
    allocation
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    debug!("adding finalizer");
    *allocation = store.update(allocation).await?;
    Ok(())
}

/// Idempotently remove the controller finalizer, persisting on change
pub async fn remove_finalizer(
    store: &dyn AllocationStore,
    allocation: &mut IPAllocation,
) -> Result<()> {
    if !has_finalizer(allocation) {
        return Ok(());
    }
    if let Some(finalizers) = allocation.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    debug!("removing finalizer");
    *allocation = store.update(allocation).await?;
    Ok(())
}
