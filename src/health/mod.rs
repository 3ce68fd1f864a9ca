//! Health reporting
//!
//! A process-wide broadcast service for service health: a lock-guarded
//! status map with streaming, deduplicated delivery to watchers.

pub mod broadcaster;

pub use broadcaster::{HealthBroadcaster, ServingStatus};

/// Service name the controller reports under
pub const CONTROLLER_SERVICE: &str = "ipam-operator.controller";
