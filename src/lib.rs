//! IPAM Operator
//!
//! A Kubernetes operator reconciling IPAllocation resources against an
//! external IPAM engine that owns the address-space bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       IPAM Operator                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐   ┌────────────────┐   ┌──────────────┐  │
//! │  │  IPAllocation  │   │ NetworkInstance│   │    Health    │  │
//! │  │   controller   │◄──│     watcher    │   │  broadcaster │  │
//! │  └───────┬────────┘   └────────────────┘   └──────────────┘  │
//! │          │                                                   │
//! │  ┌───────┴────────┐            ┌───────────────────────────┐ │
//! │  │  Store ports   │            │   AllocationEngine port   │ │
//! │  │ (kube adapter) │            │      (REST client)        │ │
//! │  └────────────────┘            └───────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: reconciliation driver, finalizer protocol, backoff
//! - [`crd`]: Custom Resource Definitions
//! - [`engine`]: allocation engine port and REST client
//! - [`store`]: resource store ports and kube adapter
//! - [`health`]: status broadcast service
//! - [`error`]: error types and handling

pub mod controller;
pub mod crd;
pub mod engine;
pub mod error;
pub mod health;
pub mod store;

// Re-export commonly used types
pub use controller::{Context, RetryTracker, NOT_READY_REQUEUE};

pub use crd::{
    AllocationSelector, Condition, ConditionStatus, ConditionType, IPAllocation,
    IPAllocationSpec, IPAllocationStatus, NetworkInstance, NetworkInstanceSpec, FINALIZER,
    NETWORK_INSTANCE_KEY, ORIGIN_KEY,
};

pub use engine::{
    AllocatedPrefix, AllocationEngine, AllocationEngineRef, EngineError, HttpAllocationEngine,
};

pub use error::{Error, Result};

pub use health::{HealthBroadcaster, ServingStatus, CONTROLLER_SERVICE};

pub use store::{AllocationStore, InstanceStore, KubeStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
