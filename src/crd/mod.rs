//! Custom Resource Definitions for the IPAM operator
//!
//! This module contains all CRD types:
//! - IPAllocation: a request for an IP prefix, reconciled by the controller
//! - NetworkInstance: a routing domain scoping allocations (read-only here)

pub mod ip_allocation;
pub mod network_instance;

pub use ip_allocation::*;
pub use network_instance::*;
