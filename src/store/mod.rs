//! Resource store ports
//!
//! The reconciliation driver never talks to the API server directly; it goes
//! through these ports so the whole decision sequence can be exercised
//! against in-memory fakes. [`KubeStore`] is the production adapter.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;

use crate::crd::{IPAllocation, NetworkInstance};
use crate::error::Result;

// =============================================================================
// Ports
// =============================================================================

/// Port for reading and writing IPAllocation resources
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Fetch by identity; `None` when the resource no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IPAllocation>>;

    /// Persist spec and metadata changes. Carries the resource version, so a
    /// write that races another writer surfaces as a conflict.
    async fn update(&self, allocation: &IPAllocation) -> Result<IPAllocation>;

    /// Persist the status subresource
    async fn update_status(&self, allocation: &IPAllocation) -> Result<()>;
}

/// Port for reading NetworkInstance resources
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NetworkInstance>>;
}

pub type AllocationStoreRef = Arc<dyn AllocationStore>;
pub type InstanceStoreRef = Arc<dyn InstanceStore>;

// =============================================================================
// Kubernetes Adapter
// =============================================================================

/// Store adapter backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn allocations(&self, namespace: &str) -> Api<IPAllocation> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn instances(&self, namespace: &str) -> Api<NetworkInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AllocationStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IPAllocation>> {
        Ok(self.allocations(namespace).get_opt(name).await?)
    }

    async fn update(&self, allocation: &IPAllocation) -> Result<IPAllocation> {
        let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
        let name = allocation.name_any();
        Ok(self
            .allocations(&namespace)
            .replace(&name, &PostParams::default(), allocation)
            .await?)
    }

    async fn update_status(&self, allocation: &IPAllocation) -> Result<()> {
        let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
        let name = allocation.name_any();
        let patch = serde_json::json!({ "status": allocation.status });
        self.allocations(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NetworkInstance>> {
        Ok(self.instances(namespace).get_opt(name).await?)
    }
}
