//! HTTP client for the IPAM engine
//!
//! Speaks the engine's REST API. Response status codes are mapped onto the
//! typed [`EngineError`] kinds so callers never have to inspect message text.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{AllocatedPrefix, AllocationEngine, EngineError};
use crate::crd::IPAllocation;
use async_trait::async_trait;
use kube::ResourceExt;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the engine client
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the engine API (e.g. http://ipam-engine:9080)
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://ipam-engine:9080".to_string(),
            timeout_secs: 10,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct AllocateRequest<'a> {
    namespace: &'a str,
    name: &'a str,
    selector: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix_length: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct AllocateResponse {
    parent_prefix: String,
    prefix: String,
}

// =============================================================================
// Client
// =============================================================================

/// REST client implementing the [`AllocationEngine`] port
pub struct HttpAllocationEngine {
    config: EngineConfig,
    http: reqwest::Client,
}

impl HttpAllocationEngine {
    /// Create a new engine client
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Backend(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn allocation_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/v1alpha1/allocations/{}/{}",
            self.config.endpoint, namespace, name
        )
    }
}

/// Map an engine response status to a typed error kind
fn classify_status(
    status: StatusCode,
    body: String,
    namespace: &str,
    name: &str,
) -> EngineError {
    match status {
        StatusCode::NOT_FOUND => EngineError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        StatusCode::SERVICE_UNAVAILABLE => EngineError::NotReady(body),
        StatusCode::INSUFFICIENT_STORAGE => EngineError::Exhausted(body),
        _ => EngineError::Backend(format!("{}: {}", status, body)),
    }
}

#[async_trait]
impl AllocationEngine for HttpAllocationEngine {
    async fn allocate(&self, allocation: &IPAllocation) -> Result<AllocatedPrefix, EngineError> {
        let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
        let name = allocation.name_any();

        let request = AllocateRequest {
            namespace: &namespace,
            name: &name,
            selector: &allocation.spec.selector.match_labels,
            prefix: allocation.requested_prefix(),
            prefix_length: allocation.spec.prefix_length,
        };

        let response = self
            .http
            .put(self.allocation_url(&namespace, &name))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body, &namespace, &name));
        }

        let allocated: AllocateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Backend(e.to_string()))?;

        debug!(
            namespace = %namespace,
            name = %name,
            prefix = %allocated.prefix,
            parent = %allocated.parent_prefix,
            "engine allocated prefix"
        );

        Ok(AllocatedPrefix {
            parent_prefix: allocated.parent_prefix,
            prefix: allocated.prefix,
        })
    }

    async fn deallocate(&self, allocation: &IPAllocation) -> Result<(), EngineError> {
        let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
        let name = allocation.name_any();

        let response = self
            .http
            .delete(self.allocation_url(&namespace, &name))
            .send()
            .await
            .map_err(|e| EngineError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body, &namespace, &name));
        }

        debug!(namespace = %namespace, name = %name, "engine released allocation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_status() {
        assert_matches!(
            classify_status(StatusCode::NOT_FOUND, String::new(), "default", "a"),
            EngineError::NotFound { .. }
        );
        assert_matches!(
            classify_status(
                StatusCode::SERVICE_UNAVAILABLE,
                "pool uninitialized".into(),
                "default",
                "a"
            ),
            EngineError::NotReady(_)
        );
        assert_matches!(
            classify_status(
                StatusCode::INSUFFICIENT_STORAGE,
                "no space in 10.0.0.0/8".into(),
                "default",
                "a"
            ),
            EngineError::Exhausted(_)
        );
        assert_matches!(
            classify_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom".into(),
                "default",
                "a"
            ),
            EngineError::Backend(_)
        );
    }

    #[test]
    fn test_allocation_url() {
        let engine = HttpAllocationEngine::new(EngineConfig {
            endpoint: "http://localhost:9080".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            engine.allocation_url("default", "alloc-1"),
            "http://localhost:9080/v1alpha1/allocations/default/alloc-1"
        );
    }
}
