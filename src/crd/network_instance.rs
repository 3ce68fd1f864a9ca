//! NetworkInstance CRD
//!
//! A logical network/routing domain that scopes IP allocations. The
//! allocation controller only reads these to gate readiness; the engine owns
//! the pools behind them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NetworkInstance declares a routing domain and the aggregate prefixes the
/// engine may allocate from within it.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ipam.billyronks.io",
    version = "v1alpha1",
    kind = "NetworkInstance",
    plural = "networkinstances",
    shortname = "ni",
    printcolumn = r#"{"name": "Prefixes", "type": "string", "jsonPath": ".spec.prefixes"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInstanceSpec {
    /// Aggregate prefixes owned by this instance
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl NetworkInstance {
    /// Whether the instance carries a deletion timestamp
    pub fn was_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn test_was_deleted() {
        let mut instance = NetworkInstance::new(
            "vpc-1",
            NetworkInstanceSpec {
                prefixes: vec!["10.0.0.0/8".into()],
            },
        );
        assert!(!instance.was_deleted());

        instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(instance.was_deleted());
    }
}
