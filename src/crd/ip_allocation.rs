//! IPAllocation CRD
//!
//! Represents a request to obtain an IP prefix from a network instance.
//! The controller fills in the allocated prefix and parent prefix, and
//! reports progress through `Synced` and `Ready` conditions.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Well-Known Keys
// =============================================================================

/// API group of the IPAM resources
pub const GROUP: &str = "ipam.billyronks.io";

/// Finalizer owned by the allocation controller
pub const FINALIZER: &str = "ipam.billyronks.io/finalizer";

/// Selector key naming the network instance an allocation is scoped to
pub const NETWORK_INSTANCE_KEY: &str = "ipam.billyronks.io/network-instance";

/// Selector key requesting a specific prefix length
pub const PREFIX_LENGTH_KEY: &str = "ipam.billyronks.io/prefix-length";

/// Selector key restricting the address family (ipv4/ipv6)
pub const ADDRESS_FAMILY_KEY: &str = "ipam.billyronks.io/address-family";

/// Selector key selecting a named pool within the instance
pub const POOL_KEY: &str = "ipam.billyronks.io/pool";

/// Label stamped by the controller to record which resource kind
/// originated an allocation in the engine
pub const ORIGIN_KEY: &str = "ipam.billyronks.io/origin";

/// Origin label value for allocations created from IPAllocation resources
pub const ORIGIN_IP_ALLOCATION: &str = "ip-allocation";

// =============================================================================
// IPAllocation CRD
// =============================================================================

/// IPAllocation requests an IP prefix (or address) from the IPAM engine,
/// scoped to the network instance named in the selector.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ipam.billyronks.io",
    version = "v1alpha1",
    kind = "IPAllocation",
    plural = "ipallocations",
    shortname = "ipalloc",
    status = "IPAllocationStatus",
    printcolumn = r#"{"name": "Prefix", "type": "string", "jsonPath": ".spec.prefix"}"#,
    printcolumn = r#"{"name": "Parent", "type": "string", "jsonPath": ".spec.parentPrefix"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IPAllocationSpec {
    /// Selector scoping the allocation; must carry the network-instance key
    #[serde(default)]
    pub selector: AllocationSelector,

    /// Requested prefix. Left empty for dynamic allocation, in which case the
    /// controller fills it in from the engine result. Once non-empty it is
    /// never overwritten, only verified against subsequent engine results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Parent prefix the allocation was carved from. Controller-written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_prefix: Option<String>,

    /// Requested prefix length for dynamic allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u8>,

    /// Gateway associated with the allocation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Interface the allocation is attached to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// Label selector carried by an allocation spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSelector {
    /// Exact-match labels; the engine also uses these to pick a pool
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of an IPAllocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPAllocationStatus {
    /// Conditions, at most one per condition type
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition types reported on an IPAllocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// Did the last reconcile pass run without unexpected fault
    Synced,
    /// Is the allocation ready for use
    Ready,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single timestamped status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Last time the status value changed
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    fn new(r#type: ConditionType, status: ConditionStatus, reason: &str) -> Self {
        Self {
            r#type,
            status,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Synced=True: the reconcile pass completed without unexpected fault
    pub fn reconcile_success() -> Self {
        Self::new(ConditionType::Synced, ConditionStatus::True, "ReconcileSuccess")
    }

    /// Synced=False: the reconcile pass hit an unexpected fault
    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(ConditionType::Synced, ConditionStatus::False, "ReconcileError")
            .with_message(message)
    }

    /// Ready=True: the allocation is in place and verified
    pub fn ready() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, "Ready")
    }

    /// Ready=False: the allocation cannot currently be satisfied
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, "Failed").with_message(message)
    }

    /// Ready=Unknown: the engine state is ambiguous and needs investigation
    pub fn unknown() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::Unknown, "Unknown")
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl IPAllocation {
    /// Whether the resource carries a deletion timestamp
    pub fn was_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Network instance named in the selector, if present
    pub fn network_instance(&self) -> Option<&str> {
        self.spec
            .selector
            .match_labels
            .get(NETWORK_INSTANCE_KEY)
            .map(String::as_str)
    }

    /// Requested prefix, if the spec carries a non-empty one
    pub fn requested_prefix(&self) -> Option<&str> {
        self.spec.prefix.as_deref().filter(|p| !p.is_empty())
    }

    /// Stamp the origin label. Additive and idempotent; returns whether the
    /// labels actually changed.
    pub fn stamp_origin_label(&mut self) -> bool {
        let labels = self.metadata.labels.get_or_insert_with(BTreeMap::new);
        let previous = labels.insert(ORIGIN_KEY.to_string(), ORIGIN_IP_ALLOCATION.to_string());
        previous.as_deref() != Some(ORIGIN_IP_ALLOCATION)
    }

    /// Set conditions, replacing any existing condition of the same type.
    ///
    /// The transition time of a replaced condition is only bumped when its
    /// status value changes; reason and message updates alone keep the
    /// previous timestamp.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        let status = self.status.get_or_insert_with(IPAllocationStatus::default);
        for mut condition in conditions {
            match status
                .conditions
                .iter_mut()
                .find(|c| c.r#type == condition.r#type)
            {
                Some(existing) => {
                    if existing.status == condition.status {
                        condition.last_transition_time = existing.last_transition_time;
                    }
                    *existing = condition;
                }
                None => status.conditions.push(condition),
            }
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, r#type: ConditionType) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == r#type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation_with_selector(labels: &[(&str, &str)]) -> IPAllocation {
        let mut selector = AllocationSelector::default();
        for (k, v) in labels {
            selector.match_labels.insert(k.to_string(), v.to_string());
        }
        IPAllocation::new(
            "alloc-1",
            IPAllocationSpec {
                selector,
                prefix: None,
                parent_prefix: None,
                prefix_length: None,
                gateway: None,
                interface: None,
            },
        )
    }

    #[test]
    fn test_network_instance_lookup() {
        let alloc = allocation_with_selector(&[(NETWORK_INSTANCE_KEY, "vpc-1")]);
        assert_eq!(alloc.network_instance(), Some("vpc-1"));

        let alloc = allocation_with_selector(&[("unrelated", "x")]);
        assert_eq!(alloc.network_instance(), None);
    }

    #[test]
    fn test_requested_prefix_ignores_empty() {
        let mut alloc = allocation_with_selector(&[]);
        assert_eq!(alloc.requested_prefix(), None);

        alloc.spec.prefix = Some(String::new());
        assert_eq!(alloc.requested_prefix(), None);

        alloc.spec.prefix = Some("10.0.0.0/24".into());
        assert_eq!(alloc.requested_prefix(), Some("10.0.0.0/24"));
    }

    #[test]
    fn test_origin_label_idempotent() {
        let mut alloc = allocation_with_selector(&[]);
        assert!(alloc.stamp_origin_label());
        assert!(!alloc.stamp_origin_label());
        assert_eq!(
            alloc.metadata.labels.as_ref().unwrap().get(ORIGIN_KEY),
            Some(&ORIGIN_IP_ALLOCATION.to_string())
        );
    }

    #[test]
    fn test_set_conditions_replaces_same_type() {
        let mut alloc = allocation_with_selector(&[]);
        alloc.set_conditions([Condition::reconcile_success(), Condition::failed("nope")]);
        alloc.set_conditions([Condition::reconcile_success(), Condition::failed("still")]);

        let conditions = &alloc.status.as_ref().unwrap().conditions;
        assert_eq!(conditions.len(), 2);
        assert_eq!(
            alloc.condition(ConditionType::Ready).unwrap().message.as_deref(),
            Some("still")
        );
    }

    #[test]
    fn test_transition_time_bumps_only_on_status_change() {
        let mut alloc = allocation_with_selector(&[]);
        alloc.set_conditions([Condition::failed("first")]);
        let first = alloc
            .condition(ConditionType::Ready)
            .unwrap()
            .last_transition_time;

        // Same status value, different message: timestamp preserved
        alloc.set_conditions([Condition::failed("second")]);
        let second = alloc
            .condition(ConditionType::Ready)
            .unwrap()
            .last_transition_time;
        assert_eq!(first, second);

        // Status flips to True: timestamp moves
        alloc.set_conditions([Condition::ready()]);
        let third = alloc
            .condition(ConditionType::Ready)
            .unwrap()
            .last_transition_time;
        assert!(third >= second);
        assert_eq!(
            alloc.condition(ConditionType::Ready).unwrap().status,
            ConditionStatus::True
        );
    }
}
