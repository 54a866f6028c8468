//! StorageProbe CRD
//!
//! Declares a probe group: which storage class to exercise, on which nodes,
//! how often, and how long provisioning may take before an attempt is late.

use crate::duration::parse_duration;
use crate::error::CrdError;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default probe period in minutes
pub const DEFAULT_PROBE_PERIOD: u32 = 1;
/// Default probe threshold
pub const DEFAULT_PROBE_THRESHOLD: &str = "1m";
/// Default capacity of scratch volumes
pub const DEFAULT_PVC_CAPACITY: &str = "100Mi";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "probe.microscaler.io",
    version = "v1alpha1",
    kind = "StorageProbe",
    namespaced,
    status = "StorageProbeStatus",
    shortname = "sprobe",
    printcolumn = r#"{"name":"StorageClass","type":"string","jsonPath":".spec.monitoringStorageClass"}"#,
    printcolumn = r#"{"name":"Period","type":"integer","jsonPath":".spec.probePeriod"}"#,
    printcolumn = r#"{"name":"Threshold","type":"string","jsonPath":".spec.probeThreshold"}"#
)]
#[serde(rename_all = "camelCase")]
#[schemars(extend("x-kubernetes-validations" = [{
    "rule": "duration(self.probeThreshold) < duration(string(self.probePeriod) + 'm')",
    "message": "probeThreshold must be shorter than probePeriod"
}]))]
pub struct StorageProbeSpec {
    /// Storage class exercised by this probe group.
    /// Bound on the first reconcile and immutable afterwards.
    #[schemars(extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "field is immutable"}]))]
    pub monitoring_storage_class: String,

    /// Nodes that receive a mount probe. An empty term list selects every node.
    #[serde(default)]
    pub node_selector: ProbeNodeSelector,

    /// Minutes between two runs of the same probe (1-59)
    #[serde(default = "default_probe_period")]
    #[schemars(range(min = 1, max = 59))]
    pub probe_period: u32,

    /// Budget between pod creation and container start, e.g. "1m" or "30s".
    /// Must be shorter than probePeriod.
    #[serde(default = "default_probe_threshold")]
    pub probe_threshold: String,

    /// Requested capacity for scratch volumes. Existing volumes keep their size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "field is immutable"}]))]
    pub pvc_capacity: Option<String>,

    /// Skip the provision probe
    #[serde(default)]
    #[schemars(extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "field is immutable"}]))]
    pub disable_provision_probe: bool,

    /// Skip the per-node mount probes
    #[serde(default)]
    #[schemars(extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "field is immutable"}]))]
    pub disable_mount_probes: bool,

    /// Resources for the probe container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ProbeResources>,
}

fn default_probe_period() -> u32 {
    DEFAULT_PROBE_PERIOD
}

fn default_probe_threshold() -> String {
    DEFAULT_PROBE_THRESHOLD.to_string()
}

/// Node selector with Kubernetes `NodeSelector` semantics: terms are ORed,
/// requirements inside a term are ANDed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeNodeSelector {
    #[serde(default)]
    pub node_selector_terms: Vec<ProbeNodeSelectorTerm>,
}

/// One term of a [`ProbeNodeSelector`]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeNodeSelectorTerm {
    /// Requirements on node labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<NodeSelectorRequirement>,

    /// Requirements on node fields (only `metadata.name` is supported)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_fields: Vec<NodeSelectorRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: NodeSelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum NodeSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl NodeSelectorOperator {
    fn as_str(self) -> &'static str {
        match self {
            NodeSelectorOperator::In => "In",
            NodeSelectorOperator::NotIn => "NotIn",
            NodeSelectorOperator::Exists => "Exists",
            NodeSelectorOperator::DoesNotExist => "DoesNotExist",
            NodeSelectorOperator::Gt => "Gt",
            NodeSelectorOperator::Lt => "Lt",
        }
    }
}

impl ProbeNodeSelector {
    /// Kubernetes form, for use in required node affinity.
    /// Returns `None` when there are no terms, since an empty required
    /// selector would match nothing.
    #[must_use]
    pub fn to_node_selector(&self) -> Option<corev1::NodeSelector> {
        if self.node_selector_terms.is_empty() {
            return None;
        }
        let convert = |reqs: &[NodeSelectorRequirement]| {
            (!reqs.is_empty()).then(|| {
                reqs.iter()
                    .map(|r| corev1::NodeSelectorRequirement {
                        key: r.key.clone(),
                        operator: r.operator.as_str().to_string(),
                        values: (!r.values.is_empty()).then(|| r.values.clone()),
                    })
                    .collect()
            })
        };
        Some(corev1::NodeSelector {
            node_selector_terms: self
                .node_selector_terms
                .iter()
                .map(|t| corev1::NodeSelectorTerm {
                    match_expressions: convert(&t.match_expressions),
                    match_fields: convert(&t.match_fields),
                })
                .collect(),
        })
    }
}

/// Requests and limits for the probe container, as Kubernetes quantities.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageProbeStatus {
    /// Storage class recorded on the first successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_storage_class: Option<String>,

    /// Generation of the spec last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reconciliation error, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageProbeSpec {
    /// Parsed probe threshold
    pub fn threshold(&self) -> Result<Duration, CrdError> {
        parse_duration(&self.probe_threshold)
    }

    /// Probe period as a duration
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.probe_period) * 60)
    }

    /// Requested scratch volume capacity, falling back to the default
    #[must_use]
    pub fn pvc_capacity(&self) -> &str {
        self.pvc_capacity.as_deref().unwrap_or(DEFAULT_PVC_CAPACITY)
    }

    /// Admission-style validation, repeated on every reconcile.
    pub fn validate(&self) -> Result<(), CrdError> {
        if self.monitoring_storage_class.is_empty() {
            return Err(CrdError::MissingStorageClass);
        }
        if !(1..=59).contains(&self.probe_period) {
            return Err(CrdError::InvalidPeriod(self.probe_period));
        }
        if self.threshold()? >= self.period() {
            return Err(CrdError::ThresholdNotBelowPeriod {
                threshold: self.probe_threshold.clone(),
                period_minutes: self.probe_period,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(period: u32, threshold: &str) -> StorageProbeSpec {
        StorageProbeSpec {
            monitoring_storage_class: "fast".to_string(),
            node_selector: ProbeNodeSelector::default(),
            probe_period: period,
            probe_threshold: threshold.to_string(),
            pvc_capacity: None,
            disable_provision_probe: false,
            disable_mount_probes: false,
            resources: None,
        }
    }

    #[test]
    fn test_defaults_from_json() {
        let spec: StorageProbeSpec =
            serde_json::from_value(serde_json::json!({ "monitoringStorageClass": "fast" })).unwrap();
        assert_eq!(spec.probe_period, 1);
        assert_eq!(spec.probe_threshold, "1m");
        assert_eq!(spec.pvc_capacity(), "100Mi");
        assert!(spec.node_selector.node_selector_terms.is_empty());
    }

    #[test]
    fn test_validate_threshold_must_be_below_period() {
        assert!(spec(5, "1m").validate().is_ok());
        assert!(spec(2, "1m59s").validate().is_ok());
        assert_eq!(
            spec(1, "1m").validate(),
            Err(CrdError::ThresholdNotBelowPeriod {
                threshold: "1m".to_string(),
                period_minutes: 1,
            })
        );
        assert!(spec(5, "10m").validate().is_err());
    }

    #[test]
    fn test_validate_period_range() {
        assert_eq!(spec(0, "1s").validate(), Err(CrdError::InvalidPeriod(0)));
        assert_eq!(spec(60, "1m").validate(), Err(CrdError::InvalidPeriod(60)));
        assert!(spec(59, "1m").validate().is_ok());
    }

    #[test]
    fn test_validate_bad_threshold() {
        assert!(matches!(
            spec(5, "soon").validate(),
            Err(CrdError::InvalidDuration(..))
        ));
    }

    fn cel_rules(schema: &serde_json::Value) -> Vec<&str> {
        schema["x-kubernetes-validations"]
            .as_array()
            .map(|rules| rules.iter().filter_map(|r| r["rule"].as_str()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_crd_carries_admission_rules() {
        use kube::CustomResourceExt;

        let crd = serde_json::to_value(StorageProbe::crd()).unwrap();
        let spec = crd
            .pointer("/spec/versions/0/schema/openAPIV3Schema/properties/spec")
            .unwrap();
        assert_eq!(
            cel_rules(spec),
            vec!["duration(self.probeThreshold) < duration(string(self.probePeriod) + 'm')"]
        );
        for field in [
            "monitoringStorageClass",
            "pvcCapacity",
            "disableProvisionProbe",
            "disableMountProbes",
        ] {
            assert_eq!(cel_rules(&spec["properties"][field]), vec!["self == oldSelf"], "{field}");
        }
        assert!(cel_rules(&spec["properties"]["probePeriod"]).is_empty());
    }

    #[test]
    fn test_selector_conversion() {
        let selector = ProbeNodeSelector {
            node_selector_terms: vec![ProbeNodeSelectorTerm {
                match_expressions: vec![NodeSelectorRequirement {
                    key: "node-role.kubernetes.io/worker".to_string(),
                    operator: NodeSelectorOperator::Exists,
                    values: vec![],
                }],
                match_fields: vec![],
            }],
        };
        let k8s = selector.to_node_selector().unwrap();
        assert_eq!(k8s.node_selector_terms.len(), 1);
        let term = &k8s.node_selector_terms[0];
        assert!(term.match_fields.is_none());
        let reqs = term.match_expressions.as_ref().unwrap();
        assert_eq!(reqs[0].operator, "Exists");
        assert!(reqs[0].values.is_none());

        assert!(ProbeNodeSelector::default().to_node_selector().is_none());
    }
}
