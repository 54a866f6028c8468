//! Test utilities for unit testing the reconciler and the observer
//!
//! This module provides helpers for creating test objects and wiring a
//! reconciler to the in-memory store.

use crate::manifests::{PROBE_CONTAINER_NAME, ProbeTarget};
use crate::reconciler::{Reconciler, ReconcilerSettings};
use chrono::{DateTime, Utc};
use crds::{POD_FINALIZER, ProbeNodeSelector, StorageProbe, StorageProbeSpec};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStatus, Node, Pod, PodSpec, PodStatus,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use probe_store::MockProbeStore;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "probes";

/// Helper to create a StorageProbe with period 5 and threshold 1m
pub fn test_storage_probe(name: &str, storage_class: &str) -> StorageProbe {
    StorageProbe {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: StorageProbeSpec {
            monitoring_storage_class: storage_class.to_string(),
            node_selector: ProbeNodeSelector::default(),
            probe_period: 5,
            probe_threshold: "1m".to_string(),
            pvc_capacity: None,
            disable_provision_probe: false,
            disable_mount_probes: false,
            resources: None,
        },
        status: None,
    }
}

pub fn test_storage_class(name: &str) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        provisioner: "csi.example.com".to_string(),
        ..Default::default()
    }
}

pub fn test_node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn test_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        namespace: TEST_NAMESPACE.to_string(),
        probe_image: "ghcr.io/microscaler/storage-probe:test".to_string(),
        collector_url: "http://storage-probe.probes.svc:8082".to_string(),
    }
}

pub fn test_reconciler(store: &MockProbeStore) -> Reconciler {
    Reconciler::new(Arc::new(store.clone()), test_settings())
}

/// Kubernetes timestamp from an RFC 3339 string
pub fn time(rfc3339: &str) -> Time {
    serde_json::from_value(serde_json::Value::String(rfc3339.to_string())).unwrap()
}

/// Store seeded with a probe `group` on storage class `fast` and the given nodes
pub fn seeded_store(group: &str, nodes: &[&str]) -> MockProbeStore {
    let store = MockProbeStore::new();
    store.add_storage_class(test_storage_class("fast"));
    store.add_storage_probe(test_storage_probe(group, "fast"));
    for node in nodes {
        store.add_node(test_node(node, &[]));
    }
    store
}

/// chrono instant from an RFC 3339 string
pub fn instant(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

/// Add a probe Job to the store and return its uid
pub fn add_probe_job(store: &MockProbeStore, name: &str) -> String {
    store.add_job(Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    store.job(TEST_NAMESPACE, name).unwrap().metadata.uid.unwrap()
}

/// Probe pod for `target` created at `created`, owned by `job` (name, uid)
pub fn probe_pod(name: &str, target: &ProbeTarget, created: &str, job: Option<(&str, &str)>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(target.labels()),
            finalizers: Some(vec![POD_FINALIZER.to_string()]),
            creation_timestamp: Some(time(created)),
            owner_references: job.map(|(job, uid)| {
                vec![OwnerReference {
                    api_version: "batch/v1".to_string(),
                    kind: "Job".to_string(),
                    name: job.to_string(),
                    uid: uid.to_string(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]
            }),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: target.node.clone(),
            containers: vec![Container {
                name: PROBE_CONTAINER_NAME.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

/// Mark the probe container of `pod` as running since `at`
pub fn set_started(pod: &mut Pod, at: &str) {
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            name: PROBE_CONTAINER_NAME.to_string(),
            state: Some(ContainerState {
                running: Some(ContainerStateRunning {
                    started_at: Some(time(at)),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    });
}
