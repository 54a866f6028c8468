//! `ProbeStore` trait
//!
//! Abstracts the Kubernetes API so the reconciler and the observer can be
//! driven by an in-memory implementation in unit tests.

use crate::error::StoreError;
use crds::{StorageProbe, StorageProbeStatus};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;

/// Preconditions attached to a delete so that a replacement object created
/// after a stale read is never removed by mistake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteGuard {
    /// Expected `metadata.uid`
    pub uid: Option<String>,
    /// Expected `metadata.resourceVersion`
    pub resource_version: Option<String>,
}

impl DeleteGuard {
    /// Guard built from the metadata of an object that was just read
    #[must_use]
    pub fn from_meta(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Self {
        Self {
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
        }
    }

    /// Guard that only pins the uid, e.g. for an owner reference
    #[must_use]
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            resource_version: None,
        }
    }
}

/// Render an equality label selector (`k1=v1,k2=v2`)
#[must_use]
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Kubernetes operations used by the storage probe controller.
///
/// Gets return [`StoreError::NotFound`] for missing objects. Deletes treat a
/// missing object as success and return `Ok(())`.
#[async_trait::async_trait]
pub trait ProbeStore: Send + Sync {
    // StorageProbe
    async fn get_storage_probe(&self, namespace: &str, name: &str) -> Result<StorageProbe, StoreError>;
    async fn list_storage_probes(&self, namespace: &str) -> Result<Vec<StorageProbe>, StoreError>;
    async fn patch_storage_probe_status(&self, namespace: &str, name: &str, status: &StorageProbeStatus) -> Result<(), StoreError>;

    // Cluster-scoped topology
    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, StoreError>;
    async fn replace_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass, StoreError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    // Generated objects
    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, StoreError>;
    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError>;
    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError>;
    async fn list_cron_jobs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<CronJob>, StoreError>;
    async fn delete_cron_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim, StoreError>;
    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError>;
    async fn replace_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError>;
    async fn list_pvcs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<PersistentVolumeClaim>, StoreError>;
    async fn delete_pvc(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError>;

    // Probe workloads
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;
    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError>;
    /// Deletes a Job with background propagation so its pods go with it
    async fn delete_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError>;
}
