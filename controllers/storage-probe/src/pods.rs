//! Probe pod events feeding the provisioning observer.
//!
//! Probe pods carry a finalizer, so their deletion is always seen here and
//! goes through the observer's flush before the pod is released.

use crate::error::ControllerError;
use crate::manifests::PROBE_CONTAINER_NAME;
use crate::observer::{AttemptKey, ProvisionObserver, Registration};
use chrono::{DateTime, Utc};
use crds::{GROUP_LABEL, KIND_LABEL, POD_FINALIZER, ProbeKind};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube_runtime::controller::Action;
use probe_store::ProbeStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Convert a Kubernetes timestamp through its RFC 3339 wire form
fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    serde_json::to_value(time)
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn has_finalizer(pod: &Pod) -> bool {
    pod.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == POD_FINALIZER))
}

/// `startedAt` of the probe container, whether still running or already done
fn probe_started_at(pod: &Pod) -> Option<DateTime<Utc>> {
    let status = pod
        .status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|s| s.name == PROBE_CONTAINER_NAME)?;
    let state = status.state.as_ref()?;
    let started = state
        .running
        .as_ref()
        .and_then(|r| r.started_at.as_ref())
        .or_else(|| state.terminated.as_ref().and_then(|t| t.started_at.as_ref()))?;
    to_utc(started)
}

pub struct ProbePodHandler {
    store: Arc<dyn ProbeStore>,
    observer: Arc<ProvisionObserver>,
}

impl std::fmt::Debug for ProbePodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbePodHandler")
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}

impl ProbePodHandler {
    pub fn new(store: Arc<dyn ProbeStore>, observer: Arc<ProvisionObserver>) -> Self {
        Self { store, observer }
    }

    /// Register, update or release one probe pod
    pub async fn handle_probe_pod(&self, pod: &Pod) -> Result<Action, ControllerError> {
        if !has_finalizer(pod) {
            return Ok(Action::await_change());
        }
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
        let key = AttemptKey::new(namespace.clone(), name);
        let deleting = pod.metadata.deletion_timestamp.is_some();

        if !self.observer.is_tracked(&key) {
            self.register(&key, pod).await?;
        }
        if let Some(started_at) = probe_started_at(pod) {
            self.observer.record_started(&key, started_at);
        }

        if deleting {
            self.observer.flush(&key).await;
            self.release(&namespace, pod).await?;
            self.observer.forget(&key);
        }
        Ok(Action::await_change())
    }

    async fn register(&self, key: &AttemptKey, pod: &Pod) -> Result<(), ControllerError> {
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let (Some(group), Some(kind)) = (
            labels.get(GROUP_LABEL),
            labels.get(KIND_LABEL).and_then(|k| ProbeKind::from_label(k)),
        ) else {
            warn!("Probe pod {} lacks group or kind labels, not tracking it", key);
            return Ok(());
        };
        let Some(registered_at) = pod.metadata.creation_timestamp.as_ref().and_then(to_utc) else {
            warn!("Probe pod {} has no creation timestamp, not tracking it", key);
            return Ok(());
        };

        let probe = match self.store.get_storage_probe(&key.namespace, group).await {
            Ok(probe) => probe,
            Err(e) if e.is_not_found() => {
                debug!("StorageProbe {}/{} of pod {} is gone, not tracking it", key.namespace, group, key);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let threshold = probe
            .spec
            .threshold()
            .map_err(|e| ControllerError::validation(format!("{}/{}", key.namespace, group), &e))?;

        self.observer.register(
            key.clone(),
            Registration {
                registered_at,
                threshold,
                group: group.clone(),
                kind,
            },
        );
        Ok(())
    }

    async fn release(&self, namespace: &str, pod: &Pod) -> Result<(), ControllerError> {
        let mut released = pod.clone();
        if let Some(finalizers) = released.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != POD_FINALIZER);
        }
        match self.store.replace_pod(namespace, &released).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
