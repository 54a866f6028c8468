//! Reconciler for StorageProbes and the StorageClasses they monitor.
//!
//! Drives the store toward the desired set of probe CronJobs and scratch
//! PVCs. Store failures are returned unmodified; retrying is left to the
//! watcher's requeue policy.

mod storage_class;
mod storage_probe;

#[cfg(test)]
mod storage_class_test;

use crate::error::ControllerError;
use crds::{StorageProbe, StorageProbeStatus};
use probe_store::ProbeStore;
use std::sync::Arc;
use tracing::debug;

/// Controller-wide settings the reconciler stamps into generated objects
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub namespace: String,
    pub probe_image: String,
    pub collector_url: String,
}

/// Reconciles StorageProbe and StorageClass resources.
pub struct Reconciler {
    store: Arc<dyn ProbeStore>,
    settings: ReconcilerSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn ProbeStore>, settings: ReconcilerSettings) -> Self {
        Self { store, settings }
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    /// Patch status only when it differs from what the object already has
    async fn update_status(&self, probe: &StorageProbe, status: StorageProbeStatus) -> Result<(), ControllerError> {
        if probe.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let name = probe
            .metadata
            .name
            .as_deref()
            .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;
        debug!("Updating status of StorageProbe {}/{}", self.namespace(), name);
        self.store
            .patch_storage_probe_status(self.namespace(), name, &status)
            .await?;
        Ok(())
    }
}
