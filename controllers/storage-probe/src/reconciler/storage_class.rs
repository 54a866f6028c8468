//! StorageClass finalizer handling.
//!
//! Every storage class referenced by a StorageProbe carries a finalizer, so
//! probe CronJobs and scratch PVCs can be removed before the class goes away.

use super::Reconciler;
use crate::error::ControllerError;
use crate::manifests::storage_class_selector;
use crds::STORAGE_CLASS_FINALIZER;
use k8s_openapi::api::storage::v1::StorageClass;
use kube_runtime::controller::Action;
use probe_store::DeleteGuard;
use tracing::{debug, info};

fn has_finalizer(sc: &StorageClass) -> bool {
    sc.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == STORAGE_CLASS_FINALIZER))
}

impl Reconciler {
    pub async fn reconcile_storage_class(&self, sc: &StorageClass) -> Result<Action, ControllerError> {
        let name = sc
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;

        if sc.metadata.deletion_timestamp.is_some() {
            if has_finalizer(sc) {
                self.delete_probes_for_storage_class(&name).await?;
                self.set_finalizer(sc, false).await?;
                info!("Released StorageClass {}", name);
            }
            return Ok(Action::await_change());
        }

        let monitored = self
            .store
            .list_storage_probes(self.namespace())
            .await?
            .iter()
            .any(|p| p.metadata.deletion_timestamp.is_none() && p.spec.monitoring_storage_class == name);

        match (monitored, has_finalizer(sc)) {
            (true, false) => {
                info!("Adding finalizer to monitored StorageClass {}", name);
                self.set_finalizer(sc, true).await?;
            }
            (false, true) => {
                info!("Removing finalizer from unmonitored StorageClass {}", name);
                self.set_finalizer(sc, false).await?;
            }
            _ => debug!("StorageClass {} needs no change", name),
        }
        Ok(Action::await_change())
    }

    async fn delete_probes_for_storage_class(&self, storage_class: &str) -> Result<(), ControllerError> {
        let ns = self.namespace();
        let selector = storage_class_selector(storage_class);

        for cron_job in self.store.list_cron_jobs(ns, &selector).await? {
            let name = cron_job.metadata.name.clone().unwrap_or_default();
            info!("Deleting CronJob {}/{} of StorageClass {}", ns, name, storage_class);
            self.store
                .delete_cron_job(ns, &name, &DeleteGuard::from_meta(&cron_job.metadata))
                .await?;
        }
        for pvc in self.store.list_pvcs(ns, &selector).await? {
            let name = pvc.metadata.name.clone().unwrap_or_default();
            info!("Deleting scratch PVC {}/{} of StorageClass {}", ns, name, storage_class);
            self.store
                .delete_pvc(ns, &name, &DeleteGuard::from_meta(&pvc.metadata))
                .await?;
        }
        Ok(())
    }

    async fn set_finalizer(&self, sc: &StorageClass, present: bool) -> Result<(), ControllerError> {
        let mut updated = sc.clone();
        let finalizers = updated.metadata.finalizers.get_or_insert_with(Vec::new);
        finalizers.retain(|f| f != STORAGE_CLASS_FINALIZER);
        if present {
            finalizers.push(STORAGE_CLASS_FINALIZER.to_string());
        }
        self.store.replace_storage_class(&updated).await?;
        Ok(())
    }
}
