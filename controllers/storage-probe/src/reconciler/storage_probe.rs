//! StorageProbe reconciliation: provision job, per-node mount probes, pruning.

use super::Reconciler;
use crate::error::ControllerError;
use crate::manifests::{
    ProbeTarget, ProbeTemplate, group_selector, mutate_cron_job, mutate_pvc, new_meta,
};
use crate::topology::topology_snapshot;
use crds::{KIND_LABEL, NODE_LABEL, ProbeKind, StorageProbe};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::Resource;
use kube_runtime::controller::Action;
use probe_store::DeleteGuard;
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodic resync, on top of watch events
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);
/// Retry interval while the monitored storage class is missing or going away
const STORAGE_CLASS_WAIT: Duration = Duration::from_secs(60);

impl Reconciler {
    /// Reconcile one StorageProbe.
    ///
    /// Deletion needs no work here: every generated object carries a
    /// controller reference to the probe and is garbage collected with it.
    pub async fn reconcile_storage_probe(&self, probe: &StorageProbe) -> Result<Action, ControllerError> {
        let name = probe
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey("metadata.name"))?;
        let key = format!("{}/{}", self.namespace(), name);

        if probe.metadata.deletion_timestamp.is_some() {
            debug!("StorageProbe {} is being deleted, leaving cleanup to owner references", key);
            return Ok(Action::await_change());
        }

        let storage_class = probe.spec.monitoring_storage_class.clone();
        let mut status = probe.status.clone().unwrap_or_default();

        if let Err(e) = self.validate(probe, &key) {
            status.error = Some(e.to_string());
            self.update_status(probe, status).await?;
            return Err(e);
        }

        match self.store.get_storage_class(&storage_class).await {
            Ok(sc) if sc.metadata.deletion_timestamp.is_some() => {
                info!("StorageClass {} is being deleted, not probing it for {}", storage_class, key);
                return Ok(Action::requeue(STORAGE_CLASS_WAIT));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!("StorageClass {} for {} does not exist yet", storage_class, key);
                return Ok(Action::requeue(STORAGE_CLASS_WAIT));
            }
            Err(e) => return Err(e.into()),
        }

        let owner = probe
            .controller_owner_ref(&())
            .ok_or(ControllerError::MissingObjectKey("metadata.uid"))?;
        let period = NonZeroU32::new(probe.spec.probe_period)
            .ok_or_else(|| ControllerError::Validation {
                name: key.clone(),
                reason: "probePeriod must not be zero".to_string(),
            })?;
        let template = ProbeTemplate {
            image: &self.settings.probe_image,
            collector_url: &self.settings.collector_url,
            period,
            pvc_capacity: probe.spec.pvc_capacity(),
            node_selector: probe.spec.node_selector.to_node_selector(),
            resources: probe.spec.resources.as_ref(),
            owner,
        };

        if !probe.spec.disable_provision_probe {
            self.reconcile_provision_job(&ProbeTarget::provision(&name, &storage_class), &template)
                .await?;
        }

        let topology = if probe.spec.disable_mount_probes {
            BTreeSet::new()
        } else {
            let nodes = self.store.list_nodes().await?;
            topology_snapshot(&probe.spec.node_selector, &nodes)
        };
        for node in &topology {
            self.reconcile_node_bound_probe(&ProbeTarget::mount(&name, &storage_class, node), &template)
                .await?;
        }

        self.prune_stale_node_bound(&name, &topology, !probe.spec.disable_provision_probe)
            .await?;

        status.bound_storage_class = Some(storage_class);
        status.observed_generation = probe.metadata.generation;
        status.error = None;
        self.update_status(probe, status).await?;

        debug!("Reconciled StorageProbe {} across {} node(s)", key, topology.len());
        Ok(Action::requeue(RESYNC_INTERVAL))
    }

    fn validate(&self, probe: &StorageProbe, key: &str) -> Result<(), ControllerError> {
        probe
            .spec
            .validate()
            .map_err(|e| ControllerError::validation(key, &e))?;

        let bound = probe.status.as_ref().and_then(|s| s.bound_storage_class.as_deref());
        if let Some(bound) = bound {
            if bound != probe.spec.monitoring_storage_class {
                return Err(ControllerError::Validation {
                    name: key.to_string(),
                    reason: format!(
                        "monitoringStorageClass is immutable: bound to {bound:?}, spec asks for {:?}",
                        probe.spec.monitoring_storage_class
                    ),
                });
            }
        }
        Ok(())
    }

    /// Create or update the group's provision probe CronJob
    pub async fn reconcile_provision_job(
        &self,
        target: &ProbeTarget,
        template: &ProbeTemplate<'_>,
    ) -> Result<(), ControllerError> {
        self.apply_cron_job(target, template).await
    }

    /// Create or update the scratch PVC and mount probe CronJob for one node
    pub async fn reconcile_node_bound_probe(
        &self,
        target: &ProbeTarget,
        template: &ProbeTemplate<'_>,
    ) -> Result<(), ControllerError> {
        self.apply_pvc(target, template).await?;
        self.apply_cron_job(target, template).await
    }

    /// Delete mount probe CronJobs and PVCs for nodes outside `topology`, and
    /// the provision CronJob when it is no longer wanted.
    ///
    /// Deletes are conditioned on the uid and resourceVersion just listed.
    pub async fn prune_stale_node_bound(
        &self,
        group: &str,
        topology: &BTreeSet<String>,
        keep_provision: bool,
    ) -> Result<(), ControllerError> {
        let ns = self.namespace();
        let selector = group_selector(group);

        for cron_job in self.store.list_cron_jobs(ns, &selector).await? {
            let labels = cron_job.metadata.labels.clone().unwrap_or_default();
            let stale = match labels.get(KIND_LABEL).and_then(|k| ProbeKind::from_label(k)) {
                Some(ProbeKind::Provision) => !keep_provision,
                Some(ProbeKind::Mount) => labels.get(NODE_LABEL).is_none_or(|node| !topology.contains(node)),
                None => false,
            };
            if stale {
                let name = cron_job.metadata.name.clone().unwrap_or_default();
                info!("Deleting stale probe CronJob {}/{}", ns, name);
                self.store
                    .delete_cron_job(ns, &name, &DeleteGuard::from_meta(&cron_job.metadata))
                    .await?;
            }
        }

        for pvc in self.store.list_pvcs(ns, &selector).await? {
            let node = pvc.metadata.labels.as_ref().and_then(|l| l.get(NODE_LABEL));
            if node.is_none_or(|node| !topology.contains(node)) {
                let name = pvc.metadata.name.clone().unwrap_or_default();
                info!("Deleting stale scratch PVC {}/{}", ns, name);
                self.store
                    .delete_pvc(ns, &name, &DeleteGuard::from_meta(&pvc.metadata))
                    .await?;
            }
        }

        Ok(())
    }

    async fn apply_cron_job(&self, target: &ProbeTarget, template: &ProbeTemplate<'_>) -> Result<(), ControllerError> {
        let ns = self.namespace();
        let name = target.cron_job_name();

        match self.store.get_cron_job(ns, &name).await {
            Ok(existing) => {
                let mut desired = existing.clone();
                mutate_cron_job(&mut desired, target, template);
                if desired == existing {
                    debug!("CronJob {}/{} is up to date", ns, name);
                    return Ok(());
                }
                info!("Updating {} probe CronJob {}/{}", target.kind(), ns, name);
                self.store.replace_cron_job(ns, &desired).await?;
            }
            Err(e) if e.is_not_found() => {
                let mut cron_job = CronJob {
                    metadata: new_meta(name.clone(), ns),
                    ..Default::default()
                };
                mutate_cron_job(&mut cron_job, target, template);
                info!("Creating {} probe CronJob {}/{}", target.kind(), ns, name);
                self.store.create_cron_job(ns, &cron_job).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn apply_pvc(&self, target: &ProbeTarget, template: &ProbeTemplate<'_>) -> Result<(), ControllerError> {
        let ns = self.namespace();
        let Some(name) = target.pvc_name() else {
            return Ok(());
        };

        match self.store.get_pvc(ns, &name).await {
            Ok(existing) => {
                if existing.metadata.deletion_timestamp.is_some() {
                    warn!("Scratch PVC {}/{} is terminating, will recreate later", ns, name);
                    return Ok(());
                }
                let mut desired = existing.clone();
                mutate_pvc(&mut desired, target, template, false);
                if desired != existing {
                    info!("Updating scratch PVC {}/{}", ns, name);
                    self.store.replace_pvc(ns, &desired).await?;
                }
            }
            Err(e) if e.is_not_found() => {
                let mut pvc = PersistentVolumeClaim {
                    metadata: new_meta(name.clone(), ns),
                    ..Default::default()
                };
                mutate_pvc(&mut pvc, target, template, true);
                info!("Creating scratch PVC {}/{}", ns, name);
                self.store.create_pvc(ns, &pvc).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
