//! Kubernetes resource watchers.
//!
//! Each watched kind runs its own `kube_runtime::Controller` through the
//! generic `watch_resource()` helper, which wraps the reconcile function with
//! logging and the per-object requeue backoff.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::pods::ProbePodHandler;
use crate::reconciler::Reconciler;
use crds::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, StorageProbe};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff key of one object
fn object_key<K: Resource>(resource_name: &str, obj: &K) -> String {
    format!(
        "{}/{}/{}",
        resource_name,
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Drive `controller` until its stream ends.
///
/// Failures are requeued after the object's next backoff delay; a successful
/// pass resets that delay.
async fn watch_resource<K, Ctx, F>(
    controller: Controller<K>,
    ctx: Arc<Ctx>,
    backoff: Arc<BackoffTracker>,
    reconcile_fn: F,
    config: ControllerConfig,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    Ctx: Send + Sync + 'static,
    F: Fn(Arc<Ctx>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = {
        let backoff = backoff.clone();
        move |obj: Arc<K>, error: &ControllerError, _ctx: Arc<Ctx>| {
            let delay = backoff.next_backoff(&object_key(resource_name, &*obj));
            error!(
                "Reconciliation error for {} {}, retrying in {:?}: {}",
                resource_name,
                obj.name_any(),
                delay,
                error
            );
            Action::requeue(delay)
        }
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Ctx>| {
        let reconcile_fn = reconcile_fn.clone();
        let backoff = backoff.clone();
        async move {
            let key = object_key(resource_name, &*obj);
            debug!("Reconciling {}", key);
            let action = reconcile_fn(ctx, obj).await?;
            backoff.reset(&key);
            Ok::<_, ControllerError>(action)
        }
    };

    controller
        .with_config(config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Label selector for objects created by this controller
fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

/// StorageClasses whose finalizer depends on `probe`: the class it asks for
/// and the one it is bound to, when they differ
fn storage_classes_of(probe: &StorageProbe) -> Vec<ObjectRef<StorageClass>> {
    let mut names = vec![probe.spec.monitoring_storage_class.as_str()];
    if let Some(bound) = probe.status.as_ref().and_then(|s| s.bound_storage_class.as_deref()) {
        if !names.contains(&bound) {
            names.push(bound);
        }
    }
    names
        .into_iter()
        .filter(|name| !name.is_empty())
        .map(ObjectRef::new)
        .collect()
}

/// Watches probe definitions, the cluster objects they depend on and probe pods.
pub struct Watcher {
    client: Client,
    namespace: String,
    reconciler: Arc<Reconciler>,
    pods: Arc<ProbePodHandler>,
    backoff: Arc<BackoffTracker>,
}

impl Watcher {
    pub fn new(client: Client, namespace: String, reconciler: Arc<Reconciler>, pods: Arc<ProbePodHandler>) -> Self {
        Self {
            client,
            namespace,
            reconciler,
            pods,
            backoff: Arc::new(BackoffTracker::default()),
        }
    }

    /// Watches StorageProbes, the CronJobs they own and cluster Nodes.
    ///
    /// Any Node change requeues every StorageProbe, since each one derives
    /// its node-bound probes from the current node set.
    pub async fn watch_storage_probes(&self) -> Result<(), ControllerError> {
        let probes: Api<StorageProbe> = Api::namespaced(self.client.clone(), &self.namespace);
        let cron_jobs: Api<CronJob> = Api::namespaced(self.client.clone(), &self.namespace);
        let nodes: Api<Node> = Api::all(self.client.clone());

        let controller = Controller::new(probes, watcher::Config::default());
        let known_probes = controller.store();
        let controller = controller
            .owns(cron_jobs, watcher::Config::default().labels(&managed_selector()))
            .watches(nodes, watcher::Config::default(), move |_node: Node| {
                known_probes
                    .state()
                    .into_iter()
                    .map(|probe| ObjectRef::from_obj(&*probe))
                    .collect::<Vec<_>>()
            });

        watch_resource(
            controller,
            self.reconciler.clone(),
            self.backoff.clone(),
            |reconciler, probe| Box::pin(async move { reconciler.reconcile_storage_probe(&probe).await }),
            ControllerConfig::default().debounce(Duration::from_secs(2)).concurrency(3),
            "StorageProbe",
        )
        .await
    }

    /// Watches StorageClasses for finalizer bookkeeping and teardown.
    ///
    /// StorageProbe events requeue the classes they reference, so a class
    /// gains its finalizer as soon as a probe starts monitoring it.
    pub async fn watch_storage_classes(&self) -> Result<(), ControllerError> {
        let storage_classes: Api<StorageClass> = Api::all(self.client.clone());
        let probes: Api<StorageProbe> = Api::namespaced(self.client.clone(), &self.namespace);
        let controller = Controller::new(storage_classes, watcher::Config::default()).watches(
            probes,
            watcher::Config::default(),
            |probe: StorageProbe| storage_classes_of(&probe),
        );
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.backoff.clone(),
            |reconciler, sc| Box::pin(async move { reconciler.reconcile_storage_class(&sc).await }),
            ControllerConfig::default().debounce(Duration::from_secs(2)).concurrency(1),
            "StorageClass",
        )
        .await
    }

    /// Watches probe pods and feeds the provisioning observer.
    pub async fn watch_probe_pods(&self) -> Result<(), ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        watch_resource(
            Controller::new(pods, watcher::Config::default().labels(&managed_selector())),
            self.pods.clone(),
            self.backoff.clone(),
            |handler, pod| Box::pin(async move { handler.handle_probe_pod(&pod).await }),
            ControllerConfig::default().concurrency(8),
            "Pod",
        )
        .await
    }
}
