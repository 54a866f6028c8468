//! Main controller implementation.
//!
//! Wires the store, metrics, reconciler and provisioning observer together,
//! then runs the watchers, the observer loop and the collector endpoint
//! until one of them exits or the process is interrupted.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::observer::{ProvisionObserver, SystemClock};
use crate::pods::ProbePodHandler;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::watcher::Watcher;
use kube::Client;
use probe_metrics::{CollectorState, MetricsError, PrometheusMetrics};
use probe_store::{KubeProbeStore, ProbeStore};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main controller for storage probes.
pub struct Controller {
    storage_probe_watcher: JoinHandle<Result<(), ControllerError>>,
    storage_class_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_pod_watcher: JoinHandle<Result<(), ControllerError>>,
    observer: JoinHandle<()>,
    collector: JoinHandle<Result<(), MetricsError>>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing storage probe controller");

        let client = Client::try_default().await?;
        let store: Arc<dyn ProbeStore> = Arc::new(KubeProbeStore::new(client.clone()));

        let registry = Registry::new();
        let metrics = Arc::new(PrometheusMetrics::new(&registry)?);

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            ReconcilerSettings {
                namespace: config.namespace.clone(),
                probe_image: config.probe_image.clone(),
                collector_url: config.collector_url.clone(),
            },
        ));

        let (observer, listener) = ProvisionObserver::new(store.clone(), metrics.clone(), Arc::new(SystemClock));
        let observer = Arc::new(observer);
        let pods = Arc::new(ProbePodHandler::new(store, observer.clone()));
        let shutdown = CancellationToken::new();

        let watcher = Arc::new(Watcher::new(client, config.namespace.clone(), reconciler, pods));

        let storage_probe_watcher = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.watch_storage_probes().await }
        });
        let storage_class_watcher = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.watch_storage_classes().await }
        });
        let probe_pod_watcher = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.watch_probe_pods().await }
        });

        let observer_task = tokio::spawn({
            let shutdown = shutdown.clone();
            let tick = config.observer_tick;
            async move { observer.run(listener, tick, shutdown).await }
        });

        let collector = tokio::spawn(probe_metrics::serve(
            config.collector_bind_addr,
            CollectorState::new(metrics, registry),
            shutdown.clone(),
        ));

        Ok(Self {
            storage_probe_watcher,
            storage_class_watcher,
            probe_pod_watcher,
            observer: observer_task,
            collector,
            shutdown,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Storage probe controller running");

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                Ok(())
            }
            result = &mut self.storage_probe_watcher => watcher_exit("StorageProbe", result),
            result = &mut self.storage_class_watcher => watcher_exit("StorageClass", result),
            result = &mut self.probe_pod_watcher => watcher_exit("Pod", result),
            result = &mut self.observer => result
                .map_err(|e| ControllerError::Watch(format!("Provisioning observer panicked: {e}"))),
            result = &mut self.collector => match result {
                Ok(served) => served.map_err(ControllerError::from),
                Err(e) => Err(ControllerError::Watch(format!("Collector panicked: {e}"))),
            },
        };

        self.shutdown.cancel();
        self.storage_probe_watcher.abort();
        self.storage_class_watcher.abort();
        self.probe_pod_watcher.abort();
        result
    }
}

fn watcher_exit(
    resource_name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{resource_name} watcher panicked: {e}")))?
        .map_err(|e| ControllerError::Watch(format!("{resource_name} watcher error: {e}")))?;
    Err(ControllerError::Watch(format!("{resource_name} watcher exited")))
}
