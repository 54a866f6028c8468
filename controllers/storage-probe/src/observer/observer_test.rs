//! Unit tests for the provisioning observer

#[cfg(test)]
mod tests {
    use crate::manifests::ProbeTarget;
    use crate::observer::{AttemptKey, ManualClock, ProvisionObserver, Registration};
    use crate::test_utils::*;
    use crds::ProbeKind;
    use probe_metrics::{RecordedMetric, RecordingMetrics};
    use probe_store::MockProbeStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const T0: &str = "2026-03-01T10:00:00Z";
    const THRESHOLD: Duration = Duration::from_secs(60);

    struct Fixture {
        store: MockProbeStore,
        metrics: RecordingMetrics,
        clock: Arc<ManualClock>,
        observer: Arc<ProvisionObserver>,
        listener: Option<crate::observer::FlushListener>,
    }

    fn fixture() -> Fixture {
        let store = MockProbeStore::new();
        let metrics = RecordingMetrics::new();
        let clock = Arc::new(ManualClock::new(instant(T0)));
        let (observer, listener) =
            ProvisionObserver::new(Arc::new(store.clone()), Arc::new(metrics.clone()), clock.clone());
        Fixture {
            store,
            metrics,
            clock,
            observer: Arc::new(observer),
            listener: Some(listener),
        }
    }

    impl Fixture {
        /// Store a provision probe pod owned by a Job and register it at `T0`
        fn track_provision(&self, pod: &str) -> AttemptKey {
            let job = format!("{pod}-job");
            let uid = add_probe_job(&self.store, &job);
            let target = ProbeTarget::provision("nightly", "fast");
            self.store
                .add_pod(probe_pod(pod, &target, T0, Some((&job, &uid))));
            let key = AttemptKey::new(TEST_NAMESPACE, pod);
            self.observer.register(key.clone(), registration(ProbeKind::Provision, T0));
            key
        }

        fn spawn_loop(&mut self, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
            let observer = self.observer.clone();
            let listener = self.listener.take().unwrap();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                observer.run(listener, Duration::from_secs(3600), cancel).await;
            })
        }

        fn job_deletes(&self) -> Vec<String> {
            self.store
                .writes()
                .into_iter()
                .filter(|w| w.starts_with("delete_job"))
                .collect()
        }
    }

    fn registration(kind: ProbeKind, at: &str) -> Registration {
        Registration {
            registered_at: instant(at),
            threshold: THRESHOLD,
            group: "nightly".to_string(),
            kind,
        }
    }

    fn provision(on_time: bool) -> RecordedMetric {
        RecordedMetric::Provision {
            group: "nightly".to_string(),
            storage_class: "fast".to_string(),
            on_time,
        }
    }

    #[tokio::test]
    async fn test_started_within_threshold_is_on_time_once() {
        let f = fixture();
        let key = f.track_provision("p1");
        f.observer
            .record_started(&key, instant("2026-03-01T10:00:10Z"));
        f.clock.advance(Duration::from_secs(11));

        assert_eq!(f.observer.check_pending().await, 1);
        assert_eq!(f.observer.check_pending().await, 0);
        f.clock.advance(Duration::from_secs(120));
        assert_eq!(f.observer.check_pending().await, 0);

        assert_eq!(f.metrics.classifications(), vec![provision(true)]);
        assert!(f.job_deletes().is_empty());
    }

    #[tokio::test]
    async fn test_never_started_is_late_after_threshold() {
        let f = fixture();
        f.track_provision("p1");

        f.clock.advance(Duration::from_secs(59));
        assert_eq!(f.observer.check_pending().await, 0);
        assert!(f.metrics.classifications().is_empty());

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.observer.check_pending().await, 1);
        assert_eq!(f.observer.check_pending().await, 0);

        assert_eq!(f.metrics.classifications(), vec![provision(false)]);
        assert_eq!(f.job_deletes(), vec![format!("delete_job {TEST_NAMESPACE}/p1-job")]);
        assert!(f.store.job(TEST_NAMESPACE, "p1-job").is_none());
    }

    #[tokio::test]
    async fn test_started_after_threshold_is_late() {
        let f = fixture();
        let key = f.track_provision("p1");
        f.observer
            .record_started(&key, instant("2026-03-01T10:01:00Z"));

        assert_eq!(f.observer.check_pending().await, 1);
        assert_eq!(f.metrics.classifications(), vec![provision(false)]);
        assert_eq!(f.job_deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_earliest_registration_wins() {
        let f = fixture();
        let key = AttemptKey::new(TEST_NAMESPACE, "p1");
        f.store.add_pod(probe_pod("p1", &ProbeTarget::provision("nightly", "fast"), T0, None));
        f.observer
            .register(key.clone(), registration(ProbeKind::Provision, "2026-03-01T10:00:10Z"));
        f.observer.register(key.clone(), registration(ProbeKind::Provision, T0));
        f.observer
            .register(key.clone(), registration(ProbeKind::Provision, "2026-03-01T10:00:20Z"));
        f.observer
            .record_started(&key, instant("2026-03-01T10:01:05Z"));

        f.observer.check_pending().await;
        assert_eq!(f.metrics.classifications(), vec![provision(false)]);
    }

    #[tokio::test]
    async fn test_first_start_time_is_kept() {
        let f = fixture();
        let key = f.track_provision("p1");
        f.observer
            .record_started(&key, instant("2026-03-01T10:00:05Z"));
        f.observer
            .record_started(&key, instant("2026-03-01T10:05:00Z"));

        f.observer.check_pending().await;
        assert_eq!(f.metrics.classifications(), vec![provision(true)]);
    }

    #[tokio::test]
    async fn test_mount_probe_reports_node() {
        let f = fixture();
        let target = ProbeTarget::mount("nightly", "fast", "worker-1");
        f.store.add_pod(probe_pod("m1", &target, T0, None));
        let key = AttemptKey::new(TEST_NAMESPACE, "m1");
        f.observer.register(key.clone(), registration(ProbeKind::Mount, T0));
        f.observer
            .record_started(&key, instant("2026-03-01T10:00:02Z"));

        f.observer.check_pending().await;
        assert_eq!(
            f.metrics.classifications(),
            vec![RecordedMetric::Mount {
                group: "nightly".to_string(),
                node: "worker-1".to_string(),
                storage_class: "fast".to_string(),
                on_time: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_flush_before_threshold_is_not_counted() {
        let mut f = fixture();
        let cancel = CancellationToken::new();
        let handle = f.spawn_loop(&cancel);
        let key = f.track_provision("p1");
        f.clock.advance(Duration::from_secs(5));

        f.observer.flush(&key).await;
        f.observer.forget(&key);

        assert!(!f.observer.is_tracked(&key));
        assert!(f.metrics.classifications().is_empty());
        assert!(f.job_deletes().is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_classifies_before_forgetting() {
        let mut f = fixture();
        let cancel = CancellationToken::new();
        let key = f.track_provision("p1");
        f.observer
            .record_started(&key, instant("2026-03-01T10:01:10Z"));
        let handle = f.spawn_loop(&cancel);

        f.observer.flush(&key).await;
        f.observer.forget(&key);

        assert!(!f.observer.is_tracked(&key));
        assert_eq!(f.metrics.classifications(), vec![provision(false)]);
        assert_eq!(f.job_deletes().len(), 1);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flushed_attempt_is_not_counted_again() {
        let mut f = fixture();
        let cancel = CancellationToken::new();
        let key = f.track_provision("p1");
        f.observer
            .record_started(&key, instant("2026-03-01T10:00:04Z"));
        let handle = f.spawn_loop(&cancel);

        f.observer.flush(&key).await;
        assert!(f.observer.is_tracked(&key));
        f.observer.flush(&key).await;

        assert_eq!(f.metrics.classifications(), vec![provision(true)]);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_forget_after_shutdown_does_not_hang() {
        let mut f = fixture();
        let cancel = CancellationToken::new();
        let handle = f.spawn_loop(&cancel);
        cancel.cancel();
        handle.await.unwrap();

        let key = f.track_provision("p1");
        tokio::time::timeout(Duration::from_secs(5), f.observer.flush(&key))
            .await
            .unwrap();
        f.observer.forget(&key);
        assert!(!f.observer.is_tracked(&key));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_retried_next_pass() {
        let f = fixture();
        let key = f.track_provision("p1");
        f.clock.advance(THRESHOLD);
        f.store.fail_on("get_pod");

        assert_eq!(f.observer.check_pending().await, 0);
        assert!(f.observer.is_tracked(&key));

        f.store.clear_failure("get_pod");
        assert_eq!(f.observer.check_pending().await, 1);
    }

    #[tokio::test]
    async fn test_vanished_pod_is_dropped() {
        let f = fixture();
        let key = AttemptKey::new(TEST_NAMESPACE, "ghost");
        f.observer.register(key.clone(), registration(ProbeKind::Provision, T0));
        f.clock.advance(THRESHOLD);

        assert_eq!(f.observer.check_pending().await, 0);
        assert!(!f.observer.is_tracked(&key));
        assert!(f.metrics.classifications().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_block_other_attempts() {
        let f = fixture();
        f.track_provision("p1");
        f.track_provision("p2");
        f.clock.advance(THRESHOLD);
        f.store.fail_on("delete_job");

        assert_eq!(f.observer.check_pending().await, 2);
        assert_eq!(f.metrics.classifications(), vec![provision(false), provision(false)]);
        assert!(f.store.job(TEST_NAMESPACE, "p1-job").is_some());
        assert_eq!(f.observer.check_pending().await, 0);
    }
}
