//! Unit tests for the StorageClass finalizer reconciler

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use crds::STORAGE_CLASS_FINALIZER;
    use k8s_openapi::api::storage::v1::StorageClass;
    use probe_store::MockProbeStore;

    fn finalizers(store: &MockProbeStore, name: &str) -> Vec<String> {
        store
            .storage_class(name)
            .and_then(|sc| sc.metadata.finalizers)
            .unwrap_or_default()
    }

    fn current(store: &MockProbeStore, name: &str) -> StorageClass {
        store.storage_class(name).unwrap()
    }

    #[tokio::test]
    async fn test_monitored_class_gets_finalizer() {
        let store = seeded_store("nightly", &[]);
        let reconciler = test_reconciler(&store);

        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert_eq!(finalizers(&store, "fast"), vec![STORAGE_CLASS_FINALIZER.to_string()]);

        store.clear_writes();
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unmonitored_class_loses_finalizer() {
        let store = MockProbeStore::new();
        let mut sc = test_storage_class("slow");
        sc.metadata.finalizers = Some(vec![STORAGE_CLASS_FINALIZER.to_string(), "other/keep".to_string()]);
        store.add_storage_class(sc);
        let reconciler = test_reconciler(&store);

        reconciler
            .reconcile_storage_class(&current(&store, "slow"))
            .await
            .unwrap();
        assert_eq!(finalizers(&store, "slow"), vec!["other/keep".to_string()]);
    }

    #[tokio::test]
    async fn test_class_without_probes_is_untouched() {
        let store = MockProbeStore::new();
        store.add_storage_class(test_storage_class("slow"));
        let reconciler = test_reconciler(&store);

        reconciler
            .reconcile_storage_class(&current(&store, "slow"))
            .await
            .unwrap();
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_class_gains_finalizer_when_probe_appears() {
        let store = MockProbeStore::new();
        store.add_storage_class(test_storage_class("fast"));
        let reconciler = test_reconciler(&store);
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert!(finalizers(&store, "fast").is_empty());

        store.add_storage_probe(test_storage_probe("nightly", "fast"));
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert_eq!(finalizers(&store, "fast"), vec![STORAGE_CLASS_FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_deleting_probe_does_not_hold_class() {
        let store = seeded_store("nightly", &[]);
        let reconciler = test_reconciler(&store);
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();

        store.update_storage_probe(TEST_NAMESPACE, "nightly", |p| {
            p.metadata.deletion_timestamp = Some(time("2026-01-01T00:00:00Z"));
        });
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert!(finalizers(&store, "fast").is_empty());
    }

    #[tokio::test]
    async fn test_class_deletion_removes_probe_objects() {
        let store = seeded_store("nightly", &["worker-1"]);
        store.add_storage_class(test_storage_class("slow"));
        store.add_storage_probe(test_storage_probe("archive", "slow"));
        let reconciler = test_reconciler(&store);
        for group in ["nightly", "archive"] {
            let probe = store.storage_probe(TEST_NAMESPACE, group).unwrap();
            reconciler.reconcile_storage_probe(&probe).await.unwrap();
        }
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();
        assert_eq!(store.cron_jobs().len(), 4);

        store.update_storage_class("fast", |sc| {
            sc.metadata.deletion_timestamp = Some(time("2026-01-01T00:00:00Z"));
        });
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();

        assert!(store.storage_class("fast").is_none());
        let remaining: Vec<String> = store
            .cron_jobs()
            .into_iter()
            .flat_map(|cj| cj.metadata.labels.unwrap_or_default().into_values())
            .filter(|v| v == "fast")
            .collect();
        assert!(remaining.is_empty());
        assert_eq!(store.cron_jobs().len(), 2);
        assert_eq!(store.pvcs().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_finalizer() {
        let store = seeded_store("nightly", &["worker-1"]);
        let reconciler = test_reconciler(&store);
        let probe = store.storage_probe(TEST_NAMESPACE, "nightly").unwrap();
        reconciler.reconcile_storage_probe(&probe).await.unwrap();
        reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .unwrap();

        store.update_storage_class("fast", |sc| {
            sc.metadata.deletion_timestamp = Some(time("2026-01-01T00:00:00Z"));
        });
        store.fail_on("delete_pvc");
        assert!(reconciler
            .reconcile_storage_class(&current(&store, "fast"))
            .await
            .is_err());
        assert_eq!(finalizers(&store, "fast"), vec![STORAGE_CLASS_FINALIZER.to_string()]);
    }
}
