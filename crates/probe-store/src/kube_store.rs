//! `ProbeStore` backed by the Kubernetes API server

use crate::error::StoreError;
use crate::store::{DeleteGuard, ProbeStore, selector_string};
use crds::{StorageProbe, StorageProbeStatus};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions, PropagationPolicy,
};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Live store using a `kube::Client`
#[derive(Clone)]
pub struct KubeProbeStore {
    client: Client,
}

impl std::fmt::Debug for KubeProbeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProbeStore").finish_non_exhaustive()
    }
}

impl KubeProbeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube error to the store taxonomy
fn classify(kind: &'static str, name: &str, err: kube::Error) -> StoreError {
    let code = match &err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    };
    match code {
        Some(404) => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        Some(409 | 412) => StoreError::Conflict {
            kind,
            name: name.to_string(),
            message: err.to_string(),
        },
        _ => StoreError::Kube(err),
    }
}

fn object_name<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

async fn get<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get(name).await.map_err(|e| classify(kind, name, e))
}

async fn create<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = object_name(obj);
    debug!("Creating {} {}", kind, name);
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|e| classify(kind, &name, e))
}

async fn replace<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = object_name(obj);
    debug!("Replacing {} {}", kind, name);
    api.replace(&name, &PostParams::default(), obj)
        .await
        .map_err(|e| classify(kind, &name, e))
}

async fn list<K>(
    api: &Api<K>,
    kind: &'static str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default().labels(&selector_string(labels));
    api.list(&params)
        .await
        .map(|list| list.items)
        .map_err(|e| classify(kind, "", e))
}

async fn delete<K>(
    api: &Api<K>,
    kind: &'static str,
    name: &str,
    guard: &DeleteGuard,
    propagation: Option<PropagationPolicy>,
) -> Result<(), StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = DeleteParams {
        propagation_policy: propagation,
        preconditions: Some(Preconditions {
            uid: guard.uid.clone(),
            resource_version: guard.resource_version.clone(),
        }),
        ..Default::default()
    };
    debug!("Deleting {} {}", kind, name);
    match api.delete(name, &params).await {
        Ok(_) => Ok(()),
        Err(e) => match classify(kind, name, e) {
            err if err.is_not_found() => Ok(()),
            err => Err(err),
        },
    }
}

#[async_trait::async_trait]
impl ProbeStore for KubeProbeStore {
    async fn get_storage_probe(&self, namespace: &str, name: &str) -> Result<StorageProbe, StoreError> {
        get(&self.namespaced::<StorageProbe>(namespace), "StorageProbe", name).await
    }

    async fn list_storage_probes(&self, namespace: &str) -> Result<Vec<StorageProbe>, StoreError> {
        list(&self.namespaced::<StorageProbe>(namespace), "StorageProbe", &BTreeMap::new()).await
    }

    async fn patch_storage_probe_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StorageProbeStatus,
    ) -> Result<(), StoreError> {
        let api = self.namespaced::<StorageProbe>(namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| classify("StorageProbe", name, e))
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, StoreError> {
        get(&Api::<StorageClass>::all(self.client.clone()), "StorageClass", name).await
    }

    async fn replace_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass, StoreError> {
        replace(&Api::<StorageClass>::all(self.client.clone()), "StorageClass", storage_class).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        list(&Api::<Node>::all(self.client.clone()), "Node", &BTreeMap::new()).await
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, StoreError> {
        get(&self.namespaced::<CronJob>(namespace), "CronJob", name).await
    }

    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError> {
        create(&self.namespaced::<CronJob>(namespace), "CronJob", cron_job).await
    }

    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError> {
        replace(&self.namespaced::<CronJob>(namespace), "CronJob", cron_job).await
    }

    async fn list_cron_jobs(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<CronJob>, StoreError> {
        list(&self.namespaced::<CronJob>(namespace), "CronJob", labels).await
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        delete(&self.namespaced::<CronJob>(namespace), "CronJob", name, guard, None).await
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim, StoreError> {
        get(&self.namespaced::<PersistentVolumeClaim>(namespace), "PersistentVolumeClaim", name).await
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        create(&self.namespaced::<PersistentVolumeClaim>(namespace), "PersistentVolumeClaim", pvc).await
    }

    async fn replace_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        replace(&self.namespaced::<PersistentVolumeClaim>(namespace), "PersistentVolumeClaim", pvc).await
    }

    async fn list_pvcs(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PersistentVolumeClaim>, StoreError> {
        list(&self.namespaced::<PersistentVolumeClaim>(namespace), "PersistentVolumeClaim", labels).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        delete(
            &self.namespaced::<PersistentVolumeClaim>(namespace),
            "PersistentVolumeClaim",
            name,
            guard,
            None,
        )
        .await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        get(&self.namespaced::<Pod>(namespace), "Pod", name).await
    }

    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        replace(&self.namespaced::<Pod>(namespace), "Pod", pod).await
    }

    async fn delete_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        delete(
            &self.namespaced::<Job>(namespace),
            "Job",
            name,
            guard,
            Some(PropagationPolicy::Background),
        )
        .await
    }
}
