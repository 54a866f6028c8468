//! In-memory `ProbeStore` for unit tests
//!
//! Assigns uids and resource versions, enforces optimistic concurrency on
//! replace and delete preconditions, matches equality label selectors, and
//! finalizes objects the way the API server does: an object carrying a
//! deletionTimestamp disappears once its last finalizer is removed.

use crate::error::StoreError;
use crate::store::{DeleteGuard, ProbeStore};
use crds::{StorageProbe, StorageProbeStatus};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    storage_probes: BTreeMap<Key, StorageProbe>,
    storage_classes: BTreeMap<String, StorageClass>,
    nodes: BTreeMap<String, Node>,
    cron_jobs: BTreeMap<Key, CronJob>,
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    pods: BTreeMap<Key, Pod>,
    jobs: BTreeMap<Key, Job>,
    next_id: u64,
    writes: Vec<String>,
    failures: HashSet<String>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Stamp uid (if new) and a fresh resourceVersion
    fn stamp(&mut self, meta: &mut ObjectMeta, fresh: bool) {
        let id = self.next();
        if fresh || meta.uid.is_none() {
            meta.uid = Some(format!("uid-{id}"));
        }
        meta.resource_version = Some(id.to_string());
    }

    fn check_failure(&self, op: &str) -> Result<(), StoreError> {
        if self.failures.contains(op) {
            return Err(StoreError::Injected(op.to_string()));
        }
        Ok(())
    }
}

/// Mock store for testing
#[derive(Clone, Debug, Default)]
pub struct MockProbeStore {
    state: Arc<Mutex<State>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn name_of<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

fn labels_match(meta: &ObjectMeta, selector: &BTreeMap<String, String>) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Objects with a deletionTimestamp and no finalizers are gone
fn finalized(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().is_none_or(Vec::is_empty)
}

fn conflict(kind: &'static str, name: &str, message: &str) -> StoreError {
    StoreError::Conflict {
        kind,
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn not_found(kind: &'static str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn check_guard(kind: &'static str, name: &str, meta: &ObjectMeta, guard: &DeleteGuard) -> Result<(), StoreError> {
    if guard.uid.is_some() && guard.uid != meta.uid {
        return Err(conflict(kind, name, "uid precondition failed"));
    }
    if guard.resource_version.is_some() && guard.resource_version != meta.resource_version {
        return Err(conflict(kind, name, "resourceVersion precondition failed"));
    }
    Ok(())
}

fn check_version(kind: &'static str, name: &str, current: &ObjectMeta, incoming: &ObjectMeta) -> Result<(), StoreError> {
    if incoming.resource_version.is_some() && incoming.resource_version != current.resource_version {
        return Err(conflict(kind, name, "the object has been modified"));
    }
    Ok(())
}

impl MockProbeStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a StorageProbe (for test setup)
    pub fn add_storage_probe(&self, mut probe: StorageProbe) {
        let mut state = self.lock();
        state.stamp(&mut probe.metadata, false);
        let k = key(
            probe.metadata.namespace.as_deref().unwrap_or_default(),
            &name_of(&probe),
        );
        state.storage_probes.insert(k, probe);
    }

    /// Add a StorageClass (for test setup)
    pub fn add_storage_class(&self, mut storage_class: StorageClass) {
        let mut state = self.lock();
        state.stamp(&mut storage_class.metadata, false);
        state.storage_classes.insert(name_of(&storage_class), storage_class);
    }

    /// Add a Node (for test setup)
    pub fn add_node(&self, mut node: Node) {
        let mut state = self.lock();
        state.stamp(&mut node.metadata, false);
        state.nodes.insert(name_of(&node), node);
    }

    /// Remove a Node (for test setup)
    pub fn remove_node(&self, name: &str) {
        self.lock().nodes.remove(name);
    }

    /// Add a Pod (for test setup)
    pub fn add_pod(&self, mut pod: Pod) {
        let mut state = self.lock();
        state.stamp(&mut pod.metadata, false);
        let k = key(pod.metadata.namespace.as_deref().unwrap_or_default(), &name_of(&pod));
        state.pods.insert(k, pod);
    }

    /// Add a Job (for test setup)
    pub fn add_job(&self, mut job: Job) {
        let mut state = self.lock();
        state.stamp(&mut job.metadata, false);
        let k = key(job.metadata.namespace.as_deref().unwrap_or_default(), &name_of(&job));
        state.jobs.insert(k, job);
    }

    /// Mutate a stored StorageProbe in place (spec edits in tests)
    pub fn update_storage_probe(&self, namespace: &str, name: &str, f: impl FnOnce(&mut StorageProbe)) {
        let mut state = self.lock();
        let id = state.next();
        if let Some(probe) = state.storage_probes.get_mut(&key(namespace, name)) {
            f(probe);
            probe.metadata.resource_version = Some(id.to_string());
        }
    }

    /// Mutate a stored StorageClass in place (e.g. mark it for deletion)
    pub fn update_storage_class(&self, name: &str, f: impl FnOnce(&mut StorageClass)) {
        let mut state = self.lock();
        let id = state.next();
        if let Some(sc) = state.storage_classes.get_mut(name) {
            f(sc);
            sc.metadata.resource_version = Some(id.to_string());
        }
    }

    /// Mutate a stored Pod in place (status transitions, deletion)
    pub fn update_pod(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Pod)) {
        let mut state = self.lock();
        let id = state.next();
        if let Some(pod) = state.pods.get_mut(&key(namespace, name)) {
            f(pod);
            pod.metadata.resource_version = Some(id.to_string());
        }
    }

    /// Make every call of `op` (e.g. `"create_cron_job"`) fail
    pub fn fail_on(&self, op: &str) {
        self.lock().failures.insert(op.to_string());
    }

    /// Stop failing `op`
    pub fn clear_failure(&self, op: &str) {
        self.lock().failures.remove(op);
    }

    /// Every successful write so far, as `"<op> <namespace>/<name>"`
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    #[must_use]
    pub fn storage_probe(&self, namespace: &str, name: &str) -> Option<StorageProbe> {
        self.lock().storage_probes.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn storage_class(&self, name: &str) -> Option<StorageClass> {
        self.lock().storage_classes.get(name).cloned()
    }

    #[must_use]
    pub fn cron_job(&self, namespace: &str, name: &str) -> Option<CronJob> {
        self.lock().cron_jobs.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn cron_jobs(&self) -> Vec<CronJob> {
        self.lock().cron_jobs.values().cloned().collect()
    }

    #[must_use]
    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock().pvcs.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn pvcs(&self) -> Vec<PersistentVolumeClaim> {
        self.lock().pvcs.values().cloned().collect()
    }

    #[must_use]
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.lock().jobs.get(&key(namespace, name)).cloned()
    }
}

#[async_trait::async_trait]
impl ProbeStore for MockProbeStore {
    async fn get_storage_probe(&self, namespace: &str, name: &str) -> Result<StorageProbe, StoreError> {
        let state = self.lock();
        state.check_failure("get_storage_probe")?;
        state
            .storage_probes
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("StorageProbe", name))
    }

    async fn list_storage_probes(&self, namespace: &str) -> Result<Vec<StorageProbe>, StoreError> {
        let state = self.lock();
        state.check_failure("list_storage_probes")?;
        Ok(state
            .storage_probes
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn patch_storage_probe_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StorageProbeStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_failure("patch_storage_probe_status")?;
        let id = state.next();
        let probe = state
            .storage_probes
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("StorageProbe", name))?;
        probe.status = Some(status.clone());
        probe.metadata.resource_version = Some(id.to_string());
        state.writes.push(format!("patch_storage_probe_status {namespace}/{name}"));
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, StoreError> {
        let state = self.lock();
        state.check_failure("get_storage_class")?;
        state
            .storage_classes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("StorageClass", name))
    }

    async fn replace_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass, StoreError> {
        let mut state = self.lock();
        state.check_failure("replace_storage_class")?;
        let name = name_of(storage_class);
        let current = state
            .storage_classes
            .get(&name)
            .ok_or_else(|| not_found("StorageClass", &name))?;
        check_version("StorageClass", &name, &current.metadata, &storage_class.metadata)?;
        let mut updated = storage_class.clone();
        updated.metadata.uid.clone_from(&current.metadata.uid);
        updated.metadata.deletion_timestamp.clone_from(&current.metadata.deletion_timestamp);
        state.stamp(&mut updated.metadata, false);
        state.writes.push(format!("replace_storage_class {name}"));
        if finalized(&updated.metadata) {
            state.storage_classes.remove(&name);
        } else {
            state.storage_classes.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let state = self.lock();
        state.check_failure("list_nodes")?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob, StoreError> {
        let state = self.lock();
        state.check_failure("get_cron_job")?;
        state
            .cron_jobs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("CronJob", name))
    }

    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError> {
        let mut state = self.lock();
        state.check_failure("create_cron_job")?;
        let name = name_of(cron_job);
        if state.cron_jobs.contains_key(&key(namespace, &name)) {
            return Err(conflict("CronJob", &name, "already exists"));
        }
        let mut created = cron_job.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.stamp(&mut created.metadata, true);
        state.writes.push(format!("create_cron_job {namespace}/{name}"));
        state.cron_jobs.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn replace_cron_job(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob, StoreError> {
        let mut state = self.lock();
        state.check_failure("replace_cron_job")?;
        let name = name_of(cron_job);
        let current = state
            .cron_jobs
            .get(&key(namespace, &name))
            .ok_or_else(|| not_found("CronJob", &name))?;
        check_version("CronJob", &name, &current.metadata, &cron_job.metadata)?;
        let mut updated = cron_job.clone();
        updated.metadata.uid.clone_from(&current.metadata.uid);
        state.stamp(&mut updated.metadata, false);
        state.writes.push(format!("replace_cron_job {namespace}/{name}"));
        state.cron_jobs.insert(key(namespace, &name), updated.clone());
        Ok(updated)
    }

    async fn list_cron_jobs(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<CronJob>, StoreError> {
        let state = self.lock();
        state.check_failure("list_cron_jobs")?;
        Ok(state
            .cron_jobs
            .iter()
            .filter(|((ns, _), cj)| ns == namespace && labels_match(&cj.metadata, labels))
            .map(|(_, cj)| cj.clone())
            .collect())
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_failure("delete_cron_job")?;
        let Some(current) = state.cron_jobs.get(&key(namespace, name)) else {
            return Ok(());
        };
        check_guard("CronJob", name, &current.metadata, guard)?;
        state.cron_jobs.remove(&key(namespace, name));
        state.writes.push(format!("delete_cron_job {namespace}/{name}"));
        Ok(())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim, StoreError> {
        let state = self.lock();
        state.check_failure("get_pvc")?;
        state
            .pvcs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("PersistentVolumeClaim", name))
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let mut state = self.lock();
        state.check_failure("create_pvc")?;
        let name = name_of(pvc);
        if state.pvcs.contains_key(&key(namespace, &name)) {
            return Err(conflict("PersistentVolumeClaim", &name, "already exists"));
        }
        let mut created = pvc.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.stamp(&mut created.metadata, true);
        state.writes.push(format!("create_pvc {namespace}/{name}"));
        state.pvcs.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn replace_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let mut state = self.lock();
        state.check_failure("replace_pvc")?;
        let name = name_of(pvc);
        let current = state
            .pvcs
            .get(&key(namespace, &name))
            .ok_or_else(|| not_found("PersistentVolumeClaim", &name))?;
        check_version("PersistentVolumeClaim", &name, &current.metadata, &pvc.metadata)?;
        let mut updated = pvc.clone();
        updated.metadata.uid.clone_from(&current.metadata.uid);
        state.stamp(&mut updated.metadata, false);
        state.writes.push(format!("replace_pvc {namespace}/{name}"));
        state.pvcs.insert(key(namespace, &name), updated.clone());
        Ok(updated)
    }

    async fn list_pvcs(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PersistentVolumeClaim>, StoreError> {
        let state = self.lock();
        state.check_failure("list_pvcs")?;
        Ok(state
            .pvcs
            .iter()
            .filter(|((ns, _), pvc)| ns == namespace && labels_match(&pvc.metadata, labels))
            .map(|(_, pvc)| pvc.clone())
            .collect())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_failure("delete_pvc")?;
        let Some(current) = state.pvcs.get(&key(namespace, name)) else {
            return Ok(());
        };
        check_guard("PersistentVolumeClaim", name, &current.metadata, guard)?;
        state.pvcs.remove(&key(namespace, name));
        state.writes.push(format!("delete_pvc {namespace}/{name}"));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        let state = self.lock();
        state.check_failure("get_pod")?;
        state
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Pod", name))
    }

    async fn replace_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let mut state = self.lock();
        state.check_failure("replace_pod")?;
        let name = name_of(pod);
        let current = state
            .pods
            .get(&key(namespace, &name))
            .ok_or_else(|| not_found("Pod", &name))?;
        check_version("Pod", &name, &current.metadata, &pod.metadata)?;
        let mut updated = pod.clone();
        updated.metadata.uid.clone_from(&current.metadata.uid);
        updated.metadata.deletion_timestamp.clone_from(&current.metadata.deletion_timestamp);
        state.stamp(&mut updated.metadata, false);
        state.writes.push(format!("replace_pod {namespace}/{name}"));
        if finalized(&updated.metadata) {
            state.pods.remove(&key(namespace, &name));
        } else {
            state.pods.insert(key(namespace, &name), updated.clone());
        }
        Ok(updated)
    }

    async fn delete_job(&self, namespace: &str, name: &str, guard: &DeleteGuard) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_failure("delete_job")?;
        state.writes.push(format!("delete_job {namespace}/{name}"));
        let Some(current) = state.jobs.get(&key(namespace, name)) else {
            return Ok(());
        };
        check_guard("Job", name, &current.metadata, guard)?;
        state.jobs.remove(&key(namespace, name));
        Ok(())
    }
}
