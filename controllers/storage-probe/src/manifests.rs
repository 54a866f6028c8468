//! Desired state of generated CronJobs and PVCs.
//!
//! `mutate_*` functions set only the fields this controller owns on an
//! object that is either freshly constructed or was just read from the API
//! server, so comparing the object before and after mutation tells whether a
//! write is needed at all.

use crate::naming;
use crate::schedule::cron_schedule;
use crds::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, GROUP_LABEL, KIND_LABEL, NODE_LABEL, POD_FINALIZER, ProbeKind,
    ProbeResources, STORAGE_CLASS_LABEL,
};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{
    Affinity, Container, EphemeralVolumeSource, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimTemplate,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, ResourceRequirements, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::num::NonZeroU32;

pub const PROBE_CONTAINER_NAME: &str = "probe";
pub const SCRATCH_VOLUME_NAME: &str = "scratch";
pub const MOUNT_PATH: &str = "/mounted";

const PROBE_USER_ID: i64 = 1001;
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 5;

/// One monitored (group, storage class[, node]) combination.
///
/// A target without a node is the provision probe of its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub group: String,
    pub storage_class: String,
    pub node: Option<String>,
}

impl ProbeTarget {
    #[must_use]
    pub fn provision(group: &str, storage_class: &str) -> Self {
        Self {
            group: group.to_string(),
            storage_class: storage_class.to_string(),
            node: None,
        }
    }

    #[must_use]
    pub fn mount(group: &str, storage_class: &str, node: &str) -> Self {
        Self {
            group: group.to_string(),
            storage_class: storage_class.to_string(),
            node: Some(node.to_string()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        if self.node.is_some() { ProbeKind::Mount } else { ProbeKind::Provision }
    }

    #[must_use]
    pub fn cron_job_name(&self) -> String {
        naming::cron_job_name(self.kind(), &self.group, self.node.as_deref(), &self.storage_class)
    }

    /// Scratch PVC name; provision probes have none
    #[must_use]
    pub fn pvc_name(&self) -> Option<String> {
        self.node
            .as_deref()
            .map(|node| naming::pvc_name(&self.group, node, &self.storage_class))
    }

    #[must_use]
    pub fn schedule(&self, period: NonZeroU32) -> String {
        cron_schedule(
            &[&self.group, &self.storage_class, self.node.as_deref().unwrap_or("")],
            period,
        )
    }

    /// Labels carried by the CronJob, its pods and the scratch PVC
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = group_selector(&self.group);
        labels.insert(STORAGE_CLASS_LABEL.to_string(), self.storage_class.clone());
        labels.insert(KIND_LABEL.to_string(), self.kind().as_label().to_string());
        if let Some(node) = &self.node {
            labels.insert(NODE_LABEL.to_string(), node.clone());
        }
        labels
    }
}

/// Selector for every object generated for `group`
#[must_use]
pub fn group_selector(group: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (GROUP_LABEL.to_string(), group.to_string()),
    ])
}

/// Selector for every object generated against `storage_class`
#[must_use]
pub fn storage_class_selector(storage_class: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (STORAGE_CLASS_LABEL.to_string(), storage_class.to_string()),
    ])
}

/// Per-group settings shared by every object generated for a StorageProbe
#[derive(Debug, Clone)]
pub struct ProbeTemplate<'a> {
    pub image: &'a str,
    pub collector_url: &'a str,
    pub period: NonZeroU32,
    pub pvc_capacity: &'a str,
    /// Required node affinity of the provision probe, `None` for any node
    pub node_selector: Option<NodeSelector>,
    pub resources: Option<&'a ProbeResources>,
    /// Controller reference to the owning StorageProbe
    pub owner: OwnerReference,
}

/// Metadata for an object about to be created
#[must_use]
pub fn new_meta(name: String, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn merge_labels(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

fn ensure_owner(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner.clone());
    }
}

fn ensure_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    (!values.is_empty()).then(|| {
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect()
    })
}

fn storage_request(capacity: &str) -> VolumeResourceRequirements {
    VolumeResourceRequirements {
        requests: Some(BTreeMap::from([("storage".to_string(), Quantity(capacity.to_string()))])),
        ..Default::default()
    }
}

fn container_args(target: &ProbeTarget, template: &ProbeTemplate<'_>) -> Vec<String> {
    match &target.node {
        None => vec!["provision-probe".to_string()],
        Some(node) => vec![
            "probe".to_string(),
            format!("--destination-address={}", template.collector_url),
            format!("--path={MOUNT_PATH}/"),
            format!("--node-name={node}"),
            format!("--storage-class={}", target.storage_class),
            format!("--probe-group={}", target.group),
        ],
    }
}

/// Required affinity pinning a pod to `node` by name
fn pinned_to(node: &str) -> NodeSelector {
    NodeSelector {
        node_selector_terms: vec![NodeSelectorTerm {
            match_fields: Some(vec![NodeSelectorRequirement {
                key: "metadata.name".to_string(),
                operator: "In".to_string(),
                values: Some(vec![node.to_string()]),
            }]),
            ..Default::default()
        }],
    }
}

fn scratch_volume(target: &ProbeTarget, template: &ProbeTemplate<'_>) -> Volume {
    match target.pvc_name() {
        None => Volume {
            name: SCRATCH_VOLUME_NAME.to_string(),
            ephemeral: Some(EphemeralVolumeSource {
                volume_claim_template: Some(PersistentVolumeClaimTemplate {
                    metadata: None,
                    spec: PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        storage_class_name: Some(target.storage_class.clone()),
                        resources: Some(storage_request(template.pvc_capacity)),
                        volume_mode: Some("Filesystem".to_string()),
                        ..Default::default()
                    },
                }),
            }),
            ..Default::default()
        },
        Some(claim_name) => Volume {
            name: SCRATCH_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name,
                read_only: None,
            }),
            ..Default::default()
        },
    }
}

/// Bring `cron_job` to the desired state for `target`
pub fn mutate_cron_job(cron_job: &mut CronJob, target: &ProbeTarget, template: &ProbeTemplate<'_>) {
    let labels = target.labels();
    merge_labels(&mut cron_job.metadata, &labels);
    ensure_owner(&mut cron_job.metadata, &template.owner);

    let spec = cron_job.spec.get_or_insert_with(Default::default);
    spec.schedule = target.schedule(template.period);
    spec.concurrency_policy = Some("Forbid".to_string());
    spec.successful_jobs_history_limit = Some(0);

    let pod_template = &mut spec.job_template.spec.get_or_insert_with(Default::default).template;
    let pod_meta = pod_template.metadata.get_or_insert_with(Default::default);
    merge_labels(pod_meta, &labels);
    ensure_finalizer(pod_meta, POD_FINALIZER);

    let pod_spec = pod_template.spec.get_or_insert_with(Default::default);
    let security = pod_spec.security_context.get_or_insert_with(PodSecurityContext::default);
    security.run_as_user = Some(PROBE_USER_ID);
    security.run_as_group = Some(PROBE_USER_ID);
    security.fs_group = Some(PROBE_USER_ID);
    pod_spec.restart_policy = Some("Never".to_string());
    pod_spec.termination_grace_period_seconds = Some(TERMINATION_GRACE_PERIOD_SECONDS);

    let required = match &target.node {
        Some(node) => Some(pinned_to(node)),
        None => template.node_selector.clone(),
    };
    match required {
        Some(selector) => {
            pod_spec
                .affinity
                .get_or_insert_with(Affinity::default)
                .node_affinity
                .get_or_insert_with(Default::default)
                .required_during_scheduling_ignored_during_execution = Some(selector);
        }
        None => {
            if let Some(node_affinity) = pod_spec.affinity.as_mut().and_then(|a| a.node_affinity.as_mut()) {
                node_affinity.required_during_scheduling_ignored_during_execution = None;
            }
        }
    }

    if pod_spec.containers.len() != 1 {
        pod_spec.containers = vec![Container::default()];
    }
    let container = &mut pod_spec.containers[0];
    container.name = PROBE_CONTAINER_NAME.to_string();
    container.image = Some(template.image.to_string());
    container.args = Some(container_args(target, template));
    container.resources = Some(ResourceRequirements {
        requests: template.resources.and_then(|r| quantities(&r.requests)),
        limits: template.resources.and_then(|r| quantities(&r.limits)),
        ..Default::default()
    });
    container.volume_mounts = target.node.as_ref().map(|_| {
        vec![VolumeMount {
            name: SCRATCH_VOLUME_NAME.to_string(),
            mount_path: MOUNT_PATH.to_string(),
            ..Default::default()
        }]
    });

    pod_spec.volumes = Some(vec![scratch_volume(target, template)]);
}

/// Bring the scratch `pvc` of a mount target to the desired state.
///
/// The claim spec is only written on creation; an existing claim keeps its
/// capacity even when the probe's requested capacity changes.
pub fn mutate_pvc(pvc: &mut PersistentVolumeClaim, target: &ProbeTarget, template: &ProbeTemplate<'_>, creating: bool) {
    merge_labels(&mut pvc.metadata, &target.labels());
    ensure_owner(&mut pvc.metadata, &template.owner);

    if creating {
        pvc.spec = Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(target.storage_class.clone()),
            resources: Some(storage_request(template.pvc_capacity)),
            volume_mode: Some("Filesystem".to_string()),
            ..Default::default()
        });
    }
}
