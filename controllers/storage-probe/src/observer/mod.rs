//! Provisioning observer.
//!
//! Correlates when a probe pod was created with when its probe container
//! started, and classifies every attempt as on-time or late exactly once.
//! Producers (pod events) and the checker share one map behind a mutex; the
//! lock is never held across a store call.
//!
//! Removing an attempt goes through a flush rendezvous so a final pass has
//! classified it before its state is dropped. The entry outlives the flush
//! until the caller forgets it, so a retried removal sees it as counted.
//! An attempt that has neither started nor exceeded its threshold when it
//! is forgotten is dropped uncounted.

mod clock;
mod handshake;

#[cfg(test)]
mod observer_test;

pub use clock::{Clock, SystemClock};
pub use handshake::FlushListener;
use handshake::{FlushRequester, flush_channel};

#[cfg(test)]
pub use clock::ManualClock;

use chrono::{DateTime, Utc};
use crds::{NODE_LABEL, ProbeKind, STORAGE_CLASS_LABEL};
use k8s_openapi::api::core::v1::Pod;
use probe_metrics::MetricsSink;
use probe_store::{DeleteGuard, ProbeStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity of a tracked probe pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptKey {
    pub namespace: String,
    pub name: String,
}

impl AttemptKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What is known about an attempt when it is first seen
#[derive(Debug, Clone)]
pub struct Registration {
    pub registered_at: DateTime<Utc>,
    pub threshold: Duration,
    pub group: String,
    pub kind: ProbeKind,
}

#[derive(Debug)]
struct Attempt {
    registered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    threshold: Duration,
    group: String,
    kind: ProbeKind,
    counted: bool,
}

impl Attempt {
    /// `Some(on_time)` once the attempt can be classified at `now`
    fn verdict(&self, now: DateTime<Utc>) -> Option<bool> {
        match self.started_at {
            Some(started_at) => Some(within(self.registered_at, started_at, self.threshold)),
            None if !within(self.registered_at, now, self.threshold) => Some(false),
            None => None,
        }
    }
}

/// Whether `to - from` is strictly below `limit`; a negative span counts as within
fn within(from: DateTime<Utc>, to: DateTime<Utc>, limit: Duration) -> bool {
    (to - from).to_std().map_or(true, |elapsed| elapsed < limit)
}

struct Candidate {
    key: AttemptKey,
    on_time: bool,
    group: String,
    kind: ProbeKind,
}

struct Resolved {
    candidate: Candidate,
    storage_class: String,
    node: String,
    owner_job: Option<(String, String)>,
}

/// Classifies probe attempts and cleans up late ones
pub struct ProvisionObserver {
    store: Arc<dyn ProbeStore>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<AttemptKey, Attempt>>,
    flush: FlushRequester,
}

impl std::fmt::Debug for ProvisionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionObserver")
            .field("tracked", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl ProvisionObserver {
    /// Create the observer and the listener its [`run`](Self::run) loop consumes
    pub fn new(
        store: Arc<dyn ProbeStore>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> (Self, FlushListener) {
        let (flush, listener) = flush_channel();
        let observer = Self {
            store,
            metrics,
            clock,
            attempts: Mutex::new(HashMap::new()),
            flush,
        };
        (observer, listener)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AttemptKey, Attempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_tracked(&self, key: &AttemptKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Start tracking `key`, or move its registration time earlier.
    ///
    /// Threshold, group and kind are fixed by the first registration.
    pub fn register(&self, key: AttemptKey, registration: Registration) {
        let mut attempts = self.lock();
        match attempts.get_mut(&key) {
            Some(attempt) => {
                if registration.registered_at < attempt.registered_at {
                    attempt.registered_at = registration.registered_at;
                }
            }
            None => {
                debug!("Tracking probe pod {} of group {}", key, registration.group);
                attempts.insert(
                    key,
                    Attempt {
                        registered_at: registration.registered_at,
                        started_at: None,
                        threshold: registration.threshold,
                        group: registration.group,
                        kind: registration.kind,
                        counted: false,
                    },
                );
            }
        }
    }

    /// Record the first observed container start of a registered attempt
    pub fn record_started(&self, key: &AttemptKey, started_at: DateTime<Utc>) {
        if let Some(attempt) = self.lock().get_mut(key) {
            if attempt.started_at.is_none() {
                attempt.started_at = Some(started_at);
            }
        }
    }

    /// Run a checker pass over every tracked attempt and wait for it.
    ///
    /// The attempt stays tracked, so a flushed attempt that was counted is
    /// never counted again; drop it with [`forget`](Self::forget) once its
    /// pod is released.
    pub async fn flush(&self, key: &AttemptKey) {
        if !self.is_tracked(key) {
            return;
        }
        if let Err(e) = self.flush.request().await {
            warn!("Flush for {} failed: {}", key, e);
        }
    }

    /// Stop tracking `key`
    pub fn forget(&self, key: &AttemptKey) {
        if let Some(attempt) = self.lock().remove(key) {
            if !attempt.counted {
                debug!("Forgot unclassified probe pod {}", key);
            }
        }
    }

    /// One checker pass. Returns the number of attempts classified.
    pub async fn check_pending(&self) -> usize {
        let now = self.clock.now();
        let candidates: Vec<Candidate> = self
            .lock()
            .iter()
            .filter(|(_, attempt)| !attempt.counted)
            .filter_map(|(key, attempt)| {
                attempt.verdict(now).map(|on_time| Candidate {
                    key: key.clone(),
                    on_time,
                    group: attempt.group.clone(),
                    kind: attempt.kind,
                })
            })
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let mut resolved = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.store.get_pod(&candidate.key.namespace, &candidate.key.name).await {
                Ok(pod) => resolved.push(resolve(candidate, &pod)),
                Err(e) if e.is_not_found() => {
                    warn!("Probe pod {} vanished before classification, dropping it", candidate.key);
                    self.lock().remove(&candidate.key);
                }
                Err(e) => warn!("Failed to look up probe pod {}: {}", candidate.key, e),
            }
        }

        let reported: Vec<Resolved> = {
            let mut attempts = self.lock();
            resolved
                .into_iter()
                .filter(|r| match attempts.get_mut(&r.candidate.key) {
                    Some(attempt) if !attempt.counted => {
                        attempt.counted = true;
                        true
                    }
                    _ => false,
                })
                .collect()
        };

        for r in &reported {
            self.emit(r);
        }
        for r in reported.iter().filter(|r| !r.candidate.on_time) {
            self.delete_late(r).await;
        }
        reported.len()
    }

    fn emit(&self, r: &Resolved) {
        let c = &r.candidate;
        if c.on_time {
            debug!("Probe pod {} started on time", c.key);
        } else {
            info!("Probe pod {} of group {} is late", c.key, c.group);
        }
        match c.kind {
            ProbeKind::Provision => self.metrics.record_provision_probe(&c.group, &r.storage_class, c.on_time),
            ProbeKind::Mount => self
                .metrics
                .record_mount_probe(&c.group, &r.node, &r.storage_class, c.on_time),
        }
    }

    async fn delete_late(&self, r: &Resolved) {
        let key = &r.candidate.key;
        let Some((job, uid)) = &r.owner_job else {
            warn!("Late probe pod {} has no owning Job to delete", key);
            return;
        };
        info!("Deleting Job {}/{} of late probe pod {}", key.namespace, job, key);
        if let Err(e) = self
            .store
            .delete_job(&key.namespace, job, &DeleteGuard::uid(uid.clone()))
            .await
        {
            warn!("Failed to delete Job {}/{}: {}", key.namespace, job, e);
        }
    }

    /// Check pending attempts every `tick` and on every flush request until cancelled
    pub async fn run(&self, mut listener: FlushListener, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Provisioning observer started, checking every {:?}", tick);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(ticket) = listener.recv() => {
                    self.check_pending().await;
                    ticket.acknowledge();
                }
                _ = interval.tick() => {
                    self.check_pending().await;
                }
            }
        }

        listener.close();
        info!("Provisioning observer stopped");
    }
}

fn resolve(candidate: Candidate, pod: &Pod) -> Resolved {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    let node = labels
        .get(NODE_LABEL)
        .cloned()
        .or_else(|| pod.spec.as_ref().and_then(|s| s.node_name.clone()))
        .unwrap_or_default();
    let owner_job = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.kind == "Job")
        .map(|o| (o.name.clone(), o.uid.clone()));
    Resolved {
        storage_class: labels.get(STORAGE_CLASS_LABEL).cloned().unwrap_or_default(),
        node,
        owner_job,
        candidate,
    }
}
