//! # Probe Object Names
//!
//! Generated CronJobs and PVCs get names that are a pure function of the
//! probe group, node and storage class. Each human-readable part is
//! sanitized and cut to a per-kind length so the whole name stays within
//! 52 characters (the CronJob limit, leaving room for the Job suffix), and a
//! short SHA-1 fingerprint of the untruncated parts keeps names distinct.

use crds::ProbeKind;
use sha1::{Digest, Sha1};

/// Longest name a CronJob may carry
pub const MAX_NAME_LEN: usize = 52;

pub const PROVISION_PROBE_PREFIX: &str = "provision-probe";
pub const MOUNT_PROBE_PREFIX: &str = "mount-probe";
pub const PVC_PREFIX: &str = "probe-pvc";

const FINGERPRINT_LEN: usize = 6;

/// (group, node, storage class) limits
const PROVISION_LIMITS: (usize, usize, usize) = (14, 0, 14);
const MOUNT_LIMITS: (usize, usize, usize) = (10, 11, 10);
const PVC_LIMITS: (usize, usize, usize) = (10, 11, 12);

/// Name of the CronJob running a probe of `kind`.
///
/// Provision probes are not bound to a node and pass `None`.
#[must_use]
pub fn cron_job_name(kind: ProbeKind, group: &str, node: Option<&str>, storage_class: &str) -> String {
    match kind {
        ProbeKind::Provision => derive_name(PROVISION_PROBE_PREFIX, group, None, storage_class, PROVISION_LIMITS),
        ProbeKind::Mount => derive_name(MOUNT_PROBE_PREFIX, group, node, storage_class, MOUNT_LIMITS),
    }
}

/// Name of the scratch PVC used by the mount probe on `node`
#[must_use]
pub fn pvc_name(group: &str, node: &str, storage_class: &str) -> String {
    derive_name(PVC_PREFIX, group, Some(node), storage_class, PVC_LIMITS)
}

fn derive_name(
    prefix: &str,
    group: &str,
    node: Option<&str>,
    storage_class: &str,
    (group_len, node_len, storage_class_len): (usize, usize, usize),
) -> String {
    let digest = fingerprint(&[group, node.unwrap_or(""), storage_class]);

    let mut name = String::with_capacity(MAX_NAME_LEN);
    name.push_str(prefix);
    for (part, len) in [(Some(group), group_len), (node, node_len), (Some(storage_class), storage_class_len)] {
        if let Some(part) = part {
            name.push('-');
            name.push_str(&readable(part, len));
        }
    }
    name.push('-');
    name.push_str(&digest);
    name
}

/// First hex digits of SHA-1 over the parts joined by NUL
fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Lowercase, map anything outside `[a-z0-9-]` to `-`, keep the first `max` chars
fn readable(part: &str, max: usize) -> String {
    part.chars()
        .take(max)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' }
        })
        .collect()
}
