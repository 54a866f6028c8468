//! Labels, finalizers and probe kinds shared by every generated object.

use std::fmt;

/// API group of the StorageProbe CRD, also used as the label/finalizer domain.
pub const GROUP: &str = "probe.microscaler.io";

/// `app.kubernetes.io/managed-by` label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of the managed-by label on every object this controller owns
pub const MANAGED_BY_VALUE: &str = "storage-probe";
/// Name of the owning StorageProbe
pub const GROUP_LABEL: &str = "probe.microscaler.io/group";
/// Storage class the probe exercises
pub const STORAGE_CLASS_LABEL: &str = "probe.microscaler.io/storage-class";
/// Node a mount probe is pinned to (absent for provision probes)
pub const NODE_LABEL: &str = "probe.microscaler.io/node";
/// `provision` or `mount`
pub const KIND_LABEL: &str = "probe.microscaler.io/kind";

/// Finalizer placed on probe pods so their deletion is always observed.
pub const POD_FINALIZER: &str = "probe.microscaler.io/pod";
/// Finalizer placed on storage classes referenced by a StorageProbe.
pub const STORAGE_CLASS_FINALIZER: &str = "probe.microscaler.io/storage-class";

/// Which kind of probe a workload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Provisions a fresh ephemeral volume on whichever node the scheduler picks
    Provision,
    /// Mounts the node's scratch volume and benchmarks it
    Mount,
}

impl ProbeKind {
    /// Value stored under [`KIND_LABEL`]
    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            ProbeKind::Provision => "provision",
            ProbeKind::Mount => "mount",
        }
    }

    /// Inverse of [`ProbeKind::as_label`]
    #[must_use]
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "provision" => Some(ProbeKind::Provision),
            "mount" => Some(ProbeKind::Mount),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
