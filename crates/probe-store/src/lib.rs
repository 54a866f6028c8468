//! Probe Store
//!
//! The narrow slice of the Kubernetes API the storage probe controller
//! needs: StorageProbes, StorageClasses, Nodes, CronJobs, PVCs, Pods and Jobs.
//!
//! [`KubeProbeStore`] talks to the API server. With the `test-util` feature,
//! [`MockProbeStore`] keeps everything in memory and honors delete
//! preconditions, which is enough to exercise the reconciler and the
//! provisioning observer without a cluster.

pub mod error;
pub mod kube_store;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod store;

pub use error::StoreError;
pub use kube_store::KubeProbeStore;
#[cfg(feature = "test-util")]
pub use mock::MockProbeStore;
pub use store::{DeleteGuard, ProbeStore, selector_string};
