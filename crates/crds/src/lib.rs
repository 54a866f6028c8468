//! StorageProbe CRD Definitions
//!
//! The `StorageProbe` custom resource plus the vocabulary shared by the
//! controller and the probe workloads it schedules: label keys, finalizer
//! names, probe kinds and threshold durations.

pub mod duration;
pub mod error;
pub mod labels;
pub mod storage_probe;

pub use duration::parse_duration;
pub use error::CrdError;
pub use labels::*;
pub use storage_probe::*;
