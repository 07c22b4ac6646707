//! Error types for allocation state handling.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors from registry and machine-state operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("allocation references unknown NUMA node {0}")]
    UnknownNuma(usize),

    #[error("pod {pod_uid} container {container_name} holds cpus {cpus} outside NUMA {numa}")]
    ForeignCpus {
        pod_uid: String,
        container_name: String,
        numa: usize,
        cpus: String,
    },

    #[error("overlapping dedicated allocations on NUMA {numa}: cpus {cpus}")]
    OverlappingAllocation { numa: usize, cpus: String },
}
