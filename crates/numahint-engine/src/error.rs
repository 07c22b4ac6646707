//! Hint engine error types.
//!
//! The engine is a policy function over a snapshot: ambiguous inputs are
//! surfaced, never sanitized. Only sideband-file I/O and per-subset missing
//! NUMA state are recovered locally (by the caller logging and falling
//! through), so `SidebandRead` appears here even though it never escapes
//! `HintEngine`.

use thiserror::Error;

use numahint_machine::TopologyError;
use numahint_state::StateError;

/// Result type alias for hint operations.
pub type HintResult<T> = Result<T, HintError>;

/// Errors that can occur during hint generation.
#[derive(Debug, Error)]
pub enum HintError {
    #[error("malformed quantity for resource {resource}: {detail}")]
    MalformedQuantity { resource: String, detail: String },

    #[error("unknown qos level: {0:?}")]
    UnknownQosLevel(String),

    #[error("dedicated cores without numa binding is not supported")]
    Unsupported,

    #[error("numa-bound container has request larger than one NUMA node")]
    RequestExceedsSingleNuma,

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("machine state rebuild failed: {0}")]
    MachineStateRebuild(#[from] StateError),

    #[error("sideband hint file unreadable: {0}")]
    SidebandRead(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("request cancelled")]
    Cancelled,
}
