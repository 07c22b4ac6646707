//! Annotation keys and the request classifier.
//!
//! The annotation bag is the only classification input: the QoS level is
//! derived upstream and passed through, NUMA binding and exclusivity are
//! memory-enhancement toggles. The classifier maps the bag to one of four
//! routes; `dedicated-no-bind` is routed but rejected by the engine.

use std::collections::HashMap;

use numahint_state::QosLevel;

use crate::error::{HintError, HintResult};

pub const ANNOTATION_QOS_LEVEL: &str = "qos.resources/qos-level";
pub const QOS_LEVEL_SHARED: &str = "shared";
pub const QOS_LEVEL_RECLAIMED: &str = "reclaimed";
pub const QOS_LEVEL_DEDICATED: &str = "dedicated";

pub const ANNOTATION_NUMA_BINDING: &str = "memory-enhancement/numa-binding";
pub const ANNOTATION_NUMA_EXCLUSIVE: &str = "memory-enhancement/numa-exclusive";
pub const ANNOTATION_ANTI_AFFINITY_GROUP: &str = "memory-enhancement/anti-affinity-group";
pub const ENHANCEMENT_ENABLE: &str = "enable";

/// QoS level from the bag. Absent defaults to shared (the runtime's
/// baseline class); an unrecognized value is rejected rather than guessed.
pub fn qos_level(annotations: &HashMap<String, String>) -> HintResult<QosLevel> {
    match annotations.get(ANNOTATION_QOS_LEVEL).map(String::as_str) {
        None | Some(QOS_LEVEL_SHARED) => Ok(QosLevel::Shared),
        Some(QOS_LEVEL_RECLAIMED) => Ok(QosLevel::Reclaimed),
        Some(QOS_LEVEL_DEDICATED) => Ok(QosLevel::Dedicated),
        Some(other) => Err(HintError::UnknownQosLevel(other.to_string())),
    }
}

pub fn numa_binding_enabled(annotations: &HashMap<String, String>) -> bool {
    annotations.get(ANNOTATION_NUMA_BINDING).map(String::as_str) == Some(ENHANCEMENT_ENABLE)
}

/// Meaningful only under dedicated + binding.
pub fn numa_exclusive_enabled(annotations: &HashMap<String, String>) -> bool {
    annotations.get(ANNOTATION_NUMA_EXCLUSIVE).map(String::as_str) == Some(ENHANCEMENT_ENABLE)
}

pub fn anti_affinity_group(annotations: &HashMap<String, String>) -> Option<&str> {
    annotations
        .get(ANNOTATION_ANTI_AFFINITY_GROUP)
        .map(String::as_str)
}

/// The four-way routing decision for a hint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Shared (or reclaimed) without binding: no NUMA preference.
    SharedNoBind,
    /// Shared (or reclaimed) pinned to a single NUMA node.
    SharedBind,
    /// Dedicated without binding: unsupported.
    DedicatedNoBind,
    /// Dedicated pinned to one or more NUMA nodes.
    DedicatedBind { exclusive: bool },
}

/// Classify a request's annotation bag.
pub fn classify(annotations: &HashMap<String, String>) -> HintResult<RequestClass> {
    let binding = numa_binding_enabled(annotations);
    match qos_level(annotations)? {
        QosLevel::Shared | QosLevel::Reclaimed => Ok(if binding {
            RequestClass::SharedBind
        } else {
            RequestClass::SharedNoBind
        }),
        QosLevel::Dedicated => Ok(if binding {
            RequestClass::DedicatedBind {
                exclusive: numa_exclusive_enabled(annotations),
            }
        } else {
            RequestClass::DedicatedNoBind
        }),
    }
}
