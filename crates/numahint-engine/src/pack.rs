//! Response envelope marshaling.
//!
//! The packer copies the request's identifying fields next to the hint
//! map; it never computes.

use crate::request::{ResourceHints, ResourceHintsResponse, ResourceRequest};

/// Wrap a hint map into the reply envelope for `resource_name`.
pub fn pack_resource_hints_response(
    req: &ResourceRequest,
    resource_name: &str,
    resource_hints: ResourceHints,
) -> ResourceHintsResponse {
    ResourceHintsResponse {
        pod_uid: req.pod_uid.clone(),
        pod_namespace: req.pod_namespace.clone(),
        pod_name: req.pod_name.clone(),
        container_name: req.container_name.clone(),
        container_type: req.container_type,
        resource_name: resource_name.to_string(),
        resource_hints,
    }
}
