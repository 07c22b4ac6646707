//! Wire types for hint requests and responses.
//!
//! These mirror what the runtime sends over its resource-plugin RPC; the
//! transport itself lives in the enclosing server, so here they are plain
//! serde values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use numahint_state::ContainerType;

use crate::error::{HintError, HintResult};

/// The resource key hint maps are keyed under.
pub const RESOURCE_CPU: &str = "cpu";

/// A hint request for one container's resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub container_type: ContainerType,
    pub resource_name: String,
    /// Requested quantity per resource name; CPU is in whole-CPU units,
    /// fractional values round up.
    pub resource_requests: HashMap<String, f64>,
    /// The annotation bag — the only source of QoS/binding classification.
    pub annotations: HashMap<String, String>,
}

impl ResourceRequest {
    /// The whole-CPU request quantity, rounded up. Missing, non-finite, or
    /// negative quantities are rejected.
    pub fn cpu_quantity(&self) -> HintResult<u64> {
        let quantity =
            *self
                .resource_requests
                .get(RESOURCE_CPU)
                .ok_or_else(|| HintError::MalformedQuantity {
                    resource: RESOURCE_CPU.to_string(),
                    detail: "no quantity in request".to_string(),
                })?;
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(HintError::MalformedQuantity {
                resource: RESOURCE_CPU.to_string(),
                detail: format!("invalid quantity {quantity}"),
            });
        }
        Ok(quantity.ceil() as u64)
    }
}

/// One candidate placement: a NUMA subset and whether the downstream
/// selector should try it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyHint {
    pub nodes: Vec<u64>,
    pub preferred: bool,
}

/// Hint lists per resource name. `None` under a key means "no NUMA
/// preference — allocate freely"; an empty list means "no satisfiable
/// placement".
pub type ResourceHints = HashMap<String, Option<Vec<TopologyHint>>>;

/// Reply envelope: the request's identifying fields plus the hint map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHintsResponse {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub container_type: ContainerType,
    pub resource_name: String,
    pub resource_hints: ResourceHints,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_cpu(quantity: f64) -> ResourceRequest {
        ResourceRequest {
            pod_uid: "uid-1".to_string(),
            pod_namespace: "default".to_string(),
            pod_name: "web".to_string(),
            container_name: "main".to_string(),
            container_type: ContainerType::Primary,
            resource_name: RESOURCE_CPU.to_string(),
            resource_requests: HashMap::from([(RESOURCE_CPU.to_string(), quantity)]),
            annotations: HashMap::new(),
        }
    }

    #[test]
    fn cpu_quantity_rounds_up() {
        assert_eq!(request_with_cpu(4.0).cpu_quantity().unwrap(), 4);
        assert_eq!(request_with_cpu(2.5).cpu_quantity().unwrap(), 3);
        assert_eq!(request_with_cpu(0.0).cpu_quantity().unwrap(), 0);
    }

    #[test]
    fn cpu_quantity_rejects_missing_and_invalid() {
        let mut req = request_with_cpu(1.0);
        req.resource_requests.clear();
        assert!(matches!(
            req.cpu_quantity(),
            Err(HintError::MalformedQuantity { .. })
        ));

        assert!(request_with_cpu(-1.0).cpu_quantity().is_err());
        assert!(request_with_cpu(f64::NAN).cpu_quantity().is_err());
        assert!(request_with_cpu(f64::INFINITY).cpu_quantity().is_err());
    }
}
