//! Operator-authored sideband hints.
//!
//! An optional JSON file maps pod name → resource name → hint list,
//! letting operators steer placement ahead of calculation. The file is
//! advisory: read errors are surfaced to the caller, which logs and falls
//! through; hints touching NUMA nodes outside the currently eligible set
//! are dropped.
//!
//! ```json
//! { "web": { "cpu": [ { "nodes": [1], "preferred": true } ] } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use numahint_machine::CpuSet;

use crate::error::{HintError, HintResult};
use crate::request::{ResourceHints, TopologyHint};

#[derive(Debug, Deserialize)]
struct SidebandHint {
    nodes: Vec<u64>,
    #[serde(default)]
    preferred: bool,
}

type SidebandHintFile = HashMap<String, HashMap<String, Vec<SidebandHint>>>;

/// Look up sideband hints for (pod, resource), restricted to `eligible`
/// NUMA nodes. `Ok(None)` means no usable entry — the caller proceeds to
/// calculation.
pub async fn hints_from_sideband_file(
    path: &Path,
    pod_name: &str,
    resource_name: &str,
    eligible: &CpuSet,
) -> HintResult<Option<ResourceHints>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HintError::SidebandRead(format!("{}: {e}", path.display())))?;
    let file: SidebandHintFile = serde_json::from_str(&raw)
        .map_err(|e| HintError::SidebandRead(format!("{}: {e}", path.display())))?;

    let Some(hint_lists) = file.get(pod_name) else {
        return Ok(None);
    };
    let Some(raw_hints) = hint_lists.get(resource_name) else {
        return Ok(None);
    };

    let mut hints = Vec::with_capacity(raw_hints.len());
    for hint in raw_hints {
        let in_range = hint
            .nodes
            .iter()
            .all(|&n| usize::try_from(n).is_ok_and(|n| eligible.contains(n)));
        if !in_range {
            warn!(
                pod = pod_name,
                nodes = ?hint.nodes,
                eligible = %eligible,
                "sideband hint touches ineligible NUMA nodes, dropping"
            );
            continue;
        }
        hints.push(TopologyHint {
            nodes: hint.nodes.clone(),
            preferred: hint.preferred,
        });
    }

    if hints.is_empty() {
        return Ok(None);
    }
    Ok(Some(HashMap::from([(
        resource_name.to_string(),
        Some(hints),
    )])))
}
