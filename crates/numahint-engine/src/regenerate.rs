//! Replaying hints from an existing allocation record.
//!
//! When a container re-requests hints (restart, re-admission), the prior
//! allocation wins as long as it still covers the request. `None` is the
//! invalidation sentinel: the caller must drop the record and recompute.

use std::collections::HashMap;

use tracing::warn;

use numahint_state::PodEntry;

use crate::request::{ResourceHints, TopologyHint, RESOURCE_CPU};

/// Rebuild hints from an allocation record, or signal invalidation.
///
/// Succeeds only if the stored allocation is internally consistent (a
/// non-empty CPU grant on at least one NUMA node) and still satisfies
/// `request_cpus`. The regenerated hint is the allocation's NUMA set,
/// preferred.
pub fn regenerate_hints(entry: &PodEntry, request_cpus: u64) -> Option<ResourceHints> {
    let allocation = entry.allocation();
    if (allocation.size() as u64) < request_cpus {
        warn!(
            pod_uid = %entry.pod_uid,
            container = %entry.container_name,
            allocated = allocation.size(),
            request = request_cpus,
            "allocation no longer covers request, invalidating"
        );
        return None;
    }

    let numa_set = entry.numa_set();
    if allocation.is_empty() || numa_set.is_empty() {
        warn!(
            pod_uid = %entry.pod_uid,
            container = %entry.container_name,
            "allocation record carries no cpus, invalidating"
        );
        return None;
    }

    let hint = TopologyHint {
        nodes: numa_set.into_iter().map(|n| n as u64).collect(),
        preferred: true,
    };
    Some(HashMap::from([(
        RESOURCE_CPU.to_string(),
        Some(vec![hint]),
    )]))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use numahint_state::{ContainerType, PodEntry, QosLevel};

    fn entry(allocation: &[(usize, &[usize])]) -> PodEntry {
        PodEntry {
            pod_uid: "uid-1".to_string(),
            pod_namespace: "default".to_string(),
            pod_name: "web".to_string(),
            container_name: "main".to_string(),
            container_type: ContainerType::Primary,
            qos_level: QosLevel::Dedicated,
            numa_binding: true,
            numa_exclusive: false,
            anti_affinity_group: None,
            request_milli: 2000,
            numa_allocation: allocation
                .iter()
                .map(|(numa, cpus)| (*numa, cpus.iter().copied().collect()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn regenerates_numa_set_as_preferred_hint() {
        let hints = regenerate_hints(&entry(&[(0, &[0, 1]), (1, &[8, 9])]), 4).unwrap();
        let cpu_hints = hints[RESOURCE_CPU].as_ref().unwrap();
        assert_eq!(
            cpu_hints,
            &vec![TopologyHint {
                nodes: vec![0, 1],
                preferred: true,
            }]
        );
    }

    #[test]
    fn exact_fit_still_regenerates() {
        assert!(regenerate_hints(&entry(&[(0, &[0, 1])]), 2).is_some());
    }

    #[test]
    fn undersized_allocation_invalidates() {
        assert!(regenerate_hints(&entry(&[(0, &[0, 1])]), 3).is_none());
    }

    #[test]
    fn empty_allocation_invalidates() {
        assert!(regenerate_hints(&entry(&[]), 0).is_none());
        assert!(regenerate_hints(&entry(&[(0, &[])]), 0).is_none());
    }
}
