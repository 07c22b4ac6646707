//! Rebuilding machine state from the registry.
//!
//! The registry is the source of truth; machine state is a projection of it
//! onto the topology. The engine triggers a rebuild after invalidating a
//! stale allocation record, and embedders rebuild after every allocation
//! commit.

use numahint_machine::{CpuSet, CpuTopology};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::numa::{MachineState, NumaNodeState};
use crate::types::PodEntries;

/// Project the registry onto the topology.
///
/// Dedicated-binding assignments are carved out of the node's default pool
/// into `allocated_cpu_set`; binding-shared containers stay resident in the
/// default pool and are accounted through their milli-CPU requests. Fails
/// on records referencing unknown NUMA nodes, CPUs outside the node, or
/// overlapping dedicated pins — the registry is never repaired here.
pub fn machine_state_from_entries(
    topology: &CpuTopology,
    entries: &PodEntries,
) -> StateResult<MachineState> {
    let mut machine_state = MachineState::new();
    for numa in topology.numa_nodes() {
        let cpus = topology
            .cpus_in_numa(numa)
            .map_err(|_| StateError::UnknownNuma(numa))?;
        machine_state.insert(
            numa,
            NumaNodeState {
                default_cpu_set: cpus.clone(),
                allocated_cpu_set: CpuSet::new(),
                entries: PodEntries::new(),
            },
        );
    }

    for entry in entries.containers() {
        for (&numa, cpus) in &entry.numa_allocation {
            let numa_cpus = topology
                .cpus_in_numa(numa)
                .map_err(|_| StateError::UnknownNuma(numa))?;
            if !cpus.is_subset_of(numa_cpus) {
                return Err(StateError::ForeignCpus {
                    pod_uid: entry.pod_uid.clone(),
                    container_name: entry.container_name.clone(),
                    numa,
                    cpus: cpus.difference(numa_cpus).to_string(),
                });
            }

            let node = machine_state
                .get_mut(numa)
                .ok_or(StateError::UnknownNuma(numa))?;

            if entry.is_dedicated_binding() {
                let overlap = node.allocated_cpu_set.intersection(cpus);
                if !overlap.is_empty() {
                    return Err(StateError::OverlappingAllocation {
                        numa,
                        cpus: overlap.to_string(),
                    });
                }
                node.allocated_cpu_set = node.allocated_cpu_set.union(cpus);
                node.default_cpu_set = node.default_cpu_set.difference(cpus);
            }

            node.entries.insert(entry.clone());
        }
    }

    debug!(
        numa_nodes = machine_state.numa_nodes().len(),
        containers = entries.len(),
        "machine state rebuilt from registry"
    );
    Ok(machine_state)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{ContainerType, PodEntry, QosLevel};

    fn topo() -> CpuTopology {
        CpuTopology::uniform(1, 2, 4).unwrap()
    }

    fn entry(uid: &str, qos: QosLevel, allocation: &[(usize, &[usize])]) -> PodEntry {
        PodEntry {
            pod_uid: uid.to_string(),
            pod_namespace: "default".to_string(),
            pod_name: format!("pod-{uid}"),
            container_name: "main".to_string(),
            container_type: ContainerType::Primary,
            qos_level: qos,
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
    fn empty_registry_projects_full_default_pools() {
        let ms = machine_state_from_entries(&topo(), &PodEntries::new()).unwrap();
        assert_eq!(ms.numa_nodes(), vec![0, 1]);
        assert_eq!(ms.get(0).unwrap().default_cpu_set.to_vec(), vec![0, 1, 2, 3]);
        assert!(ms.get(0).unwrap().allocated_cpu_set.is_empty());
    }

    #[test]
    fn dedicated_pins_move_out_of_default_pool() {
        let mut entries = PodEntries::new();
        entries.insert(entry("u1", QosLevel::Dedicated, &[(0, &[0, 1])]));

        let ms = machine_state_from_entries(&topo(), &entries).unwrap();
        let node = ms.get(0).unwrap();
        assert_eq!(node.allocated_cpu_set.to_vec(), vec![0, 1]);
        assert_eq!(node.default_cpu_set.to_vec(), vec![2, 3]);
        assert!(node.hosts_numa_binding());

        // Node 1 untouched.
        assert!(ms.get(1).unwrap().allocated_cpu_set.is_empty());
    }

    #[test]
    fn binding_shared_stays_in_default_pool() {
        let mut entries = PodEntries::new();
        entries.insert(entry("u1", QosLevel::Shared, &[(1, &[4, 5])]));

        let ms = machine_state_from_entries(&topo(), &entries).unwrap();
        let node = ms.get(1).unwrap();
        assert!(node.allocated_cpu_set.is_empty());
        assert_eq!(node.default_cpu_set.size(), 4);
        // Accounted through milli bookkeeping instead.
        assert_eq!(node.available_cpu_quantity(&CpuSet::new()), 2);
    }

    #[test]
    fn rejects_unknown_numa() {
        let mut entries = PodEntries::new();
        entries.insert(entry("u1", QosLevel::Dedicated, &[(7, &[0])]));

        assert!(matches!(
            machine_state_from_entries(&topo(), &entries),
            Err(StateError::UnknownNuma(7))
        ));
    }

    #[test]
    fn rejects_foreign_cpus() {
        // CPU 6 belongs to NUMA 1, not NUMA 0.
        let mut entries = PodEntries::new();
        entries.insert(entry("u1", QosLevel::Dedicated, &[(0, &[0, 6])]));

        assert!(matches!(
            machine_state_from_entries(&topo(), &entries),
            Err(StateError::ForeignCpus { numa: 0, .. })
        ));
    }

    #[test]
    fn rejects_overlapping_dedicated_pins() {
        let mut entries = PodEntries::new();
        entries.insert(entry("u1", QosLevel::Dedicated, &[(0, &[0, 1])]));
        entries.insert(entry("u2", QosLevel::Dedicated, &[(0, &[1, 2])]));

        assert!(matches!(
            machine_state_from_entries(&topo(), &entries),
            Err(StateError::OverlappingAllocation { numa: 0, .. })
        ));
    }
}
