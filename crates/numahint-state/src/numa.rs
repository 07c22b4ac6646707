//! Per-NUMA allocation state and the machine-state view.
//!
//! `MachineState` is the read-side projection the hint calculators work
//! over: for every NUMA node, which CPUs are pooled, which are pinned to
//! dedicated containers, and which containers currently live there. All
//! operations are pure over the snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use numahint_machine::CpuSet;

use crate::types::{PodEntries, PodEntry};

/// Allocation state of one NUMA node.
///
/// Invariant: `default_cpu_set` and `allocated_cpu_set` are disjoint subsets
/// of the node's CPUs — dedicated pins are carved out of the default pool
/// when the state is (re)built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumaNodeState {
    /// Pool from which shared allocations are drawn.
    pub default_cpu_set: CpuSet,
    /// CPUs pinned to dedicated containers bound to this node.
    pub allocated_cpu_set: CpuSet,
    /// Containers currently resident on this node.
    pub entries: PodEntries,
}

impl NumaNodeState {
    /// CPUs offerable to a new allocation: default \ reserved \ allocated.
    pub fn available_cpu_set(&self, reserved: &CpuSet) -> CpuSet {
        self.default_cpu_set
            .difference(reserved)
            .difference(&self.allocated_cpu_set)
    }

    /// Whole-CPU slots left for a binding-shared allocation: the available
    /// set minus the milli-CPU demand of binding-shared residents, floored.
    /// Shared residents over-subscribe, so this can undercut the set size
    /// but never goes negative.
    pub fn available_cpu_quantity(&self, reserved: &CpuSet) -> u64 {
        let available_milli = self.available_cpu_set(reserved).size() as u64 * 1000;
        let resident_milli: u64 = self
            .entries
            .containers()
            .filter(|e| e.is_numa_binding_shared())
            .map(|e| e.request_milli)
            .sum();
        available_milli.saturating_sub(resident_milli) / 1000
    }

    /// Size of the pool before per-container accounting: |default \ reserved|.
    pub fn allocatable_cpu_quantity(&self, reserved: &CpuSet) -> u64 {
        self.default_cpu_set.difference(reserved).size() as u64
    }

    /// Whether any resident container satisfies `pred`.
    pub fn hosts(&self, pred: impl Fn(&PodEntry) -> bool) -> bool {
        self.entries.containers().any(|e| pred(e))
    }

    /// Whether any resident container is NUMA-bound (shared or dedicated).
    pub fn hosts_numa_binding(&self) -> bool {
        self.hosts(|e| e.numa_binding)
    }

    /// Whether a binding-shared resident belongs to `group`.
    pub fn hosts_anti_affinity_group(&self, group: &str) -> bool {
        self.hosts(|e| {
            e.is_numa_binding_shared() && e.anti_affinity_group.as_deref() == Some(group)
        })
    }
}

/// Snapshot of all NUMA node states, keyed by NUMA id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineState(BTreeMap<usize, NumaNodeState>);

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, numa: usize, state: NumaNodeState) {
        self.0.insert(numa, state);
    }

    pub fn get(&self, numa: usize) -> Option<&NumaNodeState> {
        self.0.get(&numa)
    }

    pub fn get_mut(&mut self, numa: usize) -> Option<&mut NumaNodeState> {
        self.0.get_mut(&numa)
    }

    /// NUMA ids in ascending order.
    pub fn numa_nodes(&self) -> Vec<usize> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &NumaNodeState)> {
        self.0.iter().map(|(&numa, state)| (numa, state))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NUMA ids whose state satisfies `pred`, as a set.
    pub fn filtered_numa_set(&self, pred: impl Fn(&NumaNodeState) -> bool) -> CpuSet {
        self.iter()
            .filter(|(_, state)| pred(state))
            .map(|(numa, _)| numa)
            .collect()
    }

    /// Union of per-NUMA availability over nodes satisfying `pred`.
    pub fn filtered_available_cpu_set(
        &self,
        reserved: &CpuSet,
        pred: impl Fn(&NumaNodeState) -> bool,
    ) -> CpuSet {
        let mut all = CpuSet::new();
        for (_, state) in self.iter().filter(|(_, state)| pred(state)) {
            all = all.union(&state.available_cpu_set(reserved));
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{ContainerType, QosLevel};

    fn entry(uid: &str, qos: QosLevel, binding: bool, milli: u64) -> PodEntry {
        PodEntry {
            pod_uid: uid.to_string(),
            pod_namespace: "default".to_string(),
            pod_name: format!("pod-{uid}"),
            container_name: "main".to_string(),
            container_type: ContainerType::Primary,
            qos_level: qos,
            numa_binding: binding,
            numa_exclusive: false,
            anti_affinity_group: None,
            request_milli: milli,
            numa_allocation: BTreeMap::new(),
        }
    }

    fn node(default: &[usize], allocated: &[usize]) -> NumaNodeState {
        NumaNodeState {
            default_cpu_set: default.iter().copied().collect(),
            allocated_cpu_set: allocated.iter().copied().collect(),
            entries: PodEntries::new(),
        }
    }

    #[test]
    fn available_set_subtracts_reserved_and_allocated() {
        let state = node(&[0, 1, 2, 3], &[3]);
        let reserved: CpuSet = [0].into_iter().collect();

        assert_eq!(state.available_cpu_set(&reserved).to_vec(), vec![1, 2]);
        assert_eq!(state.available_cpu_set(&CpuSet::new()).to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn quantity_subtracts_binding_shared_milli() {
        let mut state = node(&[0, 1, 2, 3], &[]);
        state.entries.insert(entry("u1", QosLevel::Shared, true, 1500));
        state.entries.insert(entry("u2", QosLevel::Shared, false, 9000)); // unbound, not counted
        state.entries.insert(entry("u3", QosLevel::Reclaimed, true, 400));

        // 4000 milli available, 1900 milli bound-shared resident → 2 whole.
        assert_eq!(state.available_cpu_quantity(&CpuSet::new()), 2);
    }

    #[test]
    fn quantity_saturates_at_zero() {
        let mut state = node(&[0], &[]);
        state.entries.insert(entry("u1", QosLevel::Shared, true, 5000));
        assert_eq!(state.available_cpu_quantity(&CpuSet::new()), 0);
    }

    #[test]
    fn allocatable_ignores_residents() {
        let mut state = node(&[0, 1, 2, 3], &[]);
        state.entries.insert(entry("u1", QosLevel::Shared, true, 1500));
        let reserved: CpuSet = [0, 1].into_iter().collect();
        assert_eq!(state.allocatable_cpu_quantity(&reserved), 2);
    }

    #[test]
    fn residency_predicates() {
        let mut state = node(&[0, 1], &[]);
        assert!(!state.hosts_numa_binding());

        let mut grouped = entry("u1", QosLevel::Shared, true, 1000);
        grouped.anti_affinity_group = Some("db".to_string());
        state.entries.insert(grouped);

        assert!(state.hosts_numa_binding());
        assert!(state.hosts_anti_affinity_group("db"));
        assert!(!state.hosts_anti_affinity_group("web"));
    }

    #[test]
    fn filtered_numa_set_selects_matching_nodes() {
        let mut ms = MachineState::new();
        let mut bound = node(&[0, 1], &[]);
        bound.entries.insert(entry("u1", QosLevel::Shared, true, 1000));
        ms.insert(0, bound);
        ms.insert(1, node(&[2, 3], &[]));

        let unbound = ms.filtered_numa_set(|s| !s.hosts_numa_binding());
        assert_eq!(unbound.to_vec(), vec![1]);
    }

    #[test]
    fn filtered_available_cpu_set_unions_matching_nodes() {
        let mut ms = MachineState::new();
        let mut bound = node(&[0, 1], &[]);
        bound.entries.insert(entry("u1", QosLevel::Dedicated, true, 1000));
        ms.insert(0, bound);
        ms.insert(1, node(&[2, 3], &[3]));
        ms.insert(2, node(&[4, 5], &[]));

        let reserved: CpuSet = [4].into_iter().collect();
        let avail = ms.filtered_available_cpu_set(&reserved, |s| !s.hosts_numa_binding());
        assert_eq!(avail.to_vec(), vec![2, 5]);
    }
}
