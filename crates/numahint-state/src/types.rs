//! Allocation records and the pod-entry registry.
//!
//! A `PodEntry` is created when an allocation commits, mutated only on
//! re-allocation, and removed when the container goes away or its record is
//! invalidated during hint regeneration. The registry is keyed
//! (pod-uid, container-name); removing a pod's last container drops the pod.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use numahint_machine::CpuSet;

/// Quality-of-service flavor of a placed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    Shared,
    Reclaimed,
    Dedicated,
}

impl QosLevel {
    /// Reclaimed workloads route and account exactly like shared ones.
    pub fn is_shared_like(self) -> bool {
        matches!(self, QosLevel::Shared | QosLevel::Reclaimed)
    }
}

/// Role of the container within its pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Primary,
    Sidecar,
    Init,
}

/// Allocation record for one (pod, container).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodEntry {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub container_type: ContainerType,
    pub qos_level: QosLevel,
    /// Pinned to the NUMA nodes of its allocation.
    pub numa_binding: bool,
    /// No co-tenant allowed on those nodes.
    pub numa_exclusive: bool,
    /// Members of the same group repel each other across NUMA nodes.
    pub anti_affinity_group: Option<String>,
    /// Requested CPU in milli-units (1000 = one whole CPU).
    pub request_milli: u64,
    /// Granted CPUs, per NUMA node.
    pub numa_allocation: BTreeMap<usize, CpuSet>,
}

impl PodEntry {
    /// Whole-CPU request, rounded up.
    pub fn request_cpus(&self) -> u64 {
        self.request_milli.div_ceil(1000)
    }

    /// Union of the granted CPUs across NUMA nodes.
    pub fn allocation(&self) -> CpuSet {
        let mut all = CpuSet::new();
        for cpus in self.numa_allocation.values() {
            all = all.union(cpus);
        }
        all
    }

    /// NUMA ids carrying a non-empty share of the allocation, ascending.
    pub fn numa_set(&self) -> Vec<usize> {
        self.numa_allocation
            .iter()
            .filter(|(_, cpus)| !cpus.is_empty())
            .map(|(&numa, _)| numa)
            .collect()
    }

    /// Shared-flavor container pinned to its NUMA node(s).
    pub fn is_numa_binding_shared(&self) -> bool {
        self.qos_level.is_shared_like() && self.numa_binding
    }

    /// Shared-flavor container free to roam the default pool.
    pub fn is_non_binding_shared(&self) -> bool {
        self.qos_level.is_shared_like() && !self.numa_binding
    }

    /// Dedicated container pinned to its NUMA node(s).
    pub fn is_dedicated_binding(&self) -> bool {
        self.qos_level == QosLevel::Dedicated && self.numa_binding
    }
}

/// Registry of allocation records: pod-uid → container-name → entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodEntries(BTreeMap<String, BTreeMap<String, PodEntry>>);

impl PodEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for (entry.pod_uid, entry.container_name).
    pub fn insert(&mut self, entry: PodEntry) {
        self.0
            .entry(entry.pod_uid.clone())
            .or_default()
            .insert(entry.container_name.clone(), entry);
    }

    pub fn get(&self, pod_uid: &str, container_name: &str) -> Option<&PodEntry> {
        self.0.get(pod_uid)?.get(container_name)
    }

    /// Remove a container record; the pod key is dropped with its last
    /// container. Returns the removed entry, if any.
    pub fn remove_container(&mut self, pod_uid: &str, container_name: &str) -> Option<PodEntry> {
        let containers = self.0.get_mut(pod_uid)?;
        let removed = containers.remove(container_name);
        if containers.is_empty() {
            self.0.remove(pod_uid);
        }
        removed
    }

    /// All records, ordered by (pod-uid, container-name).
    pub fn containers(&self) -> impl Iterator<Item = &PodEntry> {
        self.0.values().flat_map(|c| c.values())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of container records across all pods.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn pod_count(&self) -> usize {
        self.0.len()
    }

    /// Whole CPUs requested by shared-without-binding containers. This is
    /// the demand the anti-starvation filter protects when a NUMA node is
    /// taken out of the unbound pool.
    pub fn non_binding_shared_requested_cpus(&self) -> u64 {
        self.containers()
            .filter(|e| e.is_non_binding_shared())
            .map(PodEntry::request_cpus)
            .sum()
    }
}
