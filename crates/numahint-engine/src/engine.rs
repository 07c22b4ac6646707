//! The hint calculation engine.
//!
//! `HintEngine` routes each request by QoS/binding class, replays or
//! invalidates prior allocation records, consults the sideband file, and
//! runs the per-flavor calculators:
//!
//! - **Dedicated + binding** — subset enumeration over NUMA masks, tightest
//!   fit preferred
//! - **Shared + binding** — single-NUMA candidates under anti-affinity and
//!   anti-starvation pre-filters, decorated by the configured prefer policy
//!
//! Hint generation reads consistent snapshots; the only write is the
//! registry invalidation when regeneration fails, which the state holder
//! performs atomically with the machine-state rebuild.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use numahint_machine::{iterate_masks, CpuSet, CpuTopology};
use numahint_state::{MachineState, PodEntries, StateProvider};

use crate::config::{HintConfig, HintPreferPolicy};
use crate::error::{HintError, HintResult};
use crate::pack::pack_resource_hints_response;
use crate::qos::{
    anti_affinity_group, classify, numa_binding_enabled, numa_exclusive_enabled, RequestClass,
};
use crate::regenerate::regenerate_hints;
use crate::request::{
    ContainerType, ResourceHints, ResourceHintsResponse, ResourceRequest, TopologyHint,
    RESOURCE_CPU,
};
use crate::sideband::hints_from_sideband_file;

/// NUMA topology hint generator for CPU requests.
pub struct HintEngine {
    topology: Arc<CpuTopology>,
    state: Arc<dyn StateProvider>,
    policy: HintPreferPolicy,
    prefer_low_threshold: f64,
    reserved_cpus: CpuSet,
    extra_state_file: Option<PathBuf>,
}

impl HintEngine {
    pub fn new(
        topology: Arc<CpuTopology>,
        state: Arc<dyn StateProvider>,
        config: HintConfig,
    ) -> HintResult<Self> {
        config.validate()?;
        Ok(Self {
            topology,
            state,
            policy: config.cpu_numa_hint_prefer_policy,
            prefer_low_threshold: config.cpu_numa_hint_prefer_low_threshold,
            reserved_cpus: config.reserved_cpus,
            extra_state_file: config.extra_state_file,
        })
    }

    /// Entry point: classify the request and produce its hint response.
    pub async fn get_topology_hints(
        &self,
        req: &ResourceRequest,
        cancel: &CancellationToken,
    ) -> HintResult<ResourceHintsResponse> {
        if cancel.is_cancelled() {
            return Err(HintError::Cancelled);
        }

        match classify(&req.annotations)? {
            RequestClass::SharedNoBind => Ok(pack_resource_hints_response(
                req,
                RESOURCE_CPU,
                no_preference(),
            )),
            RequestClass::SharedBind => self.shared_binding_hints(req, cancel).await,
            RequestClass::DedicatedNoBind => Err(HintError::Unsupported),
            RequestClass::DedicatedBind { .. } => self.dedicated_binding_hints(req, cancel).await,
        }
    }

    // ── Dedicated + binding ────────────────────────────────────────────

    async fn dedicated_binding_hints(
        &self,
        req: &ResourceRequest,
        cancel: &CancellationToken,
    ) -> HintResult<ResourceHintsResponse> {
        // Sidecars inherit the primary container's cpuset, so no
        // independent placement is computed.
        if req.container_type == ContainerType::Sidecar {
            return Ok(pack_resource_hints_response(
                req,
                RESOURCE_CPU,
                no_preference(),
            ));
        }

        let request_cpus = req.cpu_quantity()?;
        let mut machine_state = self.state.machine_state();
        let mut hints: Option<ResourceHints> = None;

        if let Some(entry) = self.state.allocation(&req.pod_uid, &req.container_name) {
            hints = regenerate_hints(&entry, request_cpus);
            if hints.is_none() {
                machine_state = self.invalidate(req)?;
            }
        }

        let hints = match hints {
            Some(hints) => hints,
            None => {
                let eligible = machine_state.filtered_numa_set(|s| !s.hosts_numa_binding());
                match self.consult_sideband(req, &eligible, cancel).await? {
                    Some(hints) => hints,
                    None => self.calculate_hints(request_cpus, &machine_state, req)?,
                }
            }
        };
        Ok(pack_resource_hints_response(req, RESOURCE_CPU, hints))
    }

    /// Subset enumeration for dedicated (and exclusive) workloads.
    ///
    /// Walks every non-empty subset of the snapshot's NUMA nodes in
    /// size-major order and emits those that can host the request; the
    /// minimum-cardinality subsets are preferred.
    fn calculate_hints(
        &self,
        request_cpus: u64,
        machine_state: &MachineState,
        req: &ResourceRequest,
    ) -> HintResult<ResourceHints> {
        let numa_nodes = machine_state.numa_nodes();
        let min_numas_needed = self.topology.numa_count_to_fit(request_cpus)?;

        let binding = numa_binding_enabled(&req.annotations);
        let exclusive = numa_exclusive_enabled(&req.annotations);

        // Memory allocation cannot be steered precisely across nodes, so a
        // bound-but-not-exclusive container must fit a single NUMA.
        if binding && !exclusive && min_numas_needed > 1 {
            return Err(HintError::RequestExceedsSingleNuma);
        }

        let numas_per_socket = self.topology.numas_per_socket()?;
        let mut hint_list = Vec::new();

        'masks: for mask in iterate_masks(&numa_nodes)? {
            let count = mask.count();
            if count < min_numas_needed {
                continue;
            }
            if binding && !exclusive && count > 1 {
                continue;
            }

            let members = mask.bits();
            let mut available = CpuSet::new();
            for &numa in &members {
                let Some(node) = machine_state.get(numa) else {
                    warn!(numa, "candidate NUMA has no recorded state, skipping subset");
                    continue 'masks;
                };
                if exclusive && !node.allocated_cpu_set.is_empty() {
                    warn!(
                        numa,
                        allocated = node.allocated_cpu_set.size(),
                        "exclusive request skips subset with occupied NUMA"
                    );
                    continue 'masks;
                }
                available = available.union(&node.available_cpu_set(&self.reserved_cpus));
            }

            if (available.size() as u64) < request_cpus {
                debug!(
                    subset = ?members,
                    available = available.size(),
                    request = request_cpus,
                    "subset below request, skipping"
                );
                continue;
            }

            // Prefer tight locality: when the subset could fit on one
            // socket, reject those spanning several.
            if count <= numas_per_socket && self.topology.cross_sockets(&members)? {
                debug!(subset = ?members, numas_per_socket, "subset crosses sockets, skipping");
                continue;
            }

            hint_list.push(TopologyHint {
                nodes: mask.to_u64_array(),
                preferred: count == min_numas_needed,
            });
        }

        Ok(HashMap::from([(RESOURCE_CPU.to_string(), Some(hint_list))]))
    }

    // ── Shared + binding ───────────────────────────────────────────────

    async fn shared_binding_hints(
        &self,
        req: &ResourceRequest,
        cancel: &CancellationToken,
    ) -> HintResult<ResourceHintsResponse> {
        if req.container_type == ContainerType::Sidecar {
            return Ok(pack_resource_hints_response(
                req,
                RESOURCE_CPU,
                no_preference(),
            ));
        }

        let request_cpus = req.cpu_quantity()?;
        let mut machine_state = self.state.machine_state();
        let mut pod_entries = self.state.pod_entries();
        let mut hints: Option<ResourceHints> = None;

        if let Some(entry) = self.state.allocation(&req.pod_uid, &req.container_name) {
            hints = regenerate_hints(&entry, request_cpus);
            if hints.is_none() {
                machine_state = self.invalidate(req)?;
                pod_entries = self.state.pod_entries();
            }
        }

        let hints = match hints {
            Some(hints) => hints,
            None => {
                let candidates = self.binding_shared_candidates(&pod_entries, &machine_state, req);
                let eligible: CpuSet = candidates.iter().copied().collect();
                match self.consult_sideband(req, &eligible, cancel).await? {
                    Some(hints) => hints,
                    None => self.calculate_hints_for_binding_shared(
                        request_cpus,
                        &candidates,
                        &machine_state,
                    )?,
                }
            }
        };
        Ok(pack_resource_hints_response(req, RESOURCE_CPU, hints))
    }

    /// NUMA candidates for a binding-shared request: anti-affinity filter
    /// first, then the anti-starvation filter protecting unbound shared
    /// capacity. Ascending NUMA id order.
    fn binding_shared_candidates(
        &self,
        pod_entries: &PodEntries,
        machine_state: &MachineState,
        req: &ResourceRequest,
    ) -> Vec<usize> {
        let unbound_numas = machine_state.filtered_numa_set(|s| !s.hosts_numa_binding());
        let unbound_cpus = machine_state
            .filtered_available_cpu_set(&self.reserved_cpus, |s| !s.hosts_numa_binding())
            .size() as u64;
        let unbound_demand = pod_entries.non_binding_shared_requested_cpus();

        let group = anti_affinity_group(&req.annotations);
        let candidates = machine_state.filtered_numa_set(|s| match group {
            Some(group) => !s.hosts_anti_affinity_group(group),
            None => true,
        });

        self.filter_numas_by_unbound_shared_demand(
            unbound_demand,
            unbound_cpus,
            &unbound_numas,
            machine_state,
            candidates.to_vec(),
        )
    }

    /// Drop unbound NUMA nodes whose removal from the unbound pool would
    /// leave currently placed shared workloads short of capacity. Bound
    /// nodes pass unconditionally.
    fn filter_numas_by_unbound_shared_demand(
        &self,
        unbound_demand: u64,
        unbound_cpus: u64,
        unbound_numas: &CpuSet,
        machine_state: &MachineState,
        numa_nodes: Vec<usize>,
    ) -> Vec<usize> {
        let mut kept = Vec::with_capacity(numa_nodes.len());
        for numa in numa_nodes {
            if !unbound_numas.contains(numa) {
                kept.push(numa);
                continue;
            }
            let allocatable = machine_state
                .get(numa)
                .map(|s| s.allocatable_cpu_quantity(&self.reserved_cpus))
                .unwrap_or(0);
            if unbound_cpus.saturating_sub(allocatable) >= unbound_demand {
                kept.push(numa);
            } else {
                info!(
                    numa,
                    unbound_cpus,
                    allocatable,
                    unbound_demand,
                    "NUMA filtered out to keep unbound shared workloads supplied"
                );
            }
        }
        kept
    }

    /// Single-NUMA hints for binding-shared workloads, decorated by the
    /// configured prefer policy.
    fn calculate_hints_for_binding_shared(
        &self,
        request_cpus: u64,
        candidates: &[usize],
        machine_state: &MachineState,
    ) -> HintResult<ResourceHints> {
        let min_numas_needed = self.topology.numa_count_to_fit(request_cpus)?;

        // Above one NUMA the workload would degrade to unbound behavior.
        if min_numas_needed > 1 {
            return Err(HintError::RequestExceedsSingleNuma);
        }

        let mut hint_list = Vec::new();
        match self.policy {
            HintPreferPolicy::Packing | HintPreferPolicy::Spreading => {
                info!(policy = ?self.policy, numa_nodes = ?candidates, "applying prefer policy");
                self.populate_hints_by_prefer_policy(
                    candidates,
                    self.policy,
                    machine_state,
                    request_cpus,
                    &mut hint_list,
                );
            }
            HintPreferPolicy::DynamicPacking => {
                let (low_util, high_util) =
                    self.filter_numas_by_low_threshold(candidates, machine_state);
                if !low_util.is_empty() {
                    info!(numa_nodes = ?low_util, "dynamically applying packing policy");
                    self.populate_hints_by_prefer_policy(
                        &low_util,
                        HintPreferPolicy::Packing,
                        machine_state,
                        request_cpus,
                        &mut hint_list,
                    );
                    self.populate_not_preferred_hints(
                        &high_util,
                        machine_state,
                        request_cpus,
                        &mut hint_list,
                    );
                } else {
                    info!(
                        numa_nodes = ?candidates,
                        "no lightly loaded NUMA, dynamically applying spreading policy"
                    );
                    self.populate_hints_by_prefer_policy(
                        candidates,
                        HintPreferPolicy::Spreading,
                        machine_state,
                        request_cpus,
                        &mut hint_list,
                    );
                }
            }
            HintPreferPolicy::Unknown => {
                info!(numa_nodes = ?candidates, "unknown prefer policy, applying spreading policy");
                self.populate_hints_by_prefer_policy(
                    candidates,
                    HintPreferPolicy::Spreading,
                    machine_state,
                    request_cpus,
                    &mut hint_list,
                );
            }
        }

        Ok(HashMap::from([(RESOURCE_CPU.to_string(), Some(hint_list))]))
    }

    /// Emit one single-NUMA hint per candidate that can host the request,
    /// marking every tied winner of the policy's headroom criterion as
    /// preferred (packing minimizes leftover, spreading maximizes it).
    fn populate_hints_by_prefer_policy(
        &self,
        numa_nodes: &[usize],
        policy: HintPreferPolicy,
        machine_state: &MachineState,
        request_cpus: u64,
        hints: &mut Vec<TopologyHint>,
    ) {
        let mut prefer_indexes: Vec<usize> = Vec::new();
        let mut best_left: Option<u64> = None;

        for &numa in numa_nodes {
            let Some(node) = machine_state.get(numa) else {
                warn!(numa, "candidate NUMA has no recorded state, skipping");
                continue;
            };
            let available = node.available_cpu_quantity(&self.reserved_cpus);
            if available < request_cpus {
                warn!(
                    numa,
                    available,
                    request = request_cpus,
                    "binding-shared request skips NUMA below capacity"
                );
                continue;
            }

            hints.push(TopologyHint {
                nodes: vec![numa as u64],
                preferred: false,
            });
            let left = available - request_cpus;
            info!(numa, left, "candidate NUMA admitted");

            let better = match best_left {
                None => true,
                Some(best) => match policy {
                    HintPreferPolicy::Packing => left < best,
                    _ => left > best,
                },
            };
            if better {
                best_left = Some(left);
                prefer_indexes = vec![hints.len() - 1];
            } else if best_left == Some(left) {
                prefer_indexes.push(hints.len() - 1);
            }
        }

        for index in prefer_indexes {
            hints[index].preferred = true;
        }
    }

    /// Emit heavily loaded candidates as admissible fallbacks. The
    /// capacity filter still applies: a NUMA below the request is dropped
    /// regardless of policy.
    fn populate_not_preferred_hints(
        &self,
        numa_nodes: &[usize],
        machine_state: &MachineState,
        request_cpus: u64,
        hints: &mut Vec<TopologyHint>,
    ) {
        for &numa in numa_nodes {
            let Some(node) = machine_state.get(numa) else {
                warn!(numa, "candidate NUMA has no recorded state, skipping");
                continue;
            };
            if node.available_cpu_quantity(&self.reserved_cpus) < request_cpus {
                continue;
            }
            hints.push(TopologyHint {
                nodes: vec![numa as u64],
                preferred: false,
            });
        }
    }

    /// Split candidates by the available/allocatable ratio against the
    /// configured threshold. Nodes with a zero allocatable pool are
    /// dropped from both halves.
    fn filter_numas_by_low_threshold(
        &self,
        numa_nodes: &[usize],
        machine_state: &MachineState,
    ) -> (Vec<usize>, Vec<usize>) {
        let mut low_util = Vec::new();
        let mut high_util = Vec::new();

        for &numa in numa_nodes {
            let Some(node) = machine_state.get(numa) else {
                warn!(numa, "candidate NUMA has no recorded state, skipping");
                continue;
            };
            let available = node.available_cpu_quantity(&self.reserved_cpus);
            let allocatable = node.allocatable_cpu_quantity(&self.reserved_cpus);
            if allocatable == 0 {
                warn!(numa, "allocatable cpu quantity is zero, skipping");
                continue;
            }

            let ratio = available as f64 / allocatable as f64;
            debug!(
                numa,
                available,
                allocatable,
                ratio,
                threshold = self.prefer_low_threshold,
                "utilization split"
            );
            if ratio >= self.prefer_low_threshold {
                low_util.push(numa);
            } else {
                high_util.push(numa);
            }
        }

        (low_util, high_util)
    }

    // ── Shared plumbing ────────────────────────────────────────────────

    fn invalidate(&self, req: &ResourceRequest) -> HintResult<MachineState> {
        self.state
            .invalidate_allocation(&req.pod_uid, &req.container_name)
            .map_err(|e| {
                error!(
                    namespace = %req.pod_namespace,
                    pod = %req.pod_name,
                    container = %req.container_name,
                    error = %e,
                    "machine state rebuild after invalidation failed"
                );
                HintError::MachineStateRebuild(e)
            })
    }

    async fn consult_sideband(
        &self,
        req: &ResourceRequest,
        eligible: &CpuSet,
        cancel: &CancellationToken,
    ) -> HintResult<Option<ResourceHints>> {
        let Some(path) = &self.extra_state_file else {
            return Ok(None);
        };

        let found =
            match hints_from_sideband_file(path, &req.pod_name, RESOURCE_CPU, eligible).await {
                Ok(found) => found,
                Err(e) => {
                    info!(
                        namespace = %req.pod_namespace,
                        pod = %req.pod_name,
                        container = %req.container_name,
                        error = %e,
                        "sideband hint lookup failed, falling through to calculation"
                    );
                    None
                }
            };

        if cancel.is_cancelled() {
            return Err(HintError::Cancelled);
        }
        Ok(found)
    }
}

fn no_preference() -> ResourceHints {
    HashMap::from([(RESOURCE_CPU.to_string(), None)])
}
