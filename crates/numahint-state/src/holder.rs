//! The state-holder seam.
//!
//! The hint engine reads consistent snapshots through `StateProvider` and
//! performs exactly one kind of write: invalidating a stale allocation
//! record, which must be atomic with the machine-state rebuild that follows.
//! `InMemoryState` is the reference implementation; agents with their own
//! state plumbing implement the trait over it.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use numahint_machine::CpuTopology;

use crate::error::StateResult;
use crate::generate::machine_state_from_entries;
use crate::numa::MachineState;
use crate::types::{PodEntries, PodEntry};

/// Snapshot reads plus the single engine-triggered write.
///
/// Snapshot getters must return state that cannot mutate underneath the
/// caller for the duration of a request; two readers of the same snapshot
/// must observe identical state.
pub trait StateProvider: Send + Sync {
    /// Consistent snapshot of the per-NUMA allocation state.
    fn machine_state(&self) -> MachineState;

    /// Consistent snapshot of the registry.
    fn pod_entries(&self) -> PodEntries;

    /// The allocation record for one container, if any.
    fn allocation(&self, pod_uid: &str, container_name: &str) -> Option<PodEntry>;

    /// Drop a stale allocation record (pruning the pod when it was the last
    /// container), rebuild machine state from the remaining registry, commit
    /// both, and return the fresh machine-state snapshot. The whole sequence
    /// happens under the holder's exclusive lock.
    fn invalidate_allocation(
        &self,
        pod_uid: &str,
        container_name: &str,
    ) -> StateResult<MachineState>;
}

struct Inner {
    machine_state: MachineState,
    pod_entries: PodEntries,
}

/// In-memory state holder: a shared handle over the registry and its
/// machine-state projection, rebuilt on every write.
pub struct InMemoryState {
    topology: CpuTopology,
    inner: RwLock<Inner>,
}

impl InMemoryState {
    pub fn new(topology: CpuTopology) -> StateResult<Self> {
        let pod_entries = PodEntries::new();
        let machine_state = machine_state_from_entries(&topology, &pod_entries)?;
        Ok(Self {
            topology,
            inner: RwLock::new(Inner {
                machine_state,
                pod_entries,
            }),
        })
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    /// Commit an allocation record and rebuild the machine state. On a
    /// rebuild error the previous state is kept.
    pub fn set_allocation(&self, entry: PodEntry) -> StateResult<()> {
        let mut inner = self.write();
        let mut entries = inner.pod_entries.clone();
        entries.insert(entry);
        let machine_state = machine_state_from_entries(&self.topology, &entries)?;
        inner.pod_entries = entries;
        inner.machine_state = machine_state;
        Ok(())
    }

    // A poisoned lock only means a writer panicked mid-rebuild; the data is
    // plain values, so recover the guard rather than cascade the panic.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateProvider for InMemoryState {
    fn machine_state(&self) -> MachineState {
        self.read().machine_state.clone()
    }

    fn pod_entries(&self) -> PodEntries {
        self.read().pod_entries.clone()
    }

    fn allocation(&self, pod_uid: &str, container_name: &str) -> Option<PodEntry> {
        self.read().pod_entries.get(pod_uid, container_name).cloned()
    }

    fn invalidate_allocation(
        &self,
        pod_uid: &str,
        container_name: &str,
    ) -> StateResult<MachineState> {
        let mut inner = self.write();
        let mut entries = inner.pod_entries.clone();
        let removed = entries.remove_container(pod_uid, container_name);
        let machine_state = machine_state_from_entries(&self.topology, &entries)?;
        inner.pod_entries = entries;
        inner.machine_state = machine_state.clone();

        if removed.is_some() {
            info!(%pod_uid, %container_name, "stale allocation record invalidated");
        }
        Ok(machine_state)
    }
}
