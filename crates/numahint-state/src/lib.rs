//! numahint-state — allocation state for NUMA hint generation.
//!
//! Holds the registry of placed containers and the per-NUMA view the hint
//! calculators read:
//!
//! - **`types`** — `PodEntry` allocation records and the `PodEntries` registry
//! - **`numa`** — `NumaNodeState` / `MachineState` read-side views
//! - **`generate`** — rebuilding machine state from the registry
//! - **`holder`** — the `StateProvider` seam and an in-memory reference
//!   implementation
//!
//! All view operations are pure functions over a snapshot; the single write
//! path is `StateProvider::invalidate_allocation`.

pub mod error;
pub mod generate;
pub mod holder;
pub mod numa;
pub mod types;

pub use error::{StateError, StateResult};
pub use generate::machine_state_from_entries;
pub use holder::{InMemoryState, StateProvider};
pub use numa::{MachineState, NumaNodeState};
pub use types::{ContainerType, PodEntries, PodEntry, QosLevel};
