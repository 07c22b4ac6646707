//! numahint-machine — CPU topology primitives for NUMA hint generation.
//!
//! This crate holds the leaf types the hint engine computes over:
//!
//! - **`cpuset`** — Ordered sets of logical CPU ids with set arithmetic
//!   and kernel-cpulist formatting
//! - **`mask`** — Bitmask enumeration over NUMA node subsets
//! - **`topology`** — The static socket/NUMA/CPU partition of a node
//!
//! Everything here is a pure value type; discovery of the actual machine
//! layout belongs to the embedding agent.

pub mod cpuset;
pub mod mask;
pub mod topology;

pub use cpuset::CpuSet;
pub use mask::{iterate_masks, NumaMask};
pub use topology::{CpuTopology, TopologyError, TopologyResult};
