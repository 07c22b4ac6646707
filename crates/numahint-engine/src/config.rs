//! Engine configuration.
//!
//! Parsed from TOML:
//!
//! ```toml
//! cpu_numa_hint_prefer_policy = "dynamic_packing"
//! cpu_numa_hint_prefer_low_threshold = 0.5
//! reserved_cpus = "0-1"
//! extra_state_file = "/etc/node-agent/hints.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use numahint_machine::CpuSet;

use crate::error::{HintError, HintResult};

/// How binding-shared hints pick their preferred NUMA nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintPreferPolicy {
    /// Prefer the NUMA nodes leaving the least headroom after allocation.
    #[default]
    Packing,
    /// Prefer the NUMA nodes leaving the most headroom.
    Spreading,
    /// Packing among lightly loaded nodes, spreading otherwise.
    DynamicPacking,
    /// Unrecognized configuration value; treated as spreading at runtime.
    #[serde(other)]
    Unknown,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    pub cpu_numa_hint_prefer_policy: HintPreferPolicy,
    /// Available/allocatable ratio above which a NUMA node counts as
    /// lightly loaded for dynamic packing. Must be within `[0.0, 1.0]`.
    pub cpu_numa_hint_prefer_low_threshold: f64,
    /// CPUs excluded from all accounting (system-reserved cores).
    pub reserved_cpus: CpuSet,
    /// Optional sideband hint file path.
    pub extra_state_file: Option<PathBuf>,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            cpu_numa_hint_prefer_policy: HintPreferPolicy::default(),
            cpu_numa_hint_prefer_low_threshold: 0.5,
            reserved_cpus: CpuSet::new(),
            extra_state_file: None,
        }
    }
}

impl HintConfig {
    pub fn from_file(path: &Path) -> HintResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HintError::Config(format!("{}: {e}", path.display())))?;
        let config: HintConfig = toml::from_str(&content)
            .map_err(|e| HintError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HintResult<()> {
        let threshold = self.cpu_numa_hint_prefer_low_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(HintError::Config(format!(
                "cpu_numa_hint_prefer_low_threshold {threshold} outside [0.0, 1.0]"
            )));
        }
        Ok(())
    }
}
