//! Resolution of configuration layers and CLI flags into a [`RunSpec`].

mod layer;
mod resolver;

pub use layer::{
    CliFlags, ConfigLayer, ConfigValue, SelectionInput, SharingGroupLayer, WorkloadOverrideLayer,
};
pub use resolver::ConfigResolver;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::workload::WorkloadDefinition;

/// Built-in defaults, the lowest-precedence configuration layer.
pub mod defaults {
    use std::time::Duration;

    pub const TIMEOUT: Duration = Duration::from_secs(60 * 60);
    pub const GRACE_PERIOD: Duration = Duration::from_secs(5);
    pub const DELAY: Duration = Duration::ZERO;
    pub const MAX_ITERATIONS: u32 = 1000;
    pub const REPEAT: u32 = 1;
    pub const SEED: u64 = 12345;
    pub const MAX_SEED: u64 = 1_000_000_000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Concurrency {
    Unbounded,
    Limited(u32),
}

impl Concurrency {
    /// Number of workers needed to drive `instances` instances.
    pub fn workers_for(&self, instances: usize) -> usize {
        match self {
            Concurrency::Unbounded => instances.max(1),
            Concurrency::Limited(n) => (*n as usize).max(1),
        }
    }
}

/// Fairness policy among members of a sharing group that compete for the same
/// shared resources.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharePolicyKind {
    /// Stack group members onto the units that the group already holds.
    #[default]
    Packed,
    /// Rotate the starting unit for every group member.
    RoundRobin,
}

impl std::str::FromStr for SharePolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "packed" => Ok(SharePolicyKind::Packed),
            "round-robin" => Ok(SharePolicyKind::RoundRobin),
            _ => Err(format!(
                "unknown sharing policy `{s}`, expected `packed` or `round-robin`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingGroup {
    pub name: String,
    pub workloads: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadOverride {
    pub duration: Option<Duration>,
    pub timeout: Option<Duration>,
    pub repeat: Option<u32>,
}

/// Resolved and validated configuration of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Selected workloads with exclusions already subtracted
    pub workloads: Vec<String>,
    pub exclude: BTreeSet<String>,
    pub overrides: BTreeMap<String, WorkloadOverride>,
    /// Global minimum duration; falls back to the workload default when unset
    pub duration: Option<Duration>,
    /// Per-instance timeout
    pub timeout: Duration,
    /// Deadline of the whole run
    pub run_timeout: Option<Duration>,
    pub grace_period: Duration,
    /// Pause between back-to-back iterations
    pub delay: Duration,
    pub max_iterations: u32,
    pub repeat: u32,
    pub seed: u64,
    pub concurrency: Concurrency,
    pub strict: bool,
    pub maximize: bool,
    pub share_policy: SharePolicyKind,
    pub sharing_groups: Vec<SharingGroup>,
    /// Restricts the run to these nodes; empty means every node
    pub nodes: Vec<String>,
    pub check: bool,
}

impl RunSpec {
    pub fn sharing_group_of(&self, workload: &str) -> Option<&SharingGroup> {
        self.sharing_groups
            .iter()
            .find(|group| group.workloads.contains(workload))
    }

    pub fn repeat_of(&self, workload: &str) -> u32 {
        self.overrides
            .get(workload)
            .and_then(|o| o.repeat)
            .unwrap_or(self.repeat)
    }

    pub fn timeout_of(&self, workload: &str) -> Duration {
        self.overrides
            .get(workload)
            .and_then(|o| o.timeout)
            .unwrap_or(self.timeout)
    }

    pub fn min_duration_of(&self, definition: &WorkloadDefinition) -> Duration {
        self.overrides
            .get(definition.name())
            .and_then(|o| o.duration)
            .or(self.duration)
            .unwrap_or_else(|| definition.default_duration())
    }
}
