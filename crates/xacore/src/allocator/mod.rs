//! Binding of workload instances to concrete resource units.
//!
//! The allocator runs once per orchestration run. Instances are processed in
//! a seeded shuffle order and each of them gets a greedy first-fit binding
//! per resource kind. The resulting [`AllocationPlan`] is fixed for the rest
//! of the run.

mod ledger;
mod policy;

pub use ledger::{LedgerTransaction, ResourceLedger};
pub use policy::{Candidate, Packed, RoundRobin, SharePolicy, create_share_policy};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::time::Duration;

use crate::common::Map;
use crate::common::error::{AllocationError, FatalOrchestrationError};
use crate::common::ids::{InstanceId, NodeId, ResourceUnitId};
use crate::config::RunSpec;
use crate::context::RunContext;
use crate::topology::Topology;
use crate::workload::WorkloadRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub instance: InstanceId,
    pub workload: String,
    pub repetition: u32,
    pub units: SmallVec<[ResourceUnitId; 4]>,
    pub min_duration: Duration,
    pub timeout: Duration,
    pub sharing_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    InsufficientResources {
        kind: String,
        required: u32,
        available: u32,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientResources {
                kind,
                required,
                available,
            } => write!(
                f,
                "insufficient resources: requires {required}x `{kind}`, {available} available"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanEntry {
    Allocated(Allocation),
    Skipped {
        instance: InstanceId,
        workload: String,
        repetition: u32,
        reason: SkipReason,
    },
}

impl PlanEntry {
    pub fn instance(&self) -> InstanceId {
        match self {
            PlanEntry::Allocated(allocation) => allocation.instance,
            PlanEntry::Skipped { instance, .. } => *instance,
        }
    }

    pub fn workload(&self) -> &str {
        match self {
            PlanEntry::Allocated(allocation) => &allocation.workload,
            PlanEntry::Skipped { workload, .. } => workload,
        }
    }
}

/// Entries in dispatch order; the position of an entry is its instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    entries: Vec<PlanEntry>,
}

impl AllocationPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        AllocationPlan { entries }
    }

    #[inline]
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.entries.iter().filter_map(|entry| match entry {
            PlanEntry::Allocated(allocation) => Some(allocation),
            PlanEntry::Skipped { .. } => None,
        })
    }

    pub fn skipped_count(&self) -> usize {
        self.entries.len() - self.allocations().count()
    }

    /// Checks that no resource unit is bound to two allocations unless both of
    /// them belong to the same sharing group.
    pub fn verify_disjoint(&self) -> Result<(), FatalOrchestrationError> {
        let mut owners: Map<ResourceUnitId, &Allocation> = Map::default();
        for allocation in self.allocations() {
            for unit in &allocation.units {
                if let Some(other) = owners.get(unit) {
                    let shared = allocation.sharing_group.is_some()
                        && allocation.sharing_group == other.sharing_group;
                    if !shared {
                        return Err(FatalOrchestrationError::DoubleBinding {
                            unit: *unit,
                            holder: other.instance,
                            claimant: allocation.instance,
                        });
                    }
                } else {
                    owners.insert(*unit, allocation);
                }
            }
        }
        Ok(())
    }
}

/// Expands the selection to (workload, repetition) pairs ordered by a shuffle
/// seeded from `seed`.
pub fn dispatch_order(spec: &RunSpec, seed: u64) -> Vec<(String, u32)> {
    let mut instances: Vec<(String, u32)> = spec
        .workloads
        .iter()
        .flat_map(|name| (0..spec.repeat_of(name)).map(move |rep| (name.clone(), rep)))
        .collect();
    instances.sort_unstable();
    let mut rng = SmallRng::seed_from_u64(seed);
    instances.shuffle(&mut rng);
    instances
}

pub fn allocate(
    ctx: &RunContext,
    spec: &RunSpec,
    topology: &Topology,
    registry: &WorkloadRegistry,
) -> Result<AllocationPlan, AllocationError> {
    let nodes: Option<Vec<NodeId>> = if spec.nodes.is_empty() {
        None
    } else {
        let ids = spec
            .nodes
            .iter()
            .map(|name| {
                topology
                    .node_by_name(name)
                    .map(|node| node.id)
                    .ok_or_else(|| AllocationError::UnknownNode(name.clone()))
            })
            .collect::<Result<_, _>>()?;
        Some(ids)
    };
    let in_scope = |node: NodeId| nodes.as_ref().is_none_or(|ids| ids.contains(&node));

    let policy = create_share_policy(spec.share_policy);
    let mut ledger = ResourceLedger::new();
    let mut group_members: Map<&str, usize> = Map::default();
    let mut entries = Vec::new();

    for (index, (name, repetition)) in dispatch_order(spec, ctx.seed()).into_iter().enumerate() {
        let instance = InstanceId::new(index as u32);
        let definition = registry
            .by_name(&name)
            .ok_or_else(|| AllocationError::UnknownWorkload(name.clone()))?;
        let group = spec.sharing_group_of(&name).map(|g| g.name.as_str());
        let member_index = group.map(|g| {
            let counter = group_members.entry(g).or_default();
            *counter += 1;
            *counter - 1
        });

        let mut tx = ledger.transaction(instance, group)?;
        let mut missing = None;
        for entry in definition.requirement().entries() {
            let mut candidates: Vec<Candidate> = topology
                .resources_of_kind(&entry.kind)
                .filter(|unit| in_scope(unit.node))
                .filter(|unit| tx.ledger().can_bind(unit.id, group))
                .filter(|unit| !tx.claimed().contains(&unit.id))
                .map(|unit| Candidate {
                    unit: unit.id,
                    holders: tx.ledger().holder_count(unit.id),
                })
                .collect();
            if let Some(member_index) = member_index {
                policy.order(member_index, &mut candidates);
            }
            if candidates.len() < entry.amount as usize {
                missing = Some(SkipReason::InsufficientResources {
                    kind: entry.kind.clone(),
                    required: entry.amount,
                    available: candidates.len() as u32,
                });
                break;
            }
            for candidate in &candidates[..entry.amount as usize] {
                if !tx.claim(candidate.unit) {
                    return Err(FatalOrchestrationError::Invariant(format!(
                        "resource unit {} offered to instance {instance} cannot be claimed",
                        candidate.unit
                    ))
                    .into());
                }
            }
        }

        match missing {
            None => {
                let units = tx.commit();
                log::debug!(
                    "Instance {instance} of `{name}` bound to [{}]",
                    units
                        .iter()
                        .map(|unit| topology.describe_unit(*unit).to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                entries.push(PlanEntry::Allocated(Allocation {
                    instance,
                    workload: name.clone(),
                    repetition,
                    units,
                    min_duration: spec.min_duration_of(definition),
                    timeout: spec.timeout_of(&name),
                    sharing_group: group.map(|g| g.to_string()),
                }));
            }
            Some(SkipReason::InsufficientResources {
                kind,
                required,
                available,
            }) => {
                drop(tx);
                if spec.strict {
                    return Err(AllocationError::Infeasible {
                        workload: name,
                        instance,
                        kind,
                        required,
                        available,
                    });
                }
                let reason = SkipReason::InsufficientResources {
                    kind,
                    required,
                    available,
                };
                log::warn!("Instance {instance} of `{name}` is skipped: {reason}");
                entries.push(PlanEntry::Skipped {
                    instance,
                    workload: name,
                    repetition,
                    reason,
                });
            }
        }
    }

    let plan = AllocationPlan { entries };
    plan.verify_disjoint()?;
    Ok(plan)
}
