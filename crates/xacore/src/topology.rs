//! Static description of the cluster resources that workloads consume.
//!
//! The topology is built once at orchestration start from a list of
//! [`NodeDescriptor`]s and is read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::format_cpu_list;
use crate::common::ids::{NodeId, ResourceUnitId};
use crate::common::{Map, Set};
use crate::{Error, Result};

pub const ACCELERATOR_KIND: &str = "accelerator";
pub const CPU_CORES_KIND: &str = "cpu-cores";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceUnit {
    pub id: ResourceUnitId,
    pub kind: String,
    pub node: NodeId,
    /// Node-local address of the unit (device index, core list, ...)
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub units: Vec<ResourceUnitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResourceItem {
    pub kind: String,
    pub labels: Vec<String>,
}

/// Input description of a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub resources: Vec<NodeResourceItem>,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        NodeDescriptor {
            name: name.into(),
            resources: Vec::new(),
        }
    }

    pub fn with_accelerators(self, count: u32) -> Self {
        let labels = (0..count).map(|i| i.to_string()).collect();
        self.with_resource(ACCELERATOR_KIND, labels)
    }

    /// Every group of CPU ids becomes a single `cpu-cores` unit.
    pub fn with_cpu_groups(self, groups: &[Vec<u32>]) -> Self {
        let labels = groups.iter().map(|group| format_cpu_list(group)).collect();
        self.with_resource(CPU_CORES_KIND, labels)
    }

    pub fn with_resource(mut self, kind: &str, labels: Vec<String>) -> Self {
        match self.resources.iter_mut().find(|item| item.kind == kind) {
            Some(item) => item.labels.extend(labels),
            None => self.resources.push(NodeResourceItem {
                kind: kind.to_string(),
                labels,
            }),
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    nodes: Vec<Node>,
    units: Vec<ResourceUnit>,
}

impl Topology {
    pub fn new(descriptors: Vec<NodeDescriptor>) -> Result<Self> {
        let mut names: Set<String> = Set::default();
        let mut topology = Topology::default();

        for descriptor in descriptors {
            if descriptor.name.is_empty() {
                return Err(Error::TopologyError("Node name cannot be empty".to_string()));
            }
            if !names.insert(descriptor.name.clone()) {
                return Err(Error::TopologyError(format!(
                    "Node `{}` is defined multiple times",
                    descriptor.name
                )));
            }

            let node_id = NodeId::new(topology.nodes.len() as u32);
            let mut node_units = Vec::new();
            for item in descriptor.resources {
                if item.kind.is_empty() {
                    return Err(Error::TopologyError(format!(
                        "Node `{}` contains a resource without a kind",
                        descriptor.name
                    )));
                }
                let mut labels: Set<String> = Set::default();
                for label in &item.labels {
                    if !labels.insert(label.clone()) {
                        return Err(Error::TopologyError(format!(
                            "Node `{}` contains duplicate `{}` unit `{label}`",
                            descriptor.name, item.kind
                        )));
                    }
                }
                for label in item.labels {
                    let id = ResourceUnitId::new(topology.units.len() as u32);
                    topology.units.push(ResourceUnit {
                        id,
                        kind: item.kind.clone(),
                        node: node_id,
                        label,
                    });
                    node_units.push(id);
                }
            }
            topology.nodes.push(Node {
                id: node_id,
                name: descriptor.name,
                units: node_units,
            });
        }
        log::debug!(
            "Topology loaded: {} node(s), {} resource unit(s)",
            topology.nodes.len(),
            topology.units.len()
        );
        Ok(topology)
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.as_usize()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// All resource units in topology order.
    #[inline]
    pub fn units(&self) -> &[ResourceUnit] {
        &self.units
    }

    pub fn unit(&self, id: ResourceUnitId) -> &ResourceUnit {
        &self.units[id.as_usize()]
    }

    pub fn resources_of_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a ResourceUnit> + 'a {
        self.units.iter().filter(move |unit| unit.kind == kind)
    }

    /// Number of units per kind, sorted by kind name.
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut counts: Map<&str, usize> = Map::default();
        for unit in &self.units {
            *counts.entry(unit.kind.as_str()).or_default() += 1;
        }
        let mut summary: Vec<_> = counts
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect();
        summary.sort_unstable();
        summary
    }

    pub fn describe_unit(&self, id: ResourceUnitId) -> UnitDisplay<'_> {
        UnitDisplay {
            topology: self,
            unit: self.unit(id),
        }
    }
}

pub struct UnitDisplay<'a> {
    topology: &'a Topology,
    unit: &'a ResourceUnit,
}

impl fmt::Display for UnitDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}[{}]",
            self.topology.node(self.unit.node).name,
            self.unit.kind,
            self.unit.label
        )
    }
}
