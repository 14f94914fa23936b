//! Topology descriptions.
//!
//! ```toml
//! [[nodes]]
//! name = "node0"
//! accelerators = 8
//! cpu_groups = [[0, 1, 2, 3], [4, 5, 6, 7]]
//! resources = { nic = 2 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use xacore::topology::{NodeDescriptor, Topology};

use crate::Result;
use crate::common::error::XaScaleError;
use crate::configfile::FileFormat;

/// Number of logical CPUs that form one `cpu-cores` unit of the local node.
pub const LOCAL_CPU_GROUP_SIZE: u32 = 4;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct NodeDef {
    pub name: String,
    #[serde(default)]
    pub accelerators: u32,
    #[serde(default)]
    pub cpu_groups: Vec<Vec<u32>>,
    /// Other resource kinds, given by the number of units
    #[serde(default)]
    pub resources: BTreeMap<String, u32>,
}

impl NodeDef {
    fn into_descriptor(self) -> NodeDescriptor {
        let mut descriptor = NodeDescriptor::new(self.name);
        if self.accelerators > 0 {
            descriptor = descriptor.with_accelerators(self.accelerators);
        }
        if !self.cpu_groups.is_empty() {
            descriptor = descriptor.with_cpu_groups(&self.cpu_groups);
        }
        for (kind, count) in self.resources {
            let labels = (0..count).map(|i| i.to_string()).collect();
            descriptor = descriptor.with_resource(&kind, labels);
        }
        descriptor
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TopologyDef {
    pub nodes: Vec<NodeDef>,
}

impl TopologyDef {
    pub fn parse(content: &str, format: FileFormat) -> Result<TopologyDef> {
        let def: TopologyDef = match format {
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|error| XaScaleError::DeserializationError(error.to_string()))?,
        };
        if def.nodes.is_empty() {
            return Err(XaScaleError::GenericError(
                "Topology has to contain at least one node".to_string(),
            ));
        }
        Ok(def)
    }

    pub fn into_topology(self) -> Result<Topology> {
        let descriptors = self
            .nodes
            .into_iter()
            .map(NodeDef::into_descriptor)
            .collect();
        Ok(Topology::new(descriptors)?)
    }
}

pub fn load_topology(path: &Path) -> Result<Topology> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        XaScaleError::GenericError(format!(
            "Cannot read topology file {}: {error}",
            path.display()
        ))
    })?;
    let topology = TopologyDef::parse(&content, FileFormat::from_path(path))?.into_topology()?;
    log::info!(
        "Topology loaded from {}: {} node(s)",
        path.display(),
        topology.nodes().len()
    );
    Ok(topology)
}

/// Describes the local machine: one node named by the hostname, with one
/// `cpu-cores` unit per group of logical CPUs and no accelerators.
pub fn local_topology() -> Result<Topology> {
    let hostname = gethostname::gethostname()
        .into_string()
        .map_err(|_| XaScaleError::GenericError("Invalid hostname".to_string()))?;
    let n_cpus = num_cpus::get() as u32;
    let descriptor = NodeDescriptor::new(hostname).with_cpu_groups(&cpu_groups(n_cpus));
    log::debug!("Using local topology with {n_cpus} CPU(s)");
    Ok(Topology::new(vec![descriptor])?)
}

fn cpu_groups(n_cpus: u32) -> Vec<Vec<u32>> {
    (0..n_cpus)
        .collect::<Vec<_>>()
        .chunks(LOCAL_CPU_GROUP_SIZE as usize)
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub fn load_or_detect(path: Option<&Path>) -> Result<Topology> {
    match path {
        Some(path) => load_topology(path),
        None => local_topology(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xacore::topology::{ACCELERATOR_KIND, CPU_CORES_KIND};

    #[test]
    fn test_parse_toml_topology() {
        let topology = TopologyDef::parse(
            r#"
[[nodes]]
name = "node0"
accelerators = 2
cpu_groups = [[0, 1, 2, 3], [4, 5, 6, 7]]
resources = { nic = 1 }

[[nodes]]
name = "node1"
accelerators = 1
"#,
            FileFormat::Toml,
        )
        .unwrap()
        .into_topology()
        .unwrap();

        assert_eq!(topology.nodes().len(), 2);
        assert_eq!(topology.resources_of_kind(ACCELERATOR_KIND).count(), 3);
        let cpus: Vec<_> = topology
            .resources_of_kind(CPU_CORES_KIND)
            .map(|unit| unit.label.as_str())
            .collect();
        assert_eq!(cpus, vec!["0-3", "4-7"]);
        assert_eq!(topology.resources_of_kind("nic").count(), 1);
        assert_eq!(topology.node_by_name("node1").unwrap().units.len(), 1);
    }

    #[test]
    fn test_parse_json_topology() {
        let def = TopologyDef::parse(
            r#"{"nodes": [{"name": "n", "accelerators": 4}]}"#,
            FileFormat::Json,
        )
        .unwrap();
        assert_eq!(def.nodes[0].accelerators, 4);
    }

    #[test]
    fn test_invalid_topologies() {
        assert!(TopologyDef::parse("nodes = []", FileFormat::Toml).is_err());
        assert!(
            TopologyDef::parse(
                "[[nodes]]\nname = \"n\"\ngpus = 2\n",
                FileFormat::Toml
            )
            .is_err()
        );
        let duplicate = TopologyDef::parse(
            "[[nodes]]\nname = \"n\"\n[[nodes]]\nname = \"n\"\n",
            FileFormat::Toml,
        )
        .unwrap();
        assert!(duplicate.into_topology().is_err());
    }

    #[test]
    fn test_local_cpu_groups() {
        assert_eq!(cpu_groups(6), vec![vec![0, 1, 2, 3], vec![4, 5]]);
        assert!(cpu_groups(0).is_empty());
    }

    #[test]
    fn test_local_topology() {
        let topology = local_topology().unwrap();
        assert_eq!(topology.nodes().len(), 1);
        assert_eq!(topology.resources_of_kind(ACCELERATOR_KIND).count(), 0);
        assert!(topology.resources_of_kind(CPU_CORES_KIND).count() >= 1);
    }
}
