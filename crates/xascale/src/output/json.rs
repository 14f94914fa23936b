use anyhow::Error;
use serde_json::json;

use xacore::allocator::{AllocationPlan, PlanEntry};
use xacore::config::RunSpec;
use xacore::report::RunReport;
use xacore::topology::Topology;
use xacore::workload::WorkloadRegistry;

use crate::output::outputs::Output;

#[derive(Default)]
pub struct JsonOutput;

impl JsonOutput {
    fn print(&self, data: serde_json::Value) {
        match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{text}"),
            Err(error) => log::error!("Cannot serialize output: {error:?}"),
        }
    }
}

/// Allocation plan with resource units described by their node and label.
pub fn plan_to_json(spec: &RunSpec, plan: &AllocationPlan, topology: &Topology) -> serde_json::Value {
    let entries: Vec<_> = plan
        .entries()
        .iter()
        .map(|entry| match entry {
            PlanEntry::Allocated(allocation) => json!({
                "instance": allocation.instance,
                "workload": allocation.workload,
                "repetition": allocation.repetition,
                "resources": allocation
                    .units
                    .iter()
                    .map(|unit| topology.describe_unit(*unit).to_string())
                    .collect::<Vec<_>>(),
                "min_duration": allocation.min_duration.as_secs_f64(),
                "timeout": allocation.timeout.as_secs_f64(),
                "sharing_group": allocation.sharing_group,
            }),
            PlanEntry::Skipped {
                instance,
                workload,
                repetition,
                reason,
            } => json!({
                "instance": instance,
                "workload": workload,
                "repetition": repetition,
                "skipped": reason.to_string(),
            }),
        })
        .collect();
    json!({
        "name": spec.name,
        "seed": spec.seed,
        "entries": entries,
    })
}

impl Output for JsonOutput {
    fn print_workload_list(&self, registry: &WorkloadRegistry, topology: &Topology) {
        let workloads: Vec<_> = registry
            .list_all()
            .iter()
            .map(|definition| {
                json!({
                    "name": definition.name(),
                    "description": definition.description(),
                    "requirement": definition.requirement().entries(),
                    "default_duration": definition.default_duration().as_secs_f64(),
                })
            })
            .collect();
        let nodes: Vec<_> = topology
            .nodes()
            .iter()
            .map(|node| {
                json!({
                    "name": node.name,
                    "units": node.units.iter().map(|id| topology.unit(*id)).collect::<Vec<_>>(),
                })
            })
            .collect();
        self.print(json!({
            "workloads": workloads,
            "nodes": nodes,
        }));
    }

    fn print_run_spec(&self, spec: &RunSpec) {
        self.print(json!(spec));
    }

    fn print_plan(&self, spec: &RunSpec, plan: &AllocationPlan, topology: &Topology) {
        self.print(plan_to_json(spec, plan, topology));
    }

    fn print_report(&self, report: &RunReport) {
        self.print(json!(report));
    }

    fn print_error(&self, error: Error) {
        self.print(json!({
            "error": format!("{error:?}"),
        }));
    }
}
