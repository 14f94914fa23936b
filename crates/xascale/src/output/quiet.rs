use anyhow::Error;

use xacore::allocator::AllocationPlan;
use xacore::config::RunSpec;
use xacore::report::RunReport;
use xacore::topology::Topology;
use xacore::workload::WorkloadRegistry;

use crate::output::outputs::Output;

#[derive(Default)]
pub struct Quiet;

impl Output for Quiet {
    fn print_workload_list(&self, registry: &WorkloadRegistry, _topology: &Topology) {
        for name in registry.names() {
            println!("{name}");
        }
    }

    fn print_run_spec(&self, _spec: &RunSpec) {}

    fn print_plan(&self, _spec: &RunSpec, plan: &AllocationPlan, _topology: &Topology) {
        println!(
            "{} allocated, {} skipped",
            plan.allocations().count(),
            plan.skipped_count()
        );
    }

    fn print_report(&self, report: &RunReport) {
        println!("{}", report.verdict)
    }

    fn print_error(&self, error: Error) {
        eprintln!("{error:?}");
    }
}
