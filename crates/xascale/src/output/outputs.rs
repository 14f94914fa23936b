use xacore::allocator::AllocationPlan;
use xacore::config::RunSpec;
use xacore::report::RunReport;
use xacore::topology::Topology;
use xacore::workload::WorkloadRegistry;

#[derive(clap::ValueEnum, Clone)]
pub enum Outputs {
    CLI,
    JSON,
    Quiet,
}

pub trait Output {
    // Catalog
    fn print_workload_list(&self, registry: &WorkloadRegistry, topology: &Topology);

    // Runs
    fn print_run_spec(&self, spec: &RunSpec);
    fn print_plan(&self, spec: &RunSpec, plan: &AllocationPlan, topology: &Topology);
    fn print_report(&self, report: &RunReport);

    // Errors
    fn print_error(&self, error: anyhow::Error);
}
