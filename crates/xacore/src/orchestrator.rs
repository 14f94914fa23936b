use tokio_util::sync::CancellationToken;

use crate::allocator::{AllocationPlan, allocate};
use crate::config::{CliFlags, ConfigLayer, ConfigResolver, RunSpec};
use crate::context::RunContext;
use crate::report::RunReport;
use crate::scheduler::Scheduler;
use crate::topology::Topology;
use crate::workload::WorkloadRegistry;
use crate::Result;

/// Result of [`Orchestrator::orchestrate`].
#[derive(Debug)]
pub enum Orchestration {
    /// Check mode: the configuration was resolved and validated only
    Checked(RunSpec),
    Completed(RunReport),
}

/// Resolves configuration, allocates resources and executes the plan.
pub struct Orchestrator<'a> {
    registry: &'a WorkloadRegistry,
    topology: &'a Topology,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a WorkloadRegistry, topology: &'a Topology) -> Self {
        Orchestrator { registry, topology }
    }

    pub fn resolve(
        &self,
        base: Option<&ConfigLayer>,
        overrides: &[ConfigLayer],
        cli: &CliFlags,
    ) -> Result<RunSpec> {
        let spec = ConfigResolver::new(self.registry).resolve(base, overrides, cli)?;
        log::debug!("Resolved run specification: {spec:?}");
        Ok(spec)
    }

    pub fn plan(&self, ctx: &RunContext, spec: &RunSpec) -> Result<AllocationPlan> {
        let plan = allocate(ctx, spec, self.topology, self.registry)?;
        log::info!(
            "Allocation plan of run {}: {} instance(s), {} skipped",
            ctx.run_id(),
            plan.entries().len(),
            plan.skipped_count()
        );
        Ok(plan)
    }

    pub async fn run(&self, spec: &RunSpec) -> Result<RunReport> {
        self.run_with_context(&RunContext::new(spec), spec).await
    }

    pub async fn run_with_context(&self, ctx: &RunContext, spec: &RunSpec) -> Result<RunReport> {
        let plan = self.plan(ctx, spec)?;
        let report = Scheduler::new(spec, self.registry, self.topology)
            .run(ctx, plan)
            .await?;
        log::info!(
            "Run {} finished: {} ({} result(s))",
            ctx.run_id(),
            report.verdict,
            report.results.len()
        );
        Ok(report)
    }

    /// Runs the whole pipeline. In check mode nothing is allocated or executed.
    pub async fn orchestrate(
        &self,
        base: Option<&ConfigLayer>,
        overrides: &[ConfigLayer],
        cli: &CliFlags,
        cancel: CancellationToken,
    ) -> Result<Orchestration> {
        let spec = self.resolve(base, overrides, cli)?;
        if spec.check {
            log::info!("Configuration is valid, check mode is enabled, nothing is executed");
            return Ok(Orchestration::Checked(spec));
        }
        let ctx = RunContext::new(&spec).with_cancel_token(cancel);
        let report = self.run_with_context(&ctx, &spec).await?;
        Ok(Orchestration::Completed(report))
    }
}
