use std::sync::Arc;
use std::time::Duration;

use xacore::topology::{ACCELERATOR_KIND, CPU_CORES_KIND};
use xacore::workload::{
    InvocationContext, InvocationOutcome, ResourceRequirement, Workload, WorkloadDefinition,
    workload_fn,
};

pub const EXAMPLE_WORKLOAD: &str = "example";
pub const IDLE_ACCELERATOR_WORKLOAD: &str = "idle-accelerator";

/// Length of one iteration of the `example` workload.
pub const EXAMPLE_ITERATION_TIME: Duration = Duration::from_secs(1);

async fn sleep_or_cancel(ctx: &InvocationContext, duration: Duration) -> InvocationOutcome {
    tokio::select! {
        _ = tokio::time::sleep(duration) => InvocationOutcome::Success,
        _ = ctx.cancel.cancelled() => InvocationOutcome::Failure("cancelled".to_string()),
    }
}

/// Occupies one CPU group, one second per iteration.
fn example() -> Arc<dyn Workload> {
    workload_fn(|ctx| async move {
        log::debug!(
            "Example workload, instance {}, iteration {}",
            ctx.instance,
            ctx.iteration
        );
        match sleep_or_cancel(&ctx, EXAMPLE_ITERATION_TIME.min(ctx.remaining)).await {
            InvocationOutcome::Success if ctx.remaining > EXAMPLE_ITERATION_TIME => {
                InvocationOutcome::NeedsMoreTime
            }
            outcome => outcome,
        }
    })
}

/// Holds one accelerator for the remaining duration in a single invocation.
fn idle_accelerator() -> Arc<dyn Workload> {
    workload_fn(|ctx| async move {
        log::debug!(
            "Holding accelerator(s) {:?} for {:?}",
            ctx.labels_of_kind(ACCELERATOR_KIND),
            ctx.remaining
        );
        sleep_or_cancel(&ctx, ctx.remaining).await
    })
}

pub fn builtin_workloads() -> crate::Result<Vec<WorkloadDefinition>> {
    Ok(vec![
        WorkloadDefinition::new(
            EXAMPLE_WORKLOAD,
            ResourceRequirement::new([(CPU_CORES_KIND, 1)])?,
            example(),
        )
        .with_description("Example test, sleeps on one CPU group")
        .with_default_duration(Duration::from_secs(5)),
        WorkloadDefinition::new(
            IDLE_ACCELERATOR_WORKLOAD,
            ResourceRequirement::new([(ACCELERATOR_KIND, 1)])?,
            idle_accelerator(),
        )
        .with_description("Keeps one accelerator busy without load")
        .with_default_duration(Duration::from_secs(10)),
    ])
}
