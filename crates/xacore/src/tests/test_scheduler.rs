use smallvec::smallvec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::allocator::{Allocation, AllocationPlan, PlanEntry, allocate};
use crate::common::error::{FatalOrchestrationError, FatalRunError};
use crate::common::ids::{InstanceId, ResourceUnitId};
use crate::config::{Concurrency, RunSpec};
use crate::context::RunContext;
use crate::report::{RunReport, Verdict, WorkloadResult, WorkloadStatus};
use crate::scheduler::Scheduler;
use crate::tests::utils::{
    ActivityTracker, RegistryBuilder, hang, panic_after, single_node, sleep_then, spec_builder,
    succeed,
};
use crate::topology::Topology;
use crate::workload::{InvocationOutcome, WorkloadRegistry};

async fn run_spec(
    spec: &RunSpec,
    registry: &WorkloadRegistry,
    topology: &Topology,
) -> Result<RunReport, FatalRunError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = RunContext::new(spec);
    let plan = allocate(&ctx, spec, topology, registry).unwrap();
    Scheduler::new(spec, registry, topology).run(&ctx, plan).await
}

fn result_of<'a>(report: &'a RunReport, workload: &str) -> &'a WorkloadResult {
    report
        .results
        .iter()
        .find(|r| r.workload == workload)
        .unwrap()
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_until_min_duration() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, sleep_then(secs(10), InvocationOutcome::NeedsMoreTime))
        .build();
    let spec = spec_builder().workloads(&["w"]).duration(secs(30)).build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::Passed);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.detail, None);
    assert!(report.is_pass());
}

#[tokio::test(start_paused = true)]
async fn test_success_without_min_duration_runs_once() {
    let registry = RegistryBuilder::default()
        .workload("w", 1, sleep_then(secs(2), InvocationOutcome::Success))
        .build();
    let spec = spec_builder().workloads(&["w"]).build();
    let report = run_spec(&spec, &registry, &single_node(1)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.iterations, 1);
    assert_eq!(result.resources, vec!["node0/accelerator[0]".to_string()]);
    assert!(result.started_at.is_some() && result.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_of_unresponsive_workload() {
    let registry = RegistryBuilder::default().workload("w", 0, hang()).build();
    let spec = spec_builder()
        .workloads(&["w"])
        .timeout(secs(5))
        .grace_period(secs(1))
        .build();
    let start = Instant::now();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    assert_eq!(result_of(&report, "w").status, WorkloadStatus::TimedOut);
    assert_eq!(report.verdict, Verdict::Fail);
    let elapsed = start.elapsed();
    assert!(elapsed >= secs(6) && elapsed < secs(7), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_covers_all_iterations() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, sleep_then(secs(10), InvocationOutcome::NeedsMoreTime))
        .build();
    let spec = spec_builder()
        .workloads(&["w"])
        .duration(secs(100))
        .workload_timeout("w", secs(25))
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::TimedOut);
    assert_eq!(result.iterations, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_abort_siblings() {
    let registry = RegistryBuilder::default()
        .workload(
            "bad",
            0,
            sleep_then(secs(1), InvocationOutcome::Failure("broken".into())),
        )
        .workload("good", 0, sleep_then(secs(3), InvocationOutcome::Success))
        .build();
    let spec = spec_builder().workloads(&["bad", "good"]).build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    let bad = result_of(&report, "bad");
    assert_eq!(bad.status, WorkloadStatus::Failed);
    assert_eq!(bad.detail.as_deref(), Some("iteration 1: broken"));
    assert_eq!(result_of(&report, "good").status, WorkloadStatus::Passed);
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test(start_paused = true)]
async fn test_first_failing_iteration_ends_instance() {
    let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = calls.clone();
    let workload = crate::workload::workload_fn(move |_| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(secs(1)).await;
            if n == 2 {
                InvocationOutcome::Failure("second iteration broke".into())
            } else {
                InvocationOutcome::NeedsMoreTime
            }
        }
    });
    let registry = RegistryBuilder::default().workload("w", 0, workload).build();
    let spec = spec_builder().workloads(&["w"]).duration(secs(10)).build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::Failed);
    assert_eq!(result.iterations, 2);
    assert_eq!(
        result.detail.as_deref(),
        Some("iteration 2: second iteration broke")
    );
}

#[tokio::test(start_paused = true)]
async fn test_iteration_cap() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, sleep_then(secs(1), InvocationOutcome::Success))
        .build();
    let spec = spec_builder()
        .workloads(&["w"])
        .duration(secs(100))
        .max_iterations(3)
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::Passed);
    assert_eq!(result.iterations, 3);
    assert!(result.detail.as_ref().unwrap().contains("iteration limit 3"));
}

#[tokio::test(start_paused = true)]
async fn test_delay_between_iterations() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, sleep_then(secs(1), InvocationOutcome::NeedsMoreTime))
        .build();
    let spec = spec_builder()
        .workloads(&["w"])
        .duration(secs(3))
        .delay(secs(2))
        .build();
    let start = Instant::now();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    assert_eq!(result_of(&report, "w").iterations, 3);
    assert!(start.elapsed() >= secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit() {
    let tracker = Arc::new(ActivityTracker::default());
    let registry = RegistryBuilder::default()
        .workload("a", 0, tracker.sleeper(secs(1)))
        .workload("b", 0, tracker.sleeper(secs(1)))
        .workload("c", 0, tracker.sleeper(secs(1)))
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b", "c"])
        .concurrency(Concurrency::Limited(1))
        .build();
    let start = Instant::now();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    assert!(report.is_pass());
    assert_eq!(tracker.peak(), 1);
    assert_eq!(tracker.invocations(), 3);
    assert!(start.elapsed() >= secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_concurrency() {
    let tracker = Arc::new(ActivityTracker::default());
    let registry = RegistryBuilder::default()
        .workload("a", 0, tracker.sleeper(secs(1)))
        .workload("b", 0, tracker.sleeper(secs(1)))
        .workload("c", 0, tracker.sleeper(secs(1)))
        .build();
    let spec = spec_builder().workloads(&["a", "b", "c"]).build();
    run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    assert_eq!(tracker.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sharing_group_without_maximize_runs_sequentially() {
    let group = Arc::new(ActivityTracker::default());
    let registry = RegistryBuilder::default()
        .workload("a", 1, group.sleeper(secs(2)))
        .workload("b", 1, group.sleeper(secs(2)))
        .workload("c", 0, succeed())
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b", "c"])
        .sharing_group("g", &["a", "b"])
        .build();
    let report = run_spec(&spec, &registry, &single_node(1)).await.unwrap();
    assert!(report.is_pass());
    assert_eq!(report.count(WorkloadStatus::Skipped), 0);
    assert_eq!(group.peak(), 1);
    assert_eq!(group.invocations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sharing_group_with_maximize_runs_concurrently() {
    let group = Arc::new(ActivityTracker::default());
    let registry = RegistryBuilder::default()
        .workload("a", 1, group.sleeper(secs(2)))
        .workload("b", 1, group.sleeper(secs(2)))
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b"])
        .sharing_group("g", &["a", "b"])
        .maximize(true)
        .build();
    let report = run_spec(&spec, &registry, &single_node(1)).await.unwrap();
    assert!(report.is_pass());
    assert_eq!(group.peak(), 2);
    assert_eq!(result_of(&report, "a").resources, result_of(&report, "b").resources);
}

#[tokio::test(start_paused = true)]
async fn test_maximize_group_fails_together() {
    let registry = RegistryBuilder::default()
        .workload(
            "a",
            0,
            sleep_then(secs(1), InvocationOutcome::Failure("ecc error".into())),
        )
        .workload("b", 0, sleep_then(secs(2), InvocationOutcome::Success))
        .workload("c", 0, sleep_then(secs(2), InvocationOutcome::Success))
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b", "c"])
        .sharing_group("g", &["a", "b"])
        .maximize(true)
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    assert_eq!(result_of(&report, "a").status, WorkloadStatus::Failed);
    let b = result_of(&report, "b");
    assert_eq!(b.status, WorkloadStatus::Failed);
    assert!(b.detail.as_ref().unwrap().contains("`a`"));
    assert_eq!(result_of(&report, "c").status, WorkloadStatus::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout() {
    let registry = RegistryBuilder::default()
        .workload("a", 0, sleep_then(secs(10), InvocationOutcome::Success))
        .workload("b", 0, sleep_then(secs(10), InvocationOutcome::Success))
        .workload("c", 0, sleep_then(secs(10), InvocationOutcome::Success))
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b", "c"])
        .concurrency(Concurrency::Limited(1))
        .run_timeout(secs(15))
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            WorkloadStatus::Passed,
            WorkloadStatus::TimedOut,
            WorkloadStatus::TimedOut
        ]
    );
    assert_eq!(report.results[1].detail.as_deref(), Some("run timeout reached"));
    assert_eq!(
        report.results[2].detail.as_deref(),
        Some("run timeout reached before start")
    );
    assert!(report.results[2].started_at.is_none());
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let registry = RegistryBuilder::default()
        .workload("a", 0, sleep_then(secs(10), InvocationOutcome::Success))
        .build();
    let spec = spec_builder().workloads(&["a"]).build();
    let topology = single_node(0);
    let ctx = RunContext::new(&spec);
    let token = ctx.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(secs(1)).await;
        token.cancel();
    });
    let plan = allocate(&ctx, &spec, &topology, &registry).unwrap();
    let report = Scheduler::new(&spec, &registry, &topology)
        .run(&ctx, plan)
        .await
        .unwrap();
    let result = result_of(&report, "a");
    assert_eq!(result.status, WorkloadStatus::Failed);
    assert_eq!(result.detail.as_deref(), Some("interrupted"));
}

#[tokio::test(start_paused = true)]
async fn test_report_preserves_dispatch_order() {
    let registry = RegistryBuilder::default()
        .workload("a", 0, sleep_then(secs(5), InvocationOutcome::Success))
        .workload("b", 0, sleep_then(secs(1), InvocationOutcome::Success))
        .workload("c", 0, sleep_then(secs(3), InvocationOutcome::Success))
        .workload("d", 1, succeed())
        .build();
    let spec = spec_builder()
        .workloads(&["a", "b", "c", "d"])
        .repeat(2)
        .seed(42)
        .build();
    let report = run_spec(&spec, &registry, &single_node(1)).await.unwrap();
    let ids: Vec<u32> = report.results.iter().map(|r| r.instance.as_num()).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert_eq!(report.count(WorkloadStatus::Skipped), 1);
    assert!(report.is_pass());
}

#[tokio::test(start_paused = true)]
async fn test_workload_panic_fails_only_its_instance() {
    let registry = RegistryBuilder::default()
        .workload("ok", 0, succeed())
        .workload("boom", 0, panic_after(secs(1)))
        .workload("slow", 0, sleep_then(secs(10), InvocationOutcome::Success))
        .build();
    let spec = spec_builder().workloads(&["ok", "boom", "slow"]).build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert!(report.fatal_error.is_none());
    assert_eq!(result_of(&report, "ok").status, WorkloadStatus::Passed);
    assert_eq!(result_of(&report, "slow").status, WorkloadStatus::Passed);
    let boom = result_of(&report, "boom");
    assert_eq!(boom.status, WorkloadStatus::Failed);
    assert_eq!(
        boom.detail.as_deref(),
        Some("iteration 1: panicked: workload crashed")
    );
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test(start_paused = true)]
async fn test_huge_run_timeout() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, succeed())
        .build();
    let spec = spec_builder()
        .workloads(&["w"])
        .run_timeout(Duration::try_from_secs_f64(1e19).unwrap())
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    assert_eq!(result_of(&report, "w").status, WorkloadStatus::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_huge_duration_and_timeout() {
    let registry = RegistryBuilder::default()
        .workload("w", 0, sleep_then(secs(1), InvocationOutcome::NeedsMoreTime))
        .build();
    let huge = Duration::try_from_secs_f64(1e19).unwrap();
    let spec = spec_builder()
        .workloads(&["w"])
        .duration(huge)
        .timeout(huge)
        .max_iterations(2)
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::Passed);
    assert_eq!(result.iterations, 2);
    assert!(result.detail.as_ref().unwrap().contains("iteration limit 2"));
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_duration() {
    let registry = RegistryBuilder::default()
        .workload(
            "w",
            0,
            sleep_then(Duration::from_millis(200), InvocationOutcome::NeedsMoreTime),
        )
        .build();
    let spec = spec_builder()
        .workloads(&["w"])
        .duration(Duration::from_millis(500))
        .build();
    let report = run_spec(&spec, &registry, &single_node(0)).await.unwrap();
    let result = result_of(&report, "w");
    assert_eq!(result.status, WorkloadStatus::Passed);
    assert_eq!(result.iterations, 3);
}

#[tokio::test(start_paused = true)]
async fn test_double_binding_is_fatal() {
    let registry = RegistryBuilder::default()
        .workload("a", 1, sleep_then(secs(1), InvocationOutcome::Success))
        .build();
    let topology = single_node(1);
    let spec = spec_builder().workloads(&["a"]).repeat(2).build();
    let allocation = |instance: u32| {
        PlanEntry::Allocated(Allocation {
            instance: InstanceId::new(instance),
            workload: "a".to_string(),
            repetition: instance,
            units: smallvec![ResourceUnitId::new(0)],
            min_duration: Duration::ZERO,
            timeout: secs(10),
            sharing_group: None,
        })
    };
    let plan = AllocationPlan::new(vec![allocation(0), allocation(1)]);
    let error = Scheduler::new(&spec, &registry, &topology)
        .run(&RunContext::new(&spec), plan)
        .await
        .unwrap_err();
    assert_eq!(
        error.error,
        FatalOrchestrationError::DoubleBinding {
            unit: ResourceUnitId::new(0),
            holder: InstanceId::new(0),
            claimant: InstanceId::new(1),
        }
    );
    assert!(error.partial_report.results.is_empty());
}
