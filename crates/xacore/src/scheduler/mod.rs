//! Concurrent execution of an [`AllocationPlan`].
//!
//! The dispatcher walks the plan in dispatch order and hands every allocated
//! instance to a worker task once a permit of the worker pool is available.
//! Resource bindings are tracked in a [`ResourceLedger`] owned by the
//! dispatcher: units are acquired before a worker is spawned and released
//! when the worker reports back, so every binding is released exactly once.

mod instance;

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::allocator::{Allocation, AllocationPlan, PlanEntry, ResourceLedger};
use crate::common::Map;
use crate::common::error::{FatalOrchestrationError, FatalRunError};
use crate::config::RunSpec;
use crate::context::RunContext;
use crate::report::{RunReport, WorkloadResult, WorkloadStatus};
use crate::topology::Topology;
use crate::workload::{BoundResource, WorkloadRegistry};
use instance::{FAR_FUTURE, InstanceRun, InstanceRunner, Termination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    RunTimeout,
    Cancelled,
}

pub struct Scheduler<'a> {
    spec: &'a RunSpec,
    registry: &'a WorkloadRegistry,
    topology: &'a Topology,
}

impl<'a> Scheduler<'a> {
    pub fn new(spec: &'a RunSpec, registry: &'a WorkloadRegistry, topology: &'a Topology) -> Self {
        Scheduler {
            spec,
            registry,
            topology,
        }
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        plan: AllocationPlan,
    ) -> Result<RunReport, FatalRunError> {
        let entries = plan.into_entries();
        let mut results: Vec<Option<WorkloadResult>> = vec![None; entries.len()];
        let mut queue: VecDeque<Allocation> = VecDeque::new();

        for (index, entry) in entries.into_iter().enumerate() {
            if entry.instance().as_usize() != index {
                let error = FatalOrchestrationError::Invariant(format!(
                    "plan entry {index} carries instance id {}",
                    entry.instance()
                ));
                return Err(self.abort(ctx, error, results));
            }
            match entry {
                PlanEntry::Allocated(allocation) => queue.push_back(allocation),
                PlanEntry::Skipped {
                    instance,
                    workload,
                    repetition,
                    reason,
                } => {
                    results[index] = Some(WorkloadResult {
                        workload,
                        instance,
                        repetition,
                        status: WorkloadStatus::Skipped,
                        started_at: None,
                        ended_at: None,
                        iterations: 0,
                        resources: Vec::new(),
                        detail: Some(reason.to_string()),
                    });
                }
            }
        }

        let workers = self.spec.concurrency.workers_for(queue.len());
        log::info!(
            "Executing {} instance(s) with {workers} worker(s), {} skipped",
            queue.len(),
            results.iter().filter(|r| r.is_some()).count()
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let run_token = ctx.cancel_token().child_token();
        let group_locks: Map<String, Arc<Mutex<()>>> = if self.spec.maximize {
            Map::default()
        } else {
            self.spec
                .sharing_groups
                .iter()
                .map(|group| (group.name.clone(), Arc::new(Mutex::new(()))))
                .collect()
        };

        let mut ledger = ResourceLedger::new();
        let mut running: Map<tokio::task::Id, Allocation> = Map::default();
        let mut join_set: JoinSet<InstanceRun> = JoinSet::new();
        let mut stop: Option<StopReason> = None;

        let run_deadline = async {
            match self.spec.run_timeout {
                Some(timeout) => {
                    let now = Instant::now();
                    sleep_until(now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)).await
                }
                None => pending::<()>().await,
            }
        };
        tokio::pin!(run_deadline);

        let outcome: Result<(), FatalOrchestrationError> = loop {
            if let Some(reason) = stop {
                for allocation in queue.drain(..) {
                    let index = allocation.instance.as_usize();
                    results[index] = Some(self.not_started(allocation, reason));
                }
            }
            if queue.is_empty() && join_set.is_empty() {
                break Ok(());
            }

            tokio::select! {
                biased;
                _ = &mut run_deadline, if stop.is_none() => {
                    log::warn!("Run timeout reached, cancelling all running instances");
                    stop = Some(StopReason::RunTimeout);
                    run_token.cancel();
                }
                _ = ctx.cancel_token().cancelled(), if stop.is_none() => {
                    log::warn!("Run was cancelled, stopping all running instances");
                    stop = Some(StopReason::Cancelled);
                    run_token.cancel();
                }
                Some(joined) = join_set.join_next_with_id(), if !join_set.is_empty() => {
                    let (id, run) = match joined {
                        Ok(finished) => finished,
                        Err(error) => {
                            let instance = running
                                .get(&error.id())
                                .map(|a| a.instance)
                                .unwrap_or_default();
                            break Err(FatalOrchestrationError::WorkerCrashed {
                                instance,
                                detail: error.to_string(),
                            });
                        }
                    };
                    let Some(allocation) = running.remove(&id) else {
                        break Err(FatalOrchestrationError::Invariant(
                            "finished worker does not belong to any instance".to_string(),
                        ));
                    };
                    if let Err(error) = ledger.release(allocation.instance) {
                        break Err(error);
                    }
                    let index = allocation.instance.as_usize();
                    let result = self.finish(allocation, run, stop);
                    log::info!(
                        "Instance {} (`{}`) {}",
                        result.instance,
                        result.workload,
                        result.status
                    );
                    results[index] = Some(result);
                }
                permit = semaphore.clone().acquire_owned(), if stop.is_none() && !queue.is_empty() => {
                    let Ok(permit) = permit else {
                        break Err(FatalOrchestrationError::Invariant(
                            "worker pool was closed".to_string(),
                        ));
                    };
                    let Some(allocation) = queue.pop_front() else {
                        continue;
                    };
                    if let Err(error) = ledger.acquire(
                        allocation.instance,
                        &allocation.units,
                        allocation.sharing_group.as_deref(),
                    ) {
                        break Err(error);
                    }
                    let runner = match self.runner(&allocation, &run_token, &group_locks) {
                        Ok(runner) => runner,
                        Err(error) => break Err(error),
                    };
                    log::debug!(
                        "Dispatching instance {} (`{}`)",
                        allocation.instance,
                        allocation.workload
                    );
                    let handle = join_set.spawn(runner.run(permit));
                    running.insert(handle.id(), allocation);
                }
                else => break Ok(()),
            }
        };

        let outcome = outcome.and_then(|_| {
            if ledger.is_idle() {
                Ok(())
            } else {
                Err(FatalOrchestrationError::Invariant(
                    "resource bindings were not released at the end of the run".to_string(),
                ))
            }
        });
        if let Err(error) = outcome {
            run_token.cancel();
            join_set.shutdown().await;
            return Err(self.abort(ctx, error, results));
        }

        let mut results: Vec<WorkloadResult> = results.into_iter().flatten().collect();
        if self.spec.maximize {
            self.combine_groups(&mut results);
        }
        Ok(RunReport::finalize(ctx, self.spec.name.clone(), results, None))
    }

    fn runner(
        &self,
        allocation: &Allocation,
        run_token: &CancellationToken,
        group_locks: &Map<String, Arc<Mutex<()>>>,
    ) -> Result<InstanceRunner, FatalOrchestrationError> {
        let definition = self.registry.by_name(&allocation.workload).ok_or_else(|| {
            FatalOrchestrationError::Invariant(format!(
                "workload `{}` disappeared from the registry",
                allocation.workload
            ))
        })?;
        Ok(InstanceRunner {
            allocation: allocation.clone(),
            workload: definition.workload().clone(),
            resources: self.bound_resources(allocation),
            grace_period: self.spec.grace_period,
            delay: self.spec.delay,
            max_iterations: self.spec.max_iterations,
            run_token: run_token.clone(),
            group_lock: allocation
                .sharing_group
                .as_ref()
                .and_then(|group| group_locks.get(group).cloned()),
        })
    }

    fn bound_resources(&self, allocation: &Allocation) -> Vec<BoundResource> {
        allocation
            .units
            .iter()
            .map(|id| {
                let unit = self.topology.unit(*id);
                BoundResource {
                    unit: unit.id,
                    kind: unit.kind.clone(),
                    node: self.topology.node(unit.node).name.clone(),
                    label: unit.label.clone(),
                }
            })
            .collect()
    }

    fn describe_units(&self, allocation: &Allocation) -> Vec<String> {
        allocation
            .units
            .iter()
            .map(|unit| self.topology.describe_unit(*unit).to_string())
            .collect()
    }

    fn finish(
        &self,
        allocation: Allocation,
        run: InstanceRun,
        stop: Option<StopReason>,
    ) -> WorkloadResult {
        let (status, detail) = match run.termination {
            Termination::Passed { warning } => (WorkloadStatus::Passed, warning),
            Termination::Failed(detail) => (WorkloadStatus::Failed, Some(detail)),
            Termination::TimedOut(detail) => (WorkloadStatus::TimedOut, Some(detail)),
            Termination::Interrupted => match stop {
                Some(StopReason::RunTimeout) => (
                    WorkloadStatus::TimedOut,
                    Some("run timeout reached".to_string()),
                ),
                _ => (WorkloadStatus::Failed, Some("interrupted".to_string())),
            },
            Termination::NotStarted => {
                return self.not_started(allocation, stop.unwrap_or(StopReason::Cancelled));
            }
        };
        WorkloadResult {
            resources: self.describe_units(&allocation),
            workload: allocation.workload,
            instance: allocation.instance,
            repetition: allocation.repetition,
            status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            iterations: run.iterations,
            detail,
        }
    }

    fn not_started(&self, allocation: Allocation, reason: StopReason) -> WorkloadResult {
        let (status, detail) = match reason {
            StopReason::RunTimeout => (
                WorkloadStatus::TimedOut,
                "run timeout reached before start",
            ),
            StopReason::Cancelled => (WorkloadStatus::Failed, "run cancelled before start"),
        };
        WorkloadResult {
            resources: self.describe_units(&allocation),
            workload: allocation.workload,
            instance: allocation.instance,
            repetition: allocation.repetition,
            status,
            started_at: None,
            ended_at: None,
            iterations: 0,
            detail: Some(detail.to_string()),
        }
    }

    /// With maximize semantics the members of a sharing group pass or fail
    /// together.
    fn combine_groups(&self, results: &mut [WorkloadResult]) {
        for group in &self.spec.sharing_groups {
            let culprit = results
                .iter()
                .find(|r| {
                    group.workloads.contains(&r.workload)
                        && matches!(r.status, WorkloadStatus::Failed | WorkloadStatus::TimedOut)
                })
                .map(|r| (r.workload.clone(), r.instance, r.status));
            let Some((workload, instance, status)) = culprit else {
                continue;
            };
            for result in results.iter_mut() {
                if group.workloads.contains(&result.workload)
                    && result.status == WorkloadStatus::Passed
                {
                    result.status = WorkloadStatus::Failed;
                    result.detail = Some(format!(
                        "sharing group `{}` failed: instance {instance} of `{workload}` {status}",
                        group.name
                    ));
                }
            }
        }
    }

    fn abort(
        &self,
        ctx: &RunContext,
        error: FatalOrchestrationError,
        results: Vec<Option<WorkloadResult>>,
    ) -> FatalRunError {
        log::error!("Aborting run {}: {error}", ctx.run_id());
        let completed = results.into_iter().flatten().collect();
        let report = RunReport::finalize(
            ctx,
            self.spec.name.clone(),
            completed,
            Some(error.to_string()),
        );
        FatalRunError {
            error,
            partial_report: Box::new(report),
        }
    }
}
