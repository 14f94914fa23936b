use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::allocator::Allocation;
use crate::workload::{BoundResource, InvocationContext, InvocationOutcome, Workload};

pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How a worker finished driving an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Termination {
    Passed { warning: Option<String> },
    Failed(String),
    TimedOut(String),
    /// The run was cancelled while the instance was running
    Interrupted,
    /// The run was cancelled before the instance started
    NotStarted,
}

#[derive(Debug)]
pub(crate) struct InstanceRun {
    pub termination: Termination,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iterations: u32,
}

pub(crate) struct InstanceRunner {
    pub allocation: Allocation,
    pub workload: Arc<dyn Workload>,
    pub resources: Vec<BoundResource>,
    pub grace_period: Duration,
    pub delay: Duration,
    pub max_iterations: u32,
    pub run_token: CancellationToken,
    /// Serializes members of a sharing group when they should not overlap
    pub group_lock: Option<Arc<Mutex<()>>>,
}

enum Interruption {
    Timeout,
    RunCancelled,
}

impl InstanceRunner {
    pub async fn run(self, _permit: OwnedSemaphorePermit) -> InstanceRun {
        let _group_guard = match &self.group_lock {
            Some(lock) => {
                tokio::select! {
                    guard = lock.clone().lock_owned() => Some(guard),
                    _ = self.run_token.cancelled() => {
                        return InstanceRun {
                            termination: Termination::NotStarted,
                            started_at: None,
                            ended_at: None,
                            iterations: 0,
                        };
                    }
                }
            }
            None => None,
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start
            .checked_add(self.allocation.timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let (termination, iterations) = self.drive(deadline).await;
        InstanceRun {
            termination,
            started_at: Some(started_at),
            ended_at: Some(Utc::now()),
            iterations,
        }
    }

    async fn drive(&self, deadline: Instant) -> (Termination, u32) {
        let instance = self.allocation.instance;
        let min_duration = self.allocation.min_duration;
        let mut busy = Duration::ZERO;
        let mut iteration = 0;

        loop {
            iteration += 1;
            let token = self.run_token.child_token();
            let ctx = InvocationContext {
                workload: self.allocation.workload.clone(),
                instance,
                iteration,
                resources: self.resources.clone(),
                duration: min_duration,
                remaining: min_duration.saturating_sub(busy),
                cancel: token.clone(),
            };
            log::debug!(
                "Starting iteration {iteration} of instance {instance} (`{}`)",
                self.allocation.workload
            );

            let invocation_start = Instant::now();
            // A panicking workload fails its own instance, not the run
            let workload = &self.workload;
            let mut invocation = std::pin::pin!(
                AssertUnwindSafe(async move { workload.start(ctx).await }).catch_unwind()
            );
            let interruption = tokio::select! {
                biased;
                _ = self.run_token.cancelled() => Some(Interruption::RunCancelled),
                _ = sleep_until(deadline) => Some(Interruption::Timeout),
                outcome = &mut invocation => {
                    busy += invocation_start.elapsed();
                    match outcome {
                        Ok(InvocationOutcome::Failure(detail)) => {
                            return (Termination::Failed(format!("iteration {iteration}: {detail}")), iteration);
                        }
                        Ok(InvocationOutcome::Success | InvocationOutcome::NeedsMoreTime) => None,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            log::error!(
                                "Instance {instance} (`{}`) panicked in iteration {iteration}: {message}",
                                self.allocation.workload
                            );
                            return (
                                Termination::Failed(format!("iteration {iteration}: panicked: {message}")),
                                iteration,
                            );
                        }
                    }
                }
            };

            if let Some(interruption) = interruption {
                token.cancel();
                if tokio::time::timeout(self.grace_period, &mut invocation)
                    .await
                    .is_err()
                {
                    log::warn!(
                        "Instance {instance} (`{}`) did not stop within the grace period, dropping it",
                        self.allocation.workload
                    );
                }
                return (self.interrupted(interruption), iteration);
            }

            if busy >= min_duration {
                return (Termination::Passed { warning: None }, iteration);
            }
            if iteration >= self.max_iterations {
                let warning = format!(
                    "iteration limit {} reached after {:.1}s of the required {:.1}s",
                    self.max_iterations,
                    busy.as_secs_f64(),
                    min_duration.as_secs_f64()
                );
                log::warn!("Instance {instance} (`{}`): {warning}", self.allocation.workload);
                return (Termination::Passed { warning: Some(warning) }, iteration);
            }

            if !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.run_token.cancelled() => {
                        return (self.interrupted(Interruption::RunCancelled), iteration);
                    }
                    _ = sleep_until(deadline) => {
                        return (self.interrupted(Interruption::Timeout), iteration);
                    }
                    _ = sleep(self.delay) => {}
                }
            }
        }
    }

    fn interrupted(&self, interruption: Interruption) -> Termination {
        match interruption {
            Interruption::Timeout => Termination::TimedOut(format!(
                "timeout of {:.1}s exceeded",
                self.allocation.timeout.as_secs_f64()
            )),
            Interruption::RunCancelled => Termination::Interrupted,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
