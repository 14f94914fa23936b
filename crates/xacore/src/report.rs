use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::ids::InstanceId;
use crate::context::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl WorkloadStatus {
    /// Statuses that do not break the verdict of a run.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, WorkloadStatus::Passed | WorkloadStatus::Skipped)
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkloadStatus::Passed => "passed",
            WorkloadStatus::Failed => "failed",
            WorkloadStatus::TimedOut => "timed-out",
            WorkloadStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Outcome of one workload instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub workload: String,
    pub instance: InstanceId,
    pub repetition: u32,
    pub status: WorkloadStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iterations: u32,
    /// Human-readable descriptions of the bound resource units
    pub resources: Vec<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub name: Option<String>,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Results in dispatch order
    pub results: Vec<WorkloadResult>,
    pub verdict: Verdict,
    pub fatal_error: Option<String>,
}

impl RunReport {
    pub(crate) fn finalize(
        ctx: &RunContext,
        name: Option<String>,
        results: Vec<WorkloadResult>,
        fatal_error: Option<String>,
    ) -> Self {
        let verdict = if fatal_error.is_none() && results.iter().all(|r| r.status.is_acceptable())
        {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        RunReport {
            run_id: ctx.run_id().to_string(),
            name,
            seed: ctx.seed(),
            started_at: ctx.started_at(),
            ended_at: Utc::now(),
            results,
            verdict,
            fatal_error,
        }
    }

    #[inline]
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn count(&self, status: WorkloadStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn results_of<'a>(&'a self, workload: &'a str) -> impl Iterator<Item = &'a WorkloadResult> {
        self.results.iter().filter(move |r| r.workload == workload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::spec_builder;

    fn ctx() -> RunContext {
        RunContext::new(&spec_builder().build())
    }

    fn result(status: WorkloadStatus) -> WorkloadResult {
        WorkloadResult {
            workload: "nst".to_string(),
            instance: InstanceId::new(0),
            repetition: 0,
            status,
            started_at: None,
            ended_at: None,
            iterations: 0,
            resources: vec![],
            detail: None,
        }
    }

    #[test]
    fn test_verdict_accepts_skips() {
        let report = RunReport::finalize(
            &ctx(),
            None,
            vec![
                result(WorkloadStatus::Passed),
                result(WorkloadStatus::Skipped),
            ],
            None,
        );
        assert!(report.is_pass());
        assert_eq!(report.count(WorkloadStatus::Skipped), 1);
    }

    #[test]
    fn test_verdict_fails_on_timeout_or_fatal() {
        let timed_out = RunReport::finalize(
            &ctx(),
            None,
            vec![result(WorkloadStatus::TimedOut)],
            None,
        );
        assert_eq!(timed_out.verdict, Verdict::Fail);

        let fatal = RunReport::finalize(&ctx(), None, vec![], Some("boom".into()));
        assert_eq!(fatal.verdict, Verdict::Fail);
    }
}
