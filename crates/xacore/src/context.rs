use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::RunSpec;

/// Explicit per-run state handed from the allocator to the scheduler.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    seed: u64,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(spec: &RunSpec) -> Self {
        let started_at = Utc::now();
        let run_id = format!(
            "{}-{:04x}",
            started_at.format("%Y%m%d-%H%M%S"),
            rand::random::<u16>()
        );
        RunContext {
            run_id,
            seed: spec.seed,
            started_at,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token interrupts the run (e.g. on SIGINT).
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
