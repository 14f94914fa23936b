use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use serde::{Deserialize, Deserializer};
use tokio::process::Command;

use xacore::topology::{ACCELERATOR_KIND, CPU_CORES_KIND};
use xacore::workload::{InvocationContext, InvocationFuture, InvocationOutcome, Workload};

/// Exit code of a program that asks to be started again.
pub const DEFAULT_NEEDS_MORE_TIME_CODE: i32 = 3;

pub const XA_ACCELERATORS: &str = "XA_ACCELERATORS";
pub const XA_CPU_GROUPS: &str = "XA_CPU_GROUPS";
pub const XA_DURATION: &str = "XA_DURATION";
pub const XA_ITERATION: &str = "XA_ITERATION";
pub const XA_WORKLOAD: &str = "XA_WORKLOAD";
pub const XA_INSTANCE: &str = "XA_INSTANCE";

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
}

fn default_pin() -> bool {
    true
}

fn default_needs_more_time_code() -> i32 {
    DEFAULT_NEEDS_MORE_TIME_CODE
}

/// Workload definition read from a catalog file.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CommandWorkloadDef {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub command: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Required resources, e.g. `{ accelerator = 1 }`
    #[serde(default)]
    pub resources: BTreeMap<String, u32>,

    /// Default minimum duration in seconds
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_seconds")]
    pub duration: Duration,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Pin the program to the bound CPU groups with `taskset`
    #[serde(default = "default_pin")]
    pub pin: bool,

    #[serde(default = "default_needs_more_time_code")]
    pub needs_more_time_code: i32,
}

/// Runs an external program for every invocation.
pub struct CommandWorkload {
    def: CommandWorkloadDef,
}

impl CommandWorkload {
    pub fn new(def: CommandWorkloadDef) -> Self {
        CommandWorkload { def }
    }

    fn program_args(&self, ctx: &InvocationContext) -> Vec<String> {
        let cpus = ctx.labels_of_kind(CPU_CORES_KIND);
        if self.def.pin && !cpus.is_empty() {
            let mut args = vec!["taskset".to_string(), "-c".to_string(), cpus.join(",")];
            args.extend(self.def.command.iter().cloned());
            args
        } else {
            self.def.command.clone()
        }
    }

    fn program_env(&self, ctx: &InvocationContext) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .def
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push((
            XA_ACCELERATORS.to_string(),
            ctx.labels_of_kind(ACCELERATOR_KIND).join(","),
        ));
        env.push((
            XA_CPU_GROUPS.to_string(),
            ctx.labels_of_kind(CPU_CORES_KIND).join(";"),
        ));
        env.push((
            XA_DURATION.to_string(),
            seconds_rounded_up(ctx.remaining).to_string(),
        ));
        env.push((XA_ITERATION.to_string(), ctx.iteration.to_string()));
        env.push((XA_WORKLOAD.to_string(), ctx.workload.clone()));
        env.push((XA_INSTANCE.to_string(), ctx.instance.to_string()));
        env
    }

    fn command(&self, ctx: &InvocationContext) -> Result<Command, String> {
        let args = self.program_args(ctx);
        let Some((program, rest)) = args.split_first() else {
            return Err("No command arguments".to_string());
        };
        let mut command = Command::new(program);

        #[cfg(target_os = "linux")]
        unsafe {
            command.pre_exec(|| {
                // New process group, so that a signal reaches the whole program tree
                if let Err(error) = nix::unistd::setsid() {
                    log::error!("Cannot set SID for workload process: {error:?}");
                }
                Ok(())
            });
        }

        command.kill_on_drop(true);
        command.args(rest);
        if let Some(cwd) = &self.def.cwd {
            command.current_dir(cwd);
        }
        command.stdin(Stdio::null());
        command.envs(self.program_env(ctx));
        Ok(command)
    }
}

impl Workload for CommandWorkload {
    fn start(&self, ctx: InvocationContext) -> InvocationFuture {
        let needs_more_time_code = self.def.needs_more_time_code;
        let command = self.command(&ctx);
        Box::pin(async move {
            let mut command = match command {
                Ok(command) => command,
                Err(error) => return InvocationOutcome::Failure(error),
            };
            log::trace!("Running command {command:?}");
            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(error) => {
                    return InvocationOutcome::Failure(format!("Cannot start program: {error}"));
                }
            };
            let pid = child.id();

            let status = tokio::select! {
                biased;
                status = child.wait() => status,
                _ = ctx.cancel.cancelled() => {
                    log::debug!(
                        "Terminating instance {} of `{}` with SIGTERM",
                        ctx.instance,
                        ctx.workload
                    );
                    if let Some(pid) = pid {
                        terminate(pid);
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => status_to_outcome(status, needs_more_time_code),
                Err(error) => InvocationOutcome::Failure(format!("Cannot wait for program: {error}")),
            }
        })
    }
}

fn terminate(pid: u32) {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    let result = match nix::unistd::getpgid(Some(pid)) {
        Ok(pgid) => signal::killpg(pgid, Some(Signal::SIGTERM)),
        Err(_) => signal::kill(pid, Some(Signal::SIGTERM)),
    };
    if let Err(error) = result {
        log::debug!("Cannot send SIGTERM to PID {pid}: {error:?}");
    }
}

fn status_to_outcome(status: ExitStatus, needs_more_time_code: i32) -> InvocationOutcome {
    if status.success() {
        return InvocationOutcome::Success;
    }
    let code = status.code().unwrap_or(-1);
    if code == needs_more_time_code {
        return InvocationOutcome::NeedsMoreTime;
    }

    let mut error_msg = format!("Program terminated with exit code {code}.");

    #[cfg(target_os = "linux")]
    {
        use std::fmt::Write;
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            let name = Signal::try_from(signal)
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            let _ = write!(error_msg, " Received signal {signal} ({name}).");
        }
    }
    InvocationOutcome::Failure(error_msg)
}

/// Whole seconds, a partial second counts as a full one.
fn seconds_rounded_up(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0))
}
