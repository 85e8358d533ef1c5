//! The external test driver, wrapped for
//! the job pipeline's preparation step.
//!
//! Grounded on the subprocess-with-timeout-and-process-group pattern from
//! the teacher's engine worker (spawn into a fresh process group with
//! `setpgid(0, 0)` via `nix`, so a timeout or hang-watchdog kill can reach
//! every descendant, not just the direct child).

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

const PREPARATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A known Bugzilla rate-limit phrase that, if present in
/// captured stdout, is reported distinctly from a generic preparation
/// failure.
const RATE_LIMIT_PHRASE: &str = "exceeded rate limit";

#[derive(Debug, Error)]
pub enum TestDriverError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("failed to wait on {0}: {1}")]
    Wait(&'static str, std::io::Error),
}

/// The three terminal shapes preparation can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparationOutcome {
    /// Exit code 0: a runnable per-bug script was generated.
    Ready,
    /// Preparation ran past 60 s and was killed.
    TimedOut,
    /// Non-zero exit whose stdout named a rate limit.
    BugzillaRateLimited,
    /// Non-zero exit for any other reason; `log` is the captured stdout/stderr
    /// persisted by the caller to the failure-log directory.
    Failed { log: String },
}

/// Runs `pkgdev tatt`/`tatt` against a bug number, producing (or failing to
/// produce) a per-bug shell script pair (run, clean) in `runtime_dir`.
#[async_trait]
pub trait TestDriver: Send + Sync {
    /// Preparation step.
    async fn prepare(&self, bug: u32, runtime_dir: &std::path::Path) -> PreparationOutcome;

    /// Execution step, spawn half: starts the generated script
    /// (stdout/stderr discarded) and returns immediately with its pid, so a
    /// hang watchdog can be started alongside it before the caller awaits
    /// completion.
    async fn spawn_execute(
        &self,
        bug: u32,
        runtime_dir: &std::path::Path,
    ) -> Result<RunningJob, TestDriverError>;

    /// Cleanup step: always invoked, outcome ignored by the
    /// caller beyond logging.
    async fn cleanup(&self, bug: u32, runtime_dir: &std::path::Path);
}

/// A spawned execution-step child: its pid (for the hang watchdog) plus a
/// handle to await its exit.
pub struct RunningJob {
    pub pid: u32,
    child: tokio::process::Child,
}

impl RunningJob {
    pub async fn wait(mut self) -> Result<std::process::ExitStatus, TestDriverError> {
        self.child.wait().await.map_err(|e| TestDriverError::Wait("test script", e))
    }
}

pub struct TattTestDriver {
    /// Path to the `tatt` (or `pkgdev`) binary; overridable for tests.
    binary: PathBuf,
}

impl TattTestDriver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        TattTestDriver { binary: binary.into() }
    }

    fn script_path(runtime_dir: &std::path::Path, bug: u32) -> PathBuf {
        runtime_dir.join(format!("{bug}.run.sh"))
    }
}

/// Spawn `cmd` into its own process group so it (and anything it forks) can
/// be signalled together.
#[allow(unsafe_code)]
fn spawn_in_new_group(cmd: &mut Command) -> &mut Command {
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }
    cmd
}

#[async_trait]
impl TestDriver for TattTestDriver {
    async fn prepare(&self, bug: u32, runtime_dir: &std::path::Path) -> PreparationOutcome {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("tatt")
            .arg(bug.to_string())
            .current_dir(runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        spawn_in_new_group(&mut cmd);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return PreparationOutcome::Failed { log: format!("spawn error: {e}") };
            }
        };

        let pgid = child.id().map(|pid| pid as i32);
        let wait = timeout(PREPARATION_TIMEOUT, child.wait_with_output()).await;

        let output = match wait {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return PreparationOutcome::Failed { log: format!("wait error: {e}") };
            }
            Err(_) => {
                if let Some(pgid) = pgid {
                    let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
                }
                return PreparationOutcome::TimedOut;
            }
        };

        if output.status.success() {
            return PreparationOutcome::Ready;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains(RATE_LIMIT_PHRASE) {
            return PreparationOutcome::BugzillaRateLimited;
        }
        let mut log = stdout.into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        PreparationOutcome::Failed { log }
    }

    async fn spawn_execute(
        &self,
        bug: u32,
        runtime_dir: &std::path::Path,
    ) -> Result<RunningJob, TestDriverError> {
        let script = Self::script_path(runtime_dir, bug);
        let mut cmd = Command::new(script);
        cmd.current_dir(runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        spawn_in_new_group(&mut cmd);

        let child = cmd.spawn().map_err(|e| TestDriverError::Spawn("test script", e))?;
        let pid = child.id().unwrap_or(0);
        Ok(RunningJob { pid, child })
    }

    async fn cleanup(&self, bug: u32, runtime_dir: &std::path::Path) {
        let script = Self::script_path(runtime_dir, bug);
        let status = Command::new(&script)
            .arg("--clean")
            .current_dir(runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(bug, error = %e, "cleanup step failed to run");
        }
    }
}
