//! Job pipeline: preparation, execution with a hang
//! watchdog, outcome classification, and cleanup, for each bug a worker
//! task dequeues.

use std::path::PathBuf;
use std::sync::Arc;

use tattoo_collab::{BugTracker, IrcRelay, MergeObserver, PreparationOutcome, RepoHelper, TestDriver};
use tattoo_core::Report;
use tattoo_queue::PriorityBugQueue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::job::JobOutcome;
use crate::watchdog;

/// External collaborators a job worker needs; boxed trait objects so the
/// pipeline is testable against fakes.
pub struct Collaborators {
    pub test_driver: Box<dyn TestDriver>,
    pub merge_observer: Box<dyn MergeObserver>,
    pub irc: IrcRelay,
    pub repo: Box<dyn RepoHelper>,
    pub tracker: Box<dyn BugTracker>,
}

/// One consumer of the shared priority queue, run for the lifetime of a
/// Tester session.
pub async fn job_worker(
    queue: PriorityBugQueue,
    collab: Arc<Collaborators>,
    runtime_dir: PathBuf,
    done_tx: mpsc::UnboundedSender<(u32, bool, String)>,
) {
    loop {
        let bug = queue.get().await;
        let outcome = run_job(bug, &collab, &runtime_dir).await;
        if let Some(outcome) = outcome {
            let _ = done_tx.send((outcome.bug, outcome.success, outcome.summary));
        }
        // `done` regardless of outcome: the bug always leaves the running set
        // once the pipeline reaches a terminal state.
        let _ = queue.done(bug);
    }
}

/// Runs the four pipeline steps for one bug. Returns `None` only when
/// preparation times out — no `BugJobDone` is sent in that case.
async fn run_job(
    bug: u32,
    collab: &Collaborators,
    runtime_dir: &std::path::Path,
) -> Option<JobOutcome> {
    let outcome = match collab.test_driver.prepare(bug, runtime_dir).await {
        PreparationOutcome::Ready => execute_and_classify(bug, collab, runtime_dir).await,
        PreparationOutcome::TimedOut => {
            info!(bug, "tatt timed out");
            // Preparation timeouts send no BugJobDone — nothing to record.
            None
        }
        PreparationOutcome::BugzillaRateLimited => {
            warn!(bug, "tatt failed with bugzilla rate limit");
            Some(JobOutcome::failure(bug, "tatt failed with bugzilla rate"))
        }
        PreparationOutcome::Failed { log } => {
            persist_failure_log(runtime_dir, bug, &log);
            warn!(bug, "tatt failed");
            Some(JobOutcome::failure(bug, "tatt failed"))
        }
    };

    collab.test_driver.cleanup(bug, runtime_dir).await;
    if let Some(outcome) = &outcome {
        collab.irc.notify(bug, outcome.irc_summary()).await;
    }
    outcome
}

async fn execute_and_classify(
    bug: u32,
    collab: &Collaborators,
    runtime_dir: &std::path::Path,
) -> Option<JobOutcome> {
    let running = match collab.test_driver.spawn_execute(bug, runtime_dir).await {
        Ok(r) => r,
        Err(e) => {
            warn!(bug, error = %e, "failed to spawn test script");
            return Some(JobOutcome::failure(bug, "tatt failed"));
        }
    };

    let cancel = CancellationToken::new();
    let watchdog_handle = tokio::spawn(watchdog::watch(running.pid, cancel.clone()));

    let status = match running.wait().await {
        Ok(s) => s,
        Err(e) => {
            cancel.cancel();
            let _ = watchdog_handle.await;
            warn!(bug, error = %e, "failed to wait on test script");
            return Some(JobOutcome::failure(bug, "tatt failed"));
        }
    };
    // Mandatory: the watchdog must stop sampling once the subprocess exits.
    cancel.cancel();
    let hung = watchdog_handle.await.unwrap_or(false);

    if hung {
        return Some(JobOutcome::failure(bug, "hang"));
    }

    if status.success() {
        Some(JobOutcome::success(bug))
    } else {
        let report_path = runtime_dir.join(format!("{bug}.report"));
        let report = Report::parse_file(&report_path);
        Some(JobOutcome::failure(bug, report.failure_summary()))
    }
}

fn persist_failure_log(runtime_dir: &std::path::Path, bug: u32, log: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = runtime_dir.join(format!("{bug}-{now}.log"));
    if let Err(e) = std::fs::write(&path, log) {
        warn!(bug, error = %e, "failed to persist failure log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tattoo_collab::BugzillaError;
    use tattoo_core::Bug;

    struct FixedDriver {
        prep: PreparationOutcome,
        cleanups: AtomicU32,
    }

    #[async_trait]
    impl TestDriver for FixedDriver {
        async fn prepare(&self, _bug: u32, _dir: &std::path::Path) -> PreparationOutcome {
            self.prep.clone()
        }

        async fn spawn_execute(
            &self,
            _bug: u32,
            _dir: &std::path::Path,
        ) -> Result<tattoo_collab::RunningJob, tattoo_collab::TestDriverError> {
            unreachable!("these tests only exercise the preparation branch")
        }

        async fn cleanup(&self, _bug: u32, _dir: &std::path::Path) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoopObserver;
    #[async_trait]
    impl MergeObserver for NoopObserver {
        async fn merging_atoms(&self) -> Vec<String> {
            Vec::new()
        }
    }

    struct NoopRepo;
    #[async_trait]
    impl RepoHelper for NoopRepo {
        async fn keyword(&self, _atom: &str, _arch: &str, _bug: u32) -> Result<(), tattoo_collab::RepoError> {
            Ok(())
        }
        async fn stabilize(&self, _atom: &str, _arch: &str, _bug: u32) -> Result<(), tattoo_collab::RepoError> {
            Ok(())
        }
    }

    struct NoopTracker;
    #[async_trait]
    impl BugTracker for NoopTracker {
        async fn find_bugs(&self, _ids: &[u32], _cc: &[String]) -> Result<HashMap<u32, Bug>, BugzillaError> {
            Ok(HashMap::new())
        }
        async fn fetch_by_ids(&self, _ids: &[u32]) -> Result<HashMap<u32, Bug>, BugzillaError> {
            Ok(HashMap::new())
        }
        async fn resolve(&self, _id: u32, _comment: &str) -> Result<(), BugzillaError> {
            Ok(())
        }
        async fn uncc(&self, _id: u32, _arches: &[String]) -> Result<(), BugzillaError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn preparation_timeout_yields_no_outcome() {
        let collab = Collaborators {
            test_driver: Box::new(FixedDriver {
                    prep: PreparationOutcome::TimedOut,
                    cleanups: AtomicU32::new(0),
            }),
            merge_observer: Box::new(NoopObserver),
            irc: IrcRelay::new("irc://test", "fake"),
            repo: Box::new(NoopRepo),
            tracker: Box::new(NoopTracker),
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_job(1, &collab, dir.path()).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn bugzilla_rate_limit_is_reported_as_a_distinct_failure() {
        let collab = Collaborators {
            test_driver: Box::new(FixedDriver {
                    prep: PreparationOutcome::BugzillaRateLimited,
                    cleanups: AtomicU32::new(0),
            }),
            merge_observer: Box::new(NoopObserver),
            irc: IrcRelay::new("irc://test", "fake"),
            repo: Box::new(NoopRepo),
            tracker: Box::new(NoopTracker),
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_job(1, &collab, dir.path()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.summary, "tatt failed with bugzilla rate");
    }
}
