//! Hang watchdog: kills a test job's process group if its
//! recursive child-PID set stops changing between samples.
//!
//! Grounded on the teacher's own watchdog-over-a-running-subprocess idiom
//! (a cancellable sampling loop racing the child's exit via
//! `tokio_util::sync::CancellationToken`), generalised here to sample
//! `/proc` recursively rather than a single pid.

use std::collections::BTreeSet;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

const GRACE_PERIOD: Duration = Duration::from_secs(600);
const DEFAULT_HANG_TIMEOUT_SECS: u64 = 6 * 60 * 60;

fn hang_timeout() -> Duration {
    std::env::var("HANG_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_HANG_TIMEOUT_SECS))
}

/// Recursive child PIDs of `pid`, read from `/proc/<pid>/task/*/children`.
/// Returns `None` if `/proc` enumeration is unavailable.
fn recursive_children(pid: u32) -> Option<BTreeSet<u32>> {
    if !std::path::Path::new("/proc").is_dir() {
        return None;
    }
    let mut seen = BTreeSet::new();
    let mut frontier = vec![pid];
    while let Some(p) = frontier.pop() {
        let task_dir = format!("/proc/{p}/task");
        let Ok(entries) = std::fs::read_dir(&task_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let children_path = entry.path().join("children");
            let Ok(text) = std::fs::read_to_string(&children_path) else {
                continue;
            };
            for tok in text.split_whitespace() {
                if let Ok(child) = tok.parse::<u32>() {
                    if seen.insert(child) {
                        frontier.push(child);
                    }
                }
            }
        }
    }
    Some(seen)
}

/// Runs until `cancel` fires (the job completed) or a hang is detected, in
/// which case the process group rooted at `root_pid` is killed.
///
/// Cancellation at job completion is mandatory; callers must cancel
/// `cancel` once the main test subprocess exits, win or lose.
pub async fn watch(root_pid: u32, cancel: CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        hung = sample_loop(root_pid, cancel.clone()) => hung,
    }
}

async fn sample_loop(root_pid: u32, cancel: CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(GRACE_PERIOD) => {}
        _ = cancel.cancelled() => return false,
    }

    let mut previous = recursive_children(root_pid);
    if previous.is_none() {
        // Enumeration unavailable: inert for the lifetime of the job.
        cancel.cancelled().await;
        return false;
    }

    let interval = hang_timeout();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return false,
        }
        let current = recursive_children(root_pid);
        if current == previous {
            let _ = killpg(Pid::from_raw(root_pid as i32), Signal::SIGKILL);
            return true;
        }
        previous = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_before_the_grace_period_elapses_reports_no_hang() {
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                c2.cancel();
        });
        let hung = watch(std::process::id(), cancel).await;
        assert!(!hung);
    }

    #[test]
    fn missing_proc_directory_is_treated_as_unavailable() {
        // On non-Linux CI this also exercises the None path; on Linux, the
        // sentinel pid 1 may or may not be visible depending on namespace,
        // but the function must never panic either way.
        let _ = recursive_children(1);
    }
}
