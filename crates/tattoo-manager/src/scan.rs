//! `collect_status` and the scan orchestrator.

use std::time::Duration;

use tattoo_collab::{select_bugs, BugTracker};
use tattoo_proto::{ManagerStatus, Message, TesterStatus};
use tattoo_store::ResultsStore;
use tracing::{info, warn};

use crate::roster::Roster;

const STATUS_WAIT: Duration = Duration::from_secs(10);
const AUTO_SCAN_INTERVAL: Duration = Duration::from_secs(14_400);
const LOAD_POSTPONE_INTERVAL: Duration = Duration::from_secs(1_200);

/// Polls every connected Worker for its [`TesterStatus`] and bundles the
/// replies with host load/cpu info.
pub async fn collect_status(roster: &Roster) -> ManagerStatus {
    let workers = roster.workers();
    let mut receivers = Vec::with_capacity(workers.len());
    for worker in &workers {
        let rx = roster.await_status(worker.clone());
        roster.send(worker, Message::GetStatus);
        receivers.push((worker.clone(), rx));
    }

    let mut per_worker = Vec::with_capacity(receivers.len());
    for (worker, rx) in receivers {
        let status = match tokio::time::timeout(STATUS_WAIT, rx).await {
            Ok(Ok(status)) => status,
            _ => TesterStatus::default(),
        };
        per_worker.push((worker, status));
    }

    ManagerStatus {
        load: load_average(),
        cpu_count: num_cpus(),
        workers: per_worker,
    }
}

#[allow(unsafe_code)]
fn load_average() -> (f64, f64, f64) {
    let mut loads = [0f64; 3];
    // SAFETY: loads is a 3-element buffer, matching libc::getloadavg's contract.
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n < 3 {
        return (0.0, 0.0, 0.0);
    }
    (loads[0], loads[1], loads[2])
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// The shared scan routine both triggers run: selects bugs for every
/// connected Worker against an empty candidate set, filters out bugs already
/// recorded for that Worker's architecture, and dispatches the remainder at
/// background priority.
async fn run_scan(roster: &Roster, store: &ResultsStore, tracker: &dyn BugTracker) {
    let workers = roster.workers();
    if workers.is_empty() {
        return;
    }
    let selected = match select_bugs(tracker, &[], &workers).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "scan: bug-tracker query failed");
            return;
        }
    };
    for (worker, bugs) in selected {
        let remaining = match store.filter_not_tested(worker.canonical_arch(), &bugs) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "scan: results-store query failed");
                continue;
            }
        };
        if remaining.is_empty() {
            continue;
        }
        roster.send(&worker, Message::GlobalJob { priority: 100, bugs: remaining });
    }
}

/// Manual trigger (`DoScan`).
pub async fn manual_scan(roster: &Roster, store: &ResultsStore, tracker: &dyn BugTracker) {
    run_scan(roster, store, tracker).await;
}

/// The automatic every-4-hours scan loop, gated by [`gates_pass`].
pub async fn auto_scan_loop(roster: Roster, store: std::sync::Arc<ResultsStore>, tracker: std::sync::Arc<dyn BugTracker>) {
    loop {
        tokio::time::sleep(AUTO_SCAN_INTERVAL).await;
        if !gates_pass(&roster).await {
            continue;
        }
        info!("auto-scan: gates passed, scanning");
        run_scan(&roster, &store, tracker.as_ref()).await;
    }
}

/// Skip if no Workers connected; skip if any has a non-empty queue; postpone
/// in 20-minute increments while 1-minute load exceeds 50% of cpu count.
async fn gates_pass(roster: &Roster) -> bool {
    if roster.is_empty() {
        return false;
    }
    let status = collect_status(roster).await;
    if status.workers.iter().any(|(_, s)| !s.bugs_queue.is_empty()) {
        return false;
    }
    loop {
        let load1 = load_average().0;
        if load1 <= status.cpu_count as f64 * 0.5 {
            return true;
        }
        info!(load1, cpu_count = status.cpu_count, "auto-scan: postponing due to load");
        tokio::time::sleep(LOAD_POSTPONE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tattoo_core::Worker;

    #[tokio::test]
    async fn collect_status_bundles_replies_correlated_by_worker() {
        let roster = Roster::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let alpha = Worker::new("alpha", "amd64");
        roster.register(alpha.clone(), tx);

        let responder = tokio::spawn({
            let roster = roster.clone();
            let alpha = alpha.clone();
            async move {
                assert!(matches!(rx.recv().await, Some(Message::GetStatus)));
                roster.complete_status(
                    &alpha,
                    TesterStatus { bugs_queue: vec![7], merging_atoms: vec![] },
                );
            }
        });

        let status = collect_status(&roster).await;
        responder.await.unwrap();
        assert_eq!(status.workers, vec![(alpha, TesterStatus { bugs_queue: vec![7], merging_atoms: vec![] })]);
    }

    #[tokio::test]
    async fn collect_status_on_an_empty_roster_is_immediate() {
        let roster = Roster::new();
        let status = collect_status(&roster).await;
        assert!(status.workers.is_empty());
    }
}
