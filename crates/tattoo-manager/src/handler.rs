//! Per-connection handler: reads frames from one peer
//! (Tester or Controller, disambiguated by the first frame) until EOF.

use std::sync::Arc;
use std::time::Duration;

use tattoo_collab::BugTracker;
use tattoo_core::Worker;
use tattoo_proto::Message;
use tattoo_store::ResultsStore;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::roster::Roster;
use crate::scan;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(600);

pub async fn handle_connection(
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    roster: Roster,
    store: Arc<ResultsStore>,
    tracker: Arc<dyn BugTracker>,
) {
    let mut reader = BufReader::new(read_half);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(drain_writer(write_half, writer_rx));

    let mut identity: Option<Worker> = None;
    let mut keep_alive_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        match tattoo_proto::read_message(&mut reader).await {
            Ok(Message::Worker(worker)) => {
                if !worker.is_controller() {
                    roster.register(worker.clone(), writer_tx.clone());
                    keep_alive_task = Some(tokio::spawn(send_keep_alives(roster.clone(), worker.clone())));
                    info!(name = %worker.name, arch = %worker.arch, "tester connected");
                }
                identity = Some(worker);
            }
            Ok(Message::GlobalJob { priority, bugs }) => {
                let roster = roster.clone();
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    process_bugs(&roster, tracker.as_ref(), priority, bugs).await;
                });
            }
            Ok(Message::BugJobDone { bug_number, success }) => {
                if let Some(worker) = &identity {
                    if let Err(e) = store.record(worker, bug_number, success) {
                        warn!(error = %e, "failed to record job outcome");
                    }
                }
            }
            Ok(Message::CompletedJobsRequest { since }) => {
                let response = match store.since(since) {
                    Ok(r) => tattoo_proto::CompletedJobsResponse { passes: r.passes, failed: r.failed },
                    Err(e) => {
                        warn!(error = %e, "failed to query results store");
                        tattoo_proto::CompletedJobsResponse::default()
                    }
                };
                let _ = writer_tx.send(Message::CompletedJobsResponse(response));
            }
            Ok(Message::DoScan) => {
                let roster = roster.clone();
                let store = Arc::clone(&store);
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    scan::manual_scan(&roster, &store, tracker.as_ref()).await;
                });
            }
            Ok(Message::TesterStatus(status)) => {
                if let Some(worker) = &identity {
                    roster.complete_status(worker, status);
                }
            }
            Ok(Message::GetStatus) => {
                let status = scan::collect_status(&roster).await;
                let _ = writer_tx.send(Message::ManagerStatus(status));
            }
            Ok(_) => {}
            Err(tattoo_proto::ProtocolError::ConnectionClosed) => break,
            Err(e) => {
                warn!(error = %e, "discarding malformed frame");
            }
        }
    }

    if let Some(task) = keep_alive_task {
        task.abort();
    }
    if let Some(worker) = identity {
        roster.remove(&worker);
        info!(name = %worker.name, "worker disconnected");
    }
    drop(writer_tx);
    writer_task.abort();
}

async fn process_bugs(roster: &Roster, tracker: &dyn BugTracker, priority: i32, bugs: Vec<u32>) {
    let workers = roster.workers();
    match tattoo_collab::select_bugs(tracker, &bugs, &workers).await {
        Ok(selected) => {
            for (worker, bugs) in selected {
                roster.send(&worker, Message::GlobalJob { priority, bugs });
            }
        }
        Err(e) => warn!(error = %e, "process_bugs: bug-tracker query failed"),
    }
}

async fn send_keep_alives(roster: Roster, worker: Worker) {
    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        if !roster.send(&worker, Message::KeepAlive) {
            break;
        }
    }
}

async fn drain_writer(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if tattoo_proto::write_message(&mut write_half, &msg).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
