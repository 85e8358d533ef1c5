//! The closed set of typed messages exchanged on every socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tattoo_core::Worker;

/// One frame. Tagged by `kind` so an unrecognised future variant fails to
/// decode cleanly instead of silently matching the wrong shape (the decode
/// error itself is what callers treat as "log and discard",).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    /// First frame each peer sends to identify itself. Empty `arch` marks a
    /// Controller.
    Worker(Worker),

    /// "Consider these bugs." Smaller `priority` = higher priority.
    GlobalJob { priority: i32, bugs: Vec<u32> },

    /// Tester → Manager, once per finished job.
    BugJobDone { bug_number: u32, success: bool },

    /// Controller → Manager.
    CompletedJobsRequest { since: DateTime<Utc> },

    CompletedJobsResponse(CompletedJobsResponse),

    /// Trigger a scan of "any open ready bug" for each connected Worker.
    DoScan,

    GetStatus,
    TesterStatus(TesterStatus),
    ManagerStatus(ManagerStatus),

    /// Nil-payload keep-alive; ignored semantically by every reader.
    KeepAlive,
}

/// Reply to [`Message::CompletedJobsRequest`]: `(bug_no, arch)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletedJobsResponse {
    pub passes: Vec<(u32, String)>,
    pub failed: Vec<(u32, String)>,
}

/// A Tester's status reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TesterStatus {
    /// Running bugs first, then queued.
    pub bugs_queue: Vec<u32>,
    /// Atom identifiers reported by the package-merge observer.
    pub merging_atoms: Vec<String>,
}

/// The Manager's aggregated status reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub load: (f64, f64, f64),
    pub cpu_count: usize,
    pub workers: Vec<(Worker, TesterStatus)>,
}
