//! Manager roster: `Map[Worker → Writer]` plus the
//! pending-status one-shot map used by [`crate::scan::collect_status`].
//!
//! Grounded on the teacher's single-mutex shared-state pattern: one
//! `parking_lot::Mutex` owned by the accept/handler tasks, never held across
//! an await point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tattoo_core::Worker;
use tattoo_proto::{Message, TesterStatus};
use tokio::sync::{mpsc, oneshot};

/// A handle the per-connection writer task drains; sending queues a frame
/// for that Worker without blocking the caller.
pub type WriterHandle = mpsc::UnboundedSender<Message>;

#[derive(Default)]
struct Inner {
    workers: HashMap<Worker, WriterHandle>,
    pending_status: HashMap<Worker, oneshot::Sender<TesterStatus>>,
}

/// Shared, cloneable roster handle.
#[derive(Clone, Default)]
pub struct Roster {
    inner: Arc<Mutex<Inner>>,
}

impl Roster {
    pub fn new() -> Self {
        Roster::default()
    }

    pub fn register(&self, worker: Worker, writer: WriterHandle) {
        self.inner.lock().workers.insert(worker, writer);
    }

    pub fn remove(&self, worker: &Worker) {
        let mut inner = self.inner.lock();
        inner.workers.remove(worker);
        inner.pending_status.remove(worker);
    }

    pub fn send(&self, worker: &Worker, msg: Message) -> bool {
        match self.inner.lock().workers.get(worker) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    pub fn workers(&self) -> Vec<Worker> {
        self.inner.lock().workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install a one-shot for `worker` and return its receiver.
    pub fn await_status(&self, worker: Worker) -> oneshot::Receiver<TesterStatus> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().pending_status.insert(worker, tx);
        rx
    }

    /// Complete the pending status future for `worker`, if one is installed.
    pub fn complete_status(&self, worker: &Worker, status: TesterStatus) {
        if let Some(tx) = self.inner.lock().pending_status.remove(worker) {
            let _ = tx.send(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_remove_clears_membership() {
        let roster = Roster::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let w = Worker::new("alpha", "amd64");
        roster.register(w.clone(), tx);
        assert_eq!(roster.workers(), vec![w.clone()]);
        roster.remove(&w);
        assert!(roster.is_empty());
    }

    #[test]
    fn send_to_unknown_worker_returns_false() {
        let roster = Roster::new();
        assert!(!roster.send(&Worker::new("ghost", "amd64"), Message::KeepAlive));
    }

    #[tokio::test]
    async fn complete_status_resolves_the_matching_receiver_only() {
        let roster = Roster::new();
        let alpha = Worker::new("alpha", "amd64");
        let beta = Worker::new("beta", "arm64");
        let rx_alpha = roster.await_status(alpha.clone());
        let rx_beta = roster.await_status(beta.clone());

        let status = TesterStatus { bugs_queue: vec![1], merging_atoms: vec![] };
        roster.complete_status(&alpha, status.clone());

        assert_eq!(rx_alpha.await.unwrap(), status);
        drop(rx_beta);
    }
}
