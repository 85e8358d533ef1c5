//! Priority bug queue: a min-heap on `(priority, insertion_count)`
//! serving N cooperatively-scheduled consumers within one Tester process.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// `done()` was called for a bug that isn't in the running set.
#[derive(Debug, thiserror::Error)]
#[error("bug {0} is not in the running set")]
pub struct NotRunningError(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    priority: i32,
    insertion_count: u64,
    bug: u32,
}

struct Inner {
    // Reverse so BinaryHeap (a max-heap) pops the smallest (priority, count)
    // first — smaller priority number = higher priority, FIFO within a band.
    heap: BinaryHeap<Reverse<Entry>>,
    next_count: u64,
    // Multiset: a bug can only run once per Tester in practice, but we track
    // a count for symmetry with the Python original's list-based `running`.
    running: HashMap<u32, u32>,
}

impl Inner {
    fn queued_contains(&self, bug: u32) -> bool {
        self.heap.iter().any(|Reverse(e)| e.bug == bug)
    }

    fn is_running(&self, bug: u32) -> bool {
        self.running.contains_key(&bug)
    }
}

/// A shared, cloneable handle onto the queue. Cheap to clone: consumers and
/// the frame-reader each hold one.
#[derive(Clone)]
pub struct PriorityBugQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl Default for PriorityBugQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityBugQueue {
    pub fn new() -> Self {
        PriorityBugQueue {
            inner: Arc::new(Mutex::new(Inner {
                        heap: BinaryHeap::new(),
                        next_count: 0,
                        running: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Non-blocking: assigns the next monotonic insertion count and pushes
    /// `bug` at `priority`.
    pub fn put(&self, priority: i32, bug: u32) {
        let mut inner = self.inner.lock();
        let count = inner.next_count;
        inner.next_count += 1;
        inner.heap.push(Reverse(Entry {
                    priority,
                    insertion_count: count,
                    bug,
        }));
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue `bugs` at `priority`, skipping any already present in
    /// `queued ∪ running`.
    pub fn append_bugs(&self, priority: i32, bugs: impl IntoIterator<Item = u32>) {
        let mut inner = self.inner.lock();
        for bug in bugs {
            if inner.queued_contains(bug) || inner.is_running(bug) {
                continue;
            }
            let count = inner.next_count;
            inner.next_count += 1;
            inner.heap.push(Reverse(Entry {
                        priority,
                        insertion_count: count,
                        bug,
            }));
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// True if `bug` is already queued or running — used by callers (e.g.
    /// the Tester's `GlobalJob` handler) wanting to filter before computing
    /// the bug selector over a smaller candidate set.
    pub fn contains(&self, bug: u32) -> bool {
        let inner = self.inner.lock();
        inner.queued_contains(bug) || inner.is_running(bug)
    }

    /// Block until an item is available, then move it into the running set
    /// and return it. Cancellation-safe: if the awaiting task is dropped
    /// before this resolves, no item is removed from the queue.
    pub async fn get(&self) -> u32 {
        loop {
            // Register interest before checking, so a `put` landing between
            // the check and the wait can't be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(Reverse(entry)) = inner.heap.pop() {
                    *inner.running.entry(entry.bug).or_insert(0) += 1;
                    return entry.bug;
                }
            }
            notified.await;
        }
    }

    /// Remove one occurrence of `bug` from the running set.
    pub fn done(&self, bug: u32) -> Result<(), NotRunningError> {
        let mut inner = self.inner.lock();
        match inner.running.get_mut(&bug) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                inner.running.remove(&bug);
                Ok(())
            }
            None => Err(NotRunningError(bug)),
        }
    }

    /// A consistent `(running, queued)` snapshot for status replies, running
    /// bugs first as required by the Tester status ordering.
    pub fn snapshot(&self) -> (Vec<u32>, Vec<u32>) {
        let inner = self.inner.lock();
        let running: Vec<u32> = inner.running.keys().copied().collect();
        let mut queued: Vec<(i32, u64, u32)> = inner
            .heap
            .iter()
            .map(|Reverse(e)| (e.priority, e.insertion_count, e.bug))
            .collect();
        queued.sort();
        (running, queued.into_iter().map(|(_, _, b)| b).collect())
    }
}
