use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use gauntlet_protocol::{TestId, TestRequest, TestResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("duplicate test id: {0}")]
    Duplicate(String),
    #[error("test queue is at capacity {0}")]
    Full(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub running: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    priority: i32,
    seq: u64,
    request: TestRequest,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger priority first, then FIFO among equals.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    pending: BinaryHeap<PendingEntry>,
    pending_ids: HashSet<TestId>,
    running: HashMap<TestId, TestRequest>,
    completed: HashMap<TestId, TestResult>,
    failed: HashMap<TestId, TestResult>,
}

impl QueueState {
    fn knows(&self, id: &TestId) -> bool {
        self.pending_ids.contains(id)
            || self.running.contains_key(id)
            || self.completed.contains_key(id)
            || self.failed.contains_key(id)
    }

    fn push_pending(&mut self, request: TestRequest) {
        self.next_seq += 1;
        self.pending_ids.insert(request.id.clone());
        self.pending.push(PendingEntry {
            priority: request.priority,
            seq: self.next_seq,
            request,
        });
    }

    fn total(&self) -> usize {
        self.pending.len() + self.running.len() + self.completed.len() + self.failed.len()
    }
}

struct QueueInner {
    max_size: usize,
    state: Mutex<QueueState>,
    added: Notify,
}

/// The test queue: pending requests ordered by priority then submission
/// order, plus running and terminal accounting. Every public operation is
/// atomic with respect to the others; a request id lives in exactly one of
/// pending, running, completed, or failed.
#[derive(Clone)]
pub struct TestQueue {
    inner: Arc<QueueInner>,
}

impl TestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_size,
                state: Mutex::new(QueueState::default()),
                added: Notify::new(),
            }),
        }
    }

    pub fn enqueue(&self, request: TestRequest) -> Result<(), QueueError> {
        {
            let mut state = self.inner.state.lock().expect("test queue lock poisoned");
            if state.knows(&request.id) {
                return Err(QueueError::Duplicate(request.id.to_string()));
            }
            if state.pending.len() >= self.inner.max_size {
                return Err(QueueError::Full(self.inner.max_size));
            }
            state.push_pending(request);
        }
        self.inner.added.notify_one();
        Ok(())
    }

    /// All-or-nothing batch submission: the whole batch is validated
    /// against duplicates and capacity before anything mutates.
    pub fn enqueue_batch(&self, requests: Vec<TestRequest>) -> Result<(), QueueError> {
        {
            let mut state = self.inner.state.lock().expect("test queue lock poisoned");

            let mut batch_ids = HashSet::new();
            for request in &requests {
                if state.knows(&request.id) || !batch_ids.insert(request.id.clone()) {
                    return Err(QueueError::Duplicate(request.id.to_string()));
                }
            }
            if state.pending.len() + requests.len() > self.inner.max_size {
                return Err(QueueError::Full(self.inner.max_size));
            }

            for request in requests {
                state.push_pending(request);
            }
        }
        self.inner.added.notify_waiters();
        Ok(())
    }

    /// Blocking pop with a timeout. `None` on expiry is how workers get a
    /// chance to observe their stop flag.
    pub async fn dequeue(&self, timeout: Duration) -> Option<TestRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.added.notified();
            {
                let mut state = self.inner.state.lock().expect("test queue lock poisoned");
                if let Some(entry) = state.pending.pop() {
                    state.pending_ids.remove(&entry.request.id);
                    return Some(entry.request);
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                _ = notified => {}
            }
        }
    }

    pub fn mark_running(&self, request: &TestRequest) {
        let mut state = self.inner.state.lock().expect("test queue lock poisoned");
        state.running.insert(request.id.clone(), request.clone());
    }

    pub fn mark_completed(&self, id: &TestId, result: TestResult) {
        let mut state = self.inner.state.lock().expect("test queue lock poisoned");
        state.running.remove(id);
        state.completed.insert(id.clone(), result);
    }

    pub fn mark_failed(&self, id: &TestId, result: TestResult) {
        let mut state = self.inner.state.lock().expect("test queue lock poisoned");
        state.running.remove(id);
        state.failed.insert(id.clone(), result);
    }

    /// Move a running request back to pending for another attempt. Returns
    /// `false` when the retry budget is spent; the caller must then mark
    /// the request failed.
    pub fn requeue_for_retry(&self, request: &TestRequest) -> bool {
        let requeued = {
            let mut state = self.inner.state.lock().expect("test queue lock poisoned");
            if !request.retries_remaining() {
                false
            } else {
                state.running.remove(&request.id);
                let mut retry = request.clone();
                retry.retry_count += 1;
                tracing::debug!(
                    test = %retry.id,
                    retry_count = retry.retry_count,
                    max_retries = retry.max_retries,
                    "requeueing test for retry"
                );
                state.push_pending(retry);
                true
            }
        };
        if requeued {
            self.inner.added.notify_one();
        }
        requeued
    }

    /// Block until pending and running are both empty.
    pub async fn wait_until_drained(&self, poll_interval: Duration) {
        loop {
            {
                let state = self.inner.state.lock().expect("test queue lock poisoned");
                if state.pending.is_empty() && state.running.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn summary(&self) -> QueueSummary {
        let state = self.inner.state.lock().expect("test queue lock poisoned");
        let total = state.total();
        let passed = state.completed.len();
        QueueSummary {
            total,
            passed,
            failed: state.failed.len(),
            pending: state.pending.len(),
            running: state.running.len(),
            success_rate: if total == 0 {
                0.0
            } else {
                passed as f64 * 100.0 / total as f64
            },
        }
    }

    /// Terminal results ordered by completion time.
    pub fn results(&self) -> Vec<TestResult> {
        let state = self.inner.state.lock().expect("test queue lock poisoned");
        let mut results: Vec<TestResult> = state
            .completed
            .values()
            .chain(state.failed.values())
            .cloned()
            .collect();
        results.sort_by_key(|result| result.completed_at);
        results
    }

    pub fn result_for(&self, id: &TestId) -> Option<TestResult> {
        let state = self.inner.state.lock().expect("test queue lock poisoned");
        state
            .completed
            .get(id)
            .or_else(|| state.failed.get(id))
            .cloned()
    }

    pub fn clear(&self) {
        let mut state = self.inner.state.lock().expect("test queue lock poisoned");
        *state = QueueState::default();
    }
}
