//! Keyed operation queue.
//!
//! Operations sharing a lane execute strictly in submission order, one at a
//! time; operations on distinct lanes run concurrently on the runtime's
//! worker pool. Each lane is a dedicated worker task fed by an unbounded
//! channel, so an abandoned caller (e.g. a timed-out future) never stops a
//! queued operation from running to completion.
//!
//! Lanes live only as long as they have work: a worker that drains its
//! channel retires itself, and the next operation on that key respawns it.
//! Task count tracks in-flight work, not historical key cardinality.
//!
//! A failing operation delivers its error only to its own waiter. The lane
//! keeps draining; sibling lanes are unaffected.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cask_core::{CacheError, CacheResult, StorageError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Type-erased unit of work. Result delivery happens inside the job via a
/// oneshot channel, so the worker never sees the result type.
type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedJob {
    sequence_id: u64,
    job: Job,
}

struct Lane {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

enum State {
    Open {
        lanes: HashMap<String, Lane>,
        workers: HashMap<String, JoinHandle<()>>,
    },
    Draining,
}

/// Per-key FIFO dispatcher with queue-wide graceful shutdown.
pub struct KeyedQueue {
    state: Arc<Mutex<State>>,
    next_sequence_id: AtomicU64,
    done_tx: Mutex<Option<watch::Sender<bool>>>,
    done_rx: watch::Receiver<bool>,
}

impl Default for KeyedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedQueue {
    /// Create an empty queue. Lanes are spawned lazily on first use and
    /// retired once idle.
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(State::Open {
                lanes: HashMap::new(),
                workers: HashMap::new(),
            })),
            next_sequence_id: AtomicU64::new(0),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    /// Number of live lanes, i.e. worker tasks currently alive.
    pub fn lane_count(&self) -> usize {
        match self.state.lock() {
            Ok(state) => match &*state {
                State::Open { lanes, .. } => lanes.len(),
                State::Draining => 0,
            },
            Err(_) => 0,
        }
    }

    /// Submit a unit of work to a lane and await its result.
    ///
    /// Work on the same lane runs FIFO in submission order; distinct lanes
    /// interleave freely. The work is submitted as soon as this future is
    /// first polled; dropping the future afterwards abandons the result but
    /// not the work.
    ///
    /// Fails fast with [`CacheError::Disposed`] once shutdown has begun.
    pub async fn enqueue<T, F, Fut>(&self, lane: &str, work: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let sequence_id = self.next_sequence_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock().map_err(|_| StorageError::Transaction {
                reason: "queue state lock poisoned".to_string(),
            })?;
            let State::Open { lanes, workers } = &mut *state else {
                return Err(CacheError::Disposed);
            };
            let lane_entry = lanes.entry(lane.to_string()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = tokio::spawn(run_lane(lane.to_string(), rx, Arc::clone(&self.state)));
                workers.insert(lane.to_string(), worker);
                Lane { tx }
            });
            let job: Job = Box::pin(async move {
                let result = work().await;
                // The waiter may have been abandoned; the work still ran.
                let _ = result_tx.send(result);
            });
            lane_entry
                .tx
                .send(QueuedJob { sequence_id, job })
                .map_err(|_| CacheError::Disposed)?;
            trace!(lane, sequence_id, "operation enqueued");
        }

        result_rx.await.map_err(|_| {
            // The job's sender was dropped without a result: the unit of
            // work panicked. Its lane keeps running; this waiter fails.
            CacheError::from(StorageError::Transaction {
                reason: "queued operation panicked".to_string(),
            })
        })?
    }

    /// Stop accepting work, drain every lane, and resolve when the last
    /// operation finishes. Idempotent: later calls await the same drain.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            match std::mem::replace(&mut *state, State::Draining) {
                State::Open { lanes, workers } => Some((lanes, workers)),
                State::Draining => None,
            }
        };

        if let Some((lanes, workers)) = drained {
            debug!(lanes = lanes.len(), "queue shutdown: draining");
            // Dropping the senders closes every lane channel; workers exit
            // after finishing the jobs already queued.
            drop(lanes);
            let done_tx = match self.done_tx.lock() {
                Ok(mut tx) => tx.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            tokio::spawn(async move {
                for worker in workers.into_values() {
                    let _ = worker.await;
                }
                if let Some(tx) = done_tx {
                    let _ = tx.send(true);
                }
            });
        }

        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|drained| *drained).await;
    }
}

/// Lane worker: runs queued jobs strictly sequentially.
///
/// Each job runs as its own task so a panicking unit of work is contained
/// by the join instead of killing the lane. Once the channel is drained the
/// worker retires its lane entry and exits; a later operation on the same
/// key respawns it.
async fn run_lane(
    lane: String,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    state: Arc<Mutex<State>>,
) {
    while let Some(queued) = rx.recv().await {
        let QueuedJob { sequence_id, job } = queued;
        let _ = tokio::spawn(job).await;
        trace!(lane = %lane, sequence_id, "operation complete");
        if rx.is_empty() && retire_if_idle(&state, &lane, &rx) {
            trace!(lane = %lane, "idle lane retired");
            return;
        }
    }
    debug!(lane = %lane, "lane drained");
}

/// Remove the lane's entries if its channel is still empty.
///
/// Submissions happen while holding the state lock, so an empty channel
/// observed under the same lock cannot race a send: removal is safe and the
/// next enqueue for this key builds a fresh lane.
fn retire_if_idle(
    state: &Mutex<State>,
    lane: &str,
    rx: &mpsc::UnboundedReceiver<QueuedJob>,
) -> bool {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let State::Open { lanes, workers } = &mut *guard else {
        // Shutdown owns the lanes now; let the drain finish normally.
        return false;
    };
    if !rx.is_empty() {
        return false;
    }
    lanes.remove(lane);
    workers.remove(lane);
    true
}
