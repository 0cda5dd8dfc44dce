//! Bounded-concurrency admission queue for source queries.
//!
//! Every query that leaves the process goes through [`AdmissionQueue`]. Jobs
//! wait in a heap ordered by `(priority, submission order)` and are started
//! by a single dispatcher task whenever a semaphore slot is free. The
//! dispatcher wakes on a fixed tick and whenever a running job releases its
//! slot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cadence_core::config::QueueConfig;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::executor::QueryExecutor;
use crate::request::{Priority, QueryRequest, QueryResult};

type Reply = oneshot::Sender<Result<QueryResult, QueueError>>;

struct Job {
    priority: Priority,
    seq: u64,
    request: QueryRequest,
    cancel: CancellationToken,
    reply: Reply,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    // BinaryHeap is a max-heap: invert so the lowest (priority, seq) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
}

/// Handle to a submitted job.
pub struct Ticket {
    reply: oneshot::Receiver<Result<QueryResult, QueueError>>,
    cancel: CancellationToken,
}

impl Ticket {
    /// Wait for the job's result, or for its token to fire.
    ///
    /// A job abandoned here stays in the heap until the dispatcher pops it
    /// and sees the cancelled token.
    pub async fn wait(self) -> Result<QueryResult, QueueError> {
        let Ticket { reply, cancel } = self;
        tokio::select! {
            res = reply => res.unwrap_or(Err(QueueError::Closed)),
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<Job>>,
    seq: AtomicU64,
    slots: Arc<Semaphore>,
    in_flight: AtomicUsize,
    wake: Notify,
    executor: Arc<dyn QueryExecutor>,
    max_concurrent: usize,
    tick: Duration,
}

/// Cloneable handle to the process-wide admission queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    pub fn new(executor: Arc<dyn QueryExecutor>, config: &QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                slots: Arc::new(Semaphore::new(max_concurrent)),
                in_flight: AtomicUsize::new(0),
                wake: Notify::new(),
                executor,
                max_concurrent,
                tick: config.tick(),
            }),
        }
    }

    /// Spawn the dispatcher. It runs until `shutdown` fires; jobs still
    /// queued at that point are answered with [`QueueError::Closed`].
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let inner = self.inner.clone();
        info!(
            max_concurrent = inner.max_concurrent,
            tick_ms = inner.tick.as_millis() as u64,
            "admission queue started"
        );
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(inner.tick) => {}
                    _ = inner.wake.notified() => {}
                }
                Inner::dispatch(&inner);
            }
            let drained = inner.drain_closed();
            info!(drained, "admission queue stopped");
        })
    }

    /// Queue a query and return a ticket for its result.
    pub fn submit(
        &self,
        request: QueryRequest,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<Ticket, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        let (tx, rx) = oneshot::channel();
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let job = Job {
            priority,
            seq,
            request,
            cancel: cancel.clone(),
            reply: tx,
        };
        {
            let mut heap = self.inner.heap.lock().map_err(|_| QueueError::Closed)?;
            heap.push(job);
        }
        debug!(seq, %priority, "query enqueued");
        self.inner.wake.notify_one();
        Ok(Ticket {
            reply: rx,
            cancel: cancel.clone(),
        })
    }

    /// Queue a query and wait for it.
    pub async fn enqueue(
        &self,
        request: QueryRequest,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, QueueError> {
        self.submit(request, priority, cancel)?.wait().await
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self.inner.heap.lock().map(|h| h.len()).unwrap_or(0);
        QueueStats {
            pending,
            in_flight: self.inner.in_flight.load(AtomicOrdering::SeqCst),
            max_concurrent: self.inner.max_concurrent,
        }
    }
}

impl Inner {
    /// Start as many queued jobs as there are free slots.
    fn dispatch(this: &Arc<Self>) {
        loop {
            let permit = match this.slots.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => return,
            };
            let job = match this.pop() {
                Some(job) => job,
                None => return,
            };
            if job.cancel.is_cancelled() {
                debug!(seq = job.seq, "dropping cancelled query before dispatch");
                let _ = job.reply.send(Err(QueueError::Cancelled));
                continue;
            }
            Self::run(this.clone(), job, permit);
        }
    }

    fn run(this: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        this.in_flight.fetch_add(1, AtomicOrdering::SeqCst);
        tokio::spawn(async move {
            let started = Instant::now();
            let Job {
                seq,
                priority,
                request,
                cancel,
                reply,
            } = job;
            let result = tokio::select! {
                res = this.executor.execute(&request, &cancel) => Ok(res),
                _ = cancel.cancelled() => Err(QueueError::Cancelled),
            };
            let result = result.map(|mut res| {
                if res.execution_time_ms == 0 {
                    res.execution_time_ms = started.elapsed().as_millis() as u64;
                }
                res
            });
            debug!(
                seq,
                %priority,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = matches!(&result, Ok(r) if r.error.is_none()),
                "query finished"
            );
            // Receiver may be gone; the send result is irrelevant.
            let _ = reply.send(result);
            this.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
            drop(permit);
            this.wake.notify_one();
        });
    }

    fn pop(&self) -> Option<Job> {
        match self.heap.lock() {
            Ok(mut heap) => heap.pop(),
            Err(_) => {
                warn!("admission queue heap lock poisoned");
                None
            }
        }
    }

    fn drain_closed(&self) -> usize {
        let jobs: Vec<Job> = match self.heap.lock() {
            Ok(mut heap) => heap.drain().collect(),
            Err(_) => return 0,
        };
        let count = jobs.len();
        for job in jobs {
            let _ = job.reply.send(Err(QueueError::Closed));
        }
        count
    }
}

#[cfg(test)]
mod tests;
