//! # Job Queue
//!
//! A FIFO queue with exactly one background worker. Jobs are accepted without
//! waiting on the worker and are handed to a [`JobHandler`] one at a time, in
//! the order they were `put`.
//!
//! ## Lifecycle:
//! 1. **Constructed**: handler fixed for the queue's life, `put` already allowed
//! 2. **Started**: `start()` spawns the single worker task (idempotent)
//! 3. **Stopping**: `stop()` waits for the backlog and the in-flight job to finish
//! 4. **Stopped**: worker has exited; the queue cannot be restarted
//!
//! ## Worker Semantics:
//! - The worker sleeps on a [`Notify`] while the queue is empty, it never polls
//! - Each job runs in its own task, so a panicking handler is contained and logged
//! - Shutdown only takes effect between jobs, never in the middle of one

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Processing function invoked by the worker for every dequeued job.
///
/// Handlers are expected to capture their own failures. A panic is caught by
/// the worker and logged, and the worker moves on to the next job.
#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    async fn handle(&self, job: T);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full ({capacity} jobs pending)")]
    Full { capacity: usize },

    #[error("queue worker terminated abnormally: {0}")]
    Worker(String),
}

/// Point-in-time view of the queue, used for diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: bool,
    pub processed: u64,
    pub panicked: u64,
    pub capacity: Option<usize>,
    pub started: bool,
    pub stopped: bool,
}

enum WorkerSlot {
    Idle,
    Running(JoinHandle<()>),
    Finished,
}

/// Everything the submitters and the worker race on lives behind one lock, so
/// "pop the head and mark it in flight" is atomic with respect to the drain
/// check in `stop()`.
struct Shared<T> {
    pending: VecDeque<T>,
    in_flight: bool,
    shutdown: bool,
    processed: u64,
    panicked: u64,
}

impl<T> Shared<T> {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }
}

struct Inner<T> {
    shared: Mutex<Shared<T>>,
    work_ready: Notify,
    idle: Notify,
    handler: Arc<dyn JobHandler<T>>,
    capacity: Option<usize>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct JobQueue<T> {
    inner: Arc<Inner<T>>,
    worker: Mutex<WorkerSlot>,
}

impl<T: Send + 'static> JobQueue<T> {
    /// Create an unbounded queue.
    #[cfg(test)]
    pub fn new(handler: Arc<dyn JobHandler<T>>) -> Self {
        Self::with_capacity(handler, None)
    }

    /// Create a queue that rejects `put` once `capacity` jobs are pending.
    /// `None` means unbounded.
    pub fn with_capacity(handler: Arc<dyn JobHandler<T>>, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    pending: VecDeque::new(),
                    in_flight: false,
                    shutdown: false,
                    processed: 0,
                    panicked: 0,
                }),
                work_ready: Notify::new(),
                idle: Notify::new(),
                handler,
                capacity,
            }),
            worker: Mutex::new(WorkerSlot::Idle),
        }
    }

    /// Append a job to the tail of the queue and return the new pending count.
    ///
    /// Never waits for the worker. A job put after `stop()` is accepted but
    /// will never be processed; `is_stopped()` makes that state visible.
    pub fn put(&self, job: T) -> Result<usize, QueueError> {
        let shared = self.inner.lock();
        if let Some(capacity) = self.inner.capacity {
            if shared.pending.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }
        Ok(self.enqueue(shared, job))
    }

    /// Append a job that was already accepted once, e.g. work recovered after
    /// a restart. The capacity cap only limits new submissions, so this
    /// cannot fail.
    pub fn requeue(&self, job: T) -> usize {
        let shared = self.inner.lock();
        self.enqueue(shared, job)
    }

    fn enqueue(&self, mut shared: MutexGuard<'_, Shared<T>>, job: T) -> usize {
        if shared.shutdown {
            warn!("Job enqueued on a stopped queue; it will not be processed");
        }
        shared.pending.push_back(job);
        let pending = shared.pending.len();
        drop(shared);

        self.inner.work_ready.notify_one();
        debug!(pending, "Job enqueued");
        pending
    }

    /// Spawn the worker if it has not been spawned yet.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            WorkerSlot::Idle => {
                let inner = Arc::clone(&self.inner);
                *slot = WorkerSlot::Running(tokio::spawn(run_worker(inner)));
                info!("Job queue worker started");
            }
            WorkerSlot::Running(_) => debug!("Job queue already started"),
            WorkerSlot::Finished => warn!("Job queue has been stopped and cannot be restarted"),
        }
    }

    /// Drain the queue, then terminate the worker.
    ///
    /// Returns once every job put before this call has been handled and the
    /// worker task has exited. A queue that was never started is started first
    /// so its backlog is not silently dropped.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let already_stopped = self.inner.lock().shutdown;
        if already_stopped {
            return Ok(());
        }

        self.start();
        info!(pending = self.len(), "Draining job queue");
        self.wait_idle().await;

        self.inner.lock().shutdown = true;
        self.inner.work_ready.notify_one();

        let handle = {
            let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *slot, WorkerSlot::Finished) {
                WorkerSlot::Running(handle) => Some(handle),
                WorkerSlot::Idle | WorkerSlot::Finished => None,
            }
        };

        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| QueueError::Worker(e.to_string()))?;
        }

        info!("Job queue stopped");
        Ok(())
    }

    /// Wait until nothing is pending and nothing is in flight.
    ///
    /// Does not stop the worker. On a queue that has not been started and has
    /// a backlog, this waits until someone calls `start()`.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let is_idle = self.inner.lock().is_idle();
            if is_idle {
                return;
            }
            idle.await;
        }
    }

    /// Number of jobs waiting to be picked up (excludes the in-flight job).
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let started = !matches!(
            *self.worker.lock().unwrap_or_else(PoisonError::into_inner),
            WorkerSlot::Idle
        );
        let shared = self.inner.lock();
        QueueSnapshot {
            pending: shared.pending.len(),
            in_flight: shared.in_flight,
            processed: shared.processed,
            panicked: shared.panicked,
            capacity: self.inner.capacity,
            started,
            stopped: shared.shutdown,
        }
    }
}

async fn run_worker<T: Send + 'static>(inner: Arc<Inner<T>>) {
    loop {
        let next = {
            let mut shared = inner.lock();
            match shared.pending.pop_front() {
                Some(job) => {
                    shared.in_flight = true;
                    Some(job)
                }
                None if shared.shutdown => break,
                None => None,
            }
        };

        let Some(job) = next else {
            // notify_one stores a permit, so a put racing with this await is not lost
            inner.work_ready.notified().await;
            continue;
        };

        let handler = Arc::clone(&inner.handler);
        let outcome = tokio::spawn(async move { handler.handle(job).await }).await;

        let idle = {
            let mut shared = inner.lock();
            shared.in_flight = false;
            shared.processed += 1;
            if let Err(e) = outcome {
                shared.panicked += 1;
                error!(error = %e, "Job handler panicked; continuing with next job");
            }
            shared.pending.is_empty()
        };

        if idle {
            inner.idle.notify_waiters();
        }
    }

    inner.idle.notify_waiters();
    info!("Job queue worker exited");
}
