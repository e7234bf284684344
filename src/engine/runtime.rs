//! Bounded worker pool for matching runs.
//!
//! Hosts submit batch ids and get a [`RunHandle`] back; runs execute on a
//! fixed set of named threads. A full queue is reported to the caller
//! instead of blocking it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::config::RuntimeConfig;
use crate::engine::{BatchSummary, MatchEngine};
use crate::error::{AssetLinkError, AssetResult, MatchError};
use crate::id::BatchId;

enum Job {
    Run {
        batch: BatchId,
        reply: Sender<AssetResult<BatchSummary>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, engine: &Arc<MatchEngine>) -> AssetResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("assetlink-match-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Run { batch, reply }) => {
                            let result = engine.match_batch(batch);
                            if let Err(e) = &result {
                                tracing::warn!(%batch, error = %e, "matching run failed");
                            }
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| AssetLinkError::internal(format!("failed to spawn match worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> Result<(), MatchError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(MatchError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(MatchError::Disconnected),
        }
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued runs and exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Pending result of a submitted run.
#[derive(Debug)]
pub struct RunHandle {
    batch: BatchId,
    rx: Receiver<AssetResult<BatchSummary>>,
}

impl RunHandle {
    #[must_use]
    pub const fn batch(&self) -> BatchId {
        self.batch
    }

    /// Waits for the run to finish.
    pub fn join(self) -> AssetResult<BatchSummary> {
        self.rx.recv().map_err(|_| MatchError::Disconnected)?
    }

    /// Waits for the run to finish, giving up after `timeout`.
    ///
    /// The run itself keeps going; only the wait is abandoned.
    pub fn join_timeout(self, timeout: Duration) -> AssetResult<BatchSummary> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => MatchError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            crossbeam_channel::RecvTimeoutError::Disconnected => MatchError::Disconnected,
        })?
    }
}

/// Runs batches on a bounded pool of worker threads.
pub struct MatchRuntime {
    engine: Arc<MatchEngine>,
    pool: WorkerPool,
}

impl MatchRuntime {
    /// Starts `config.workers` threads sharing `engine`.
    ///
    /// # Errors
    /// - `Internal` if a worker thread cannot be spawned
    pub fn new(engine: MatchEngine, config: RuntimeConfig) -> AssetResult<Self> {
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, &engine)?;
        Ok(Self { engine, pool })
    }

    /// Queues a run for `batch`.
    ///
    /// # Errors
    /// - `QueueFull` if the queue is at capacity
    /// - `Disconnected` if the workers have exited
    pub fn submit(&self, batch: BatchId) -> AssetResult<RunHandle> {
        let (tx, rx) = bounded::<AssetResult<BatchSummary>>(1);
        self.pool.try_submit(Job::Run { batch, reply: tx })?;
        Ok(RunHandle { batch, rx })
    }

    /// Runs `batch` on the pool and waits for the summary.
    pub fn run(&self, batch: BatchId) -> AssetResult<BatchSummary> {
        self.submit(batch)?.join()
    }

    #[must_use]
    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, MatchError> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for MatchRuntime {
    fn drop(&mut self) {
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}

impl std::fmt::Debug for MatchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRuntime")
            .field("workers", &self.pool.workers.len())
            .field("queue_capacity", &self.pool.queue_capacity)
            .finish_non_exhaustive()
    }
}
