//! Worker pool: N workers pulling queued jobs, one worker per job end-to-end.
//!
//! The queue is a bounded flume channel, so submission backpressure is the
//! channel's send semantics. Shutdown is a watch flag observed between jobs;
//! a worker that has picked a job up finishes it before exiting, and the
//! orchestrator's own stage-boundary cancellation covers anything stronger.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::{Orchestrator, QueuedJob};

/// Bounded job queue feeding the pool.
#[derive(Clone)]
pub struct JobQueue {
    sender: flume::Sender<QueuedJob>,
    receiver: flume::Receiver<QueuedJob>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self { sender, receiver }
    }

    /// Enqueue a job, waiting for queue space.
    pub async fn push(&self, job: QueuedJob) -> Result<(), QueuedJob> {
        self.sender
            .send_async(job)
            .await
            .map_err(|e| e.into_inner())
    }

    /// Enqueue without waiting; hands the job back when the queue is full or
    /// closed.
    pub fn try_push(&self, job: QueuedJob) -> Result<(), QueuedJob> {
        self.sender.try_send(job).map_err(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("queued", &self.receiver.len())
            .finish()
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `workers` receivers on `queue`. Each worker drives one job at a
    /// time through the orchestrator.
    pub fn start(orchestrator: Arc<Orchestrator>, queue: &JobQueue, workers: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let orchestrator = orchestrator.clone();
                let receiver = queue.receiver.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                                continue;
                            }
                            recv = receiver.recv_async() => match recv {
                                // Queue closed: all senders dropped.
                                Err(_) => break,
                                Ok(job) => job,
                            },
                        };
                        let job_id = job.job.id;
                        debug!(worker_id, %job_id, "worker picked up job");
                        if let Err(e) = orchestrator.process(job).await {
                            warn!(worker_id, %job_id, error = %e, "job processing errored");
                        }
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    debug!(worker_id, "worker stopped");
                })
            })
            .collect();
        Self { handles, shutdown }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for every worker to finish its in-flight job.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}
