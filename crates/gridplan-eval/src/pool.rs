//! Bounded worker pool for fit checks.
//!
//! The pool owns `workers` tokio tasks draining one bounded work channel.
//! Work units are opaque closures; callers get a oneshot future per
//! submission and may await them in any order. There is no per-submit
//! cancellation: callers stop the pool with [`EvaluatePool::shutdown`],
//! which drains every queued work item before joining the workers.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{EvalError, EvalResult};

/// Configuration for an evaluate pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the inbound work channel; submits suspend when full.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(16);
        Self {
            workers,
            queue_depth: 64,
        }
    }
}

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Bounded parallel executor for opaque work units.
pub struct EvaluatePool {
    tx: Mutex<Option<mpsc::Sender<Work>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EvaluatePool {
    /// Spawn a pool with the given worker count and queue depth.
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Work>(config.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for worker in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only for the dequeue so idle
                    // workers can race for the next item.
                    let work = { rx.lock().await.recv().await };
                    match work {
                        Some(work) => work(),
                        None => break,
                    }
                }
                debug!(worker, "evaluate worker drained");
            }));
        }

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Submit one work unit; suspends while the inbound channel is full.
    ///
    /// The returned receiver resolves with the closure's result once a
    /// worker has run it. Fails with [`EvalError::PoolClosed`] after
    /// shutdown.
    pub async fn submit<R, F>(&self, work: F) -> EvalResult<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let tx = { self.tx.lock().await.clone() };
        let Some(tx) = tx else {
            return Err(EvalError::PoolClosed);
        };

        let (done, result) = oneshot::channel();
        let work: Work = Box::new(move || {
            let _ = done.send(work());
        });
        tx.send(work).await.map_err(|_| EvalError::PoolClosed)?;
        Ok(result)
    }

    /// Shut the pool down: stop accepting work, let workers drain the
    /// queue, then join them. Idempotent.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().await.take());
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
    }
}
