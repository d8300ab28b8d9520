//! Admission queue between proposers and the applier.
//!
//! Many schedulers enqueue concurrently; exactly one applier task drains.
//! The queue is a bounded channel, so enqueueing suspends when the applier
//! falls behind — the handoff is the serialization boundary: the order in
//! which plans clear the queue is the order in which they are written to
//! the log. Closing the queue stops admission; plans already admitted are
//! still drained by the applier.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use gridplan_state::{Plan, PlanResult, StateSnapshot};

use crate::error::{ApplierError, ApplierResult};

/// The applier's answer to a submitted plan.
#[derive(Debug, Clone)]
pub struct PlanResponse {
    /// The accepted subset of the plan.
    pub result: PlanResult,
    /// Log index of the final committed batch; zero when nothing was
    /// accepted (staleness — refresh and resubmit).
    pub commit_index: u64,
    /// The proposer's view after the accepted changes were overlaid; safe
    /// to plan against without waiting for replication.
    pub snapshot: StateSnapshot,
}

/// A plan waiting in the queue, paired with its response channel.
pub(crate) struct PlanRequest {
    pub(crate) plan: Arc<Plan>,
    pub(crate) respond: oneshot::Sender<ApplierResult<PlanResponse>>,
}

/// Bounded, closeable admission queue (FIFO).
pub(crate) struct PlanQueue {
    tx: Mutex<Option<mpsc::Sender<PlanRequest>>>,
}

impl PlanQueue {
    /// Create a queue with the given depth and its consumer end.
    pub(crate) fn bounded(depth: usize) -> (Self, mpsc::Receiver<PlanRequest>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueue a plan, suspending while the queue is full. Returns the
    /// future that resolves with the applier's response.
    pub(crate) async fn enqueue(
        &self,
        plan: Arc<Plan>,
    ) -> ApplierResult<oneshot::Receiver<ApplierResult<PlanResponse>>> {
        let tx = { self.tx.lock().await.clone() };
        let Some(tx) = tx else {
            return Err(ApplierError::Shutdown);
        };

        let (respond, response) = oneshot::channel();
        tx.send(PlanRequest { plan, respond })
            .await
            .map_err(|_| ApplierError::Shutdown)?;
        Ok(response)
    }

    /// Stop admitting plans. Idempotent; already-admitted plans still run.
    pub(crate) async fn close(&self) {
        drop(self.tx.lock().await.take());
    }
}
