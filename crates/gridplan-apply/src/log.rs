//! Replicated-log boundary.
//!
//! The consensus engine is an external collaborator; the applier only
//! needs one operation from it: submit an encoded batch entry and learn
//! the commit index once the entry is durably applied. The contract on
//! [`LogEngine::apply`] is that the returned future resolves only after
//! the entry has been applied to the local [`StateStore`], so a snapshot
//! taken after awaiting a commit always reflects it.
//!
//! [`DirectLog`] is the shipped single-node implementation: it decodes
//! each entry and applies it straight to the local store, standing in for
//! the consensus engine in tests and standalone deployments.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use gridplan_state::{StateResult, StateStore};

use crate::codec;
use crate::error::LogError;

/// Completion of one log write; resolves with the commit index.
pub type CommitFuture = oneshot::Receiver<Result<u64, LogError>>;

/// The applier's view of the replicated log.
pub trait LogEngine: Send + Sync + 'static {
    /// Submit one encoded batch entry. The future resolves with the commit
    /// index after the entry is applied to the local store, or with the
    /// write's error.
    fn apply(&self, entry: Bytes) -> CommitFuture;
}

/// Single-node log engine applying entries directly to the local store.
pub struct DirectLog {
    store: StateStore,
    last_index: AtomicU64,
}

impl DirectLog {
    /// Build a direct log over `store`, continuing from its latest index.
    pub fn new(store: StateStore) -> StateResult<Self> {
        let last_index = store.latest_index()?;
        Ok(Self {
            store,
            last_index: AtomicU64::new(last_index),
        })
    }

    fn commit(&self, entry: &[u8]) -> Result<u64, LogError> {
        let batch = codec::decode_batch(entry).map_err(|e| LogError::Write(e.to_string()))?;
        let commit_index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;
        self.store
            .apply_plan_batch(commit_index, &batch)
            .map_err(|e| LogError::Write(e.to_string()))?;
        debug!(commit_index, plan_index = batch.plan_index, "entry applied");
        Ok(commit_index)
    }
}

impl LogEngine for DirectLog {
    fn apply(&self, entry: Bytes) -> CommitFuture {
        let (done, commit) = oneshot::channel();
        let _ = done.send(self.commit(&entry));
        commit
    }
}
