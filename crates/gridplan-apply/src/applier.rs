//! Plan applier — exactly one writer between schedulers and the log.
//!
//! `PlanService` validates and admits plans; a single applier task drains
//! the queue in submission order. Per plan it snapshots the store,
//! evaluates feasibility through the pool, writes the accepted subset to
//! the log as one or more batches, overlays the batches onto the response
//! snapshot before any commit completes, and finally awaits the commits in
//! order. Commit indexes are therefore strictly increasing across plans on
//! one applier.
//!
//! Failure discipline: log-write errors are transient and surface to the
//! caller; an optimistic overlay that cannot be applied means the in-memory
//! view has diverged from what the log will commit, so the applier goes
//! fatal — it fails the current and all subsequent plans with the stored
//! error and the queue stops admitting.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use gridplan_eval::{evaluate_plan, EvalError, EvaluatePool, PoolConfig};
use gridplan_state::{
    Allocation, Deployment, Job, JobRef, NodeId, Plan, PlanBatch, PlanResult, StateSnapshot,
    StateStore,
};

use crate::codec;
use crate::config::ApplierConfig;
use crate::error::{ApplierError, ApplierResult, LogError};
use crate::log::LogEngine;
use crate::queue::{PlanQueue, PlanRequest, PlanResponse};

/// Proposer-facing handle: validates, admits, and awaits plans.
pub struct PlanService {
    queue: PlanQueue,
    pool: Arc<EvaluatePool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<Mutex<Option<ApplierError>>>,
}

impl PlanService {
    /// Spawn the evaluate pool and the single applier task.
    pub fn new(store: StateStore, log: Arc<dyn LogEngine>, config: ApplierConfig) -> Self {
        let pool = Arc::new(EvaluatePool::new(PoolConfig {
            workers: config.worker_pool_size,
            queue_depth: config.worker_pool_buffer,
        }));
        let (queue, rx) = PlanQueue::bounded(config.plan_queue_depth);
        let fatal = Arc::new(Mutex::new(None));

        let applier = Applier {
            store,
            log,
            pool: Arc::clone(&pool),
            max_batch_bytes: config.max_batch_bytes,
            fatal: Arc::clone(&fatal),
            last_commit_index: 0,
            next_plan_index: 0,
        };
        let worker = tokio::spawn(applier.run(rx));

        Self {
            queue,
            pool,
            worker: Mutex::new(Some(worker)),
            fatal,
        }
    }

    /// Submit a plan and block until it is evaluated, written, and
    /// committed.
    ///
    /// Structural problems are rejected synchronously without admission.
    /// A fully rejected plan is a success: an empty result whose
    /// `refresh_index` tells the proposer how far to advance its snapshot
    /// before retrying.
    pub async fn submit_plan(&self, plan: Plan) -> ApplierResult<PlanResponse> {
        validate_plan(&plan)?;
        if let Some(err) = self.fatal.lock().await.clone() {
            return Err(err);
        }

        let response = self.queue.enqueue(Arc::new(plan)).await?;
        response.await.map_err(|_| ApplierError::Shutdown)?
    }

    /// Stop admission, drain already-admitted plans, join the applier
    /// task, then shut the pool down. Idempotent.
    pub async fn shutdown(&self) {
        self.queue.close().await;
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
        self.pool.shutdown().await;
    }
}

/// Reject structurally invalid plans before they reach the queue.
fn validate_plan(plan: &Plan) -> ApplierResult<()> {
    if !plan.node_allocation.is_empty() && plan.job.is_none() {
        return Err(ApplierError::Validation(
            "plan places allocations but carries no job".to_string(),
        ));
    }
    for (map, kind) in [
        (&plan.node_allocation, "allocation"),
        (&plan.node_update, "update"),
    ] {
        for (node_id, allocs) in map {
            for alloc in allocs {
                if alloc.node_id != *node_id {
                    return Err(ApplierError::Validation(format!(
                        "{kind} for allocation {} targets node {} but is keyed under node {}",
                        alloc.id, alloc.node_id, node_id
                    )));
                }
            }
        }
    }
    for (node_id, preempted) in &plan.node_preemptions {
        for alloc in preempted {
            if alloc.node_id != *node_id {
                return Err(ApplierError::Validation(format!(
                    "preemption of allocation {} crosses nodes: lives on {} but is keyed under {}",
                    alloc.id, alloc.node_id, node_id
                )));
            }
        }
    }
    Ok(())
}

/// The single-writer loop and its bookkeeping.
struct Applier {
    store: StateStore,
    log: Arc<dyn LogEngine>,
    pool: Arc<EvaluatePool>,
    max_batch_bytes: usize,
    fatal: Arc<Mutex<Option<ApplierError>>>,
    /// Commit index of the last successfully applied plan.
    last_commit_index: u64,
    /// Monotonic sequence stamped into batches; advanced past every
    /// snapshot index observed.
    next_plan_index: u64,
}

impl Applier {
    async fn run(mut self, mut rx: mpsc::Receiver<PlanRequest>) {
        while let Some(request) = rx.recv().await {
            if let Some(err) = self.fatal.lock().await.clone() {
                let _ = request.respond.send(Err(err));
                continue;
            }

            let outcome = self.handle(&request.plan).await;
            if let Err(err) = &outcome {
                if err.is_fatal() {
                    error!(error = %err, "applier entered fatal state, all further plans will fail");
                    *self.fatal.lock().await = Some(err.clone());
                }
            }
            let _ = request.respond.send(outcome);
        }
        debug!("plan queue closed, applier stopped");
    }

    async fn handle(&mut self, plan: &Arc<Plan>) -> ApplierResult<PlanResponse> {
        let snapshot = self
            .store
            .snapshot()
            .map_err(|e| ApplierError::Fatal(format!("state snapshot failed: {e}")))?;
        // Commits resolve only after local application, so a snapshot
        // behind our own last commit means the store has diverged.
        if snapshot.index() < self.last_commit_index {
            return Err(ApplierError::Fatal(format!(
                "state snapshot at index {} behind last commit {}",
                snapshot.index(),
                self.last_commit_index
            )));
        }
        self.next_plan_index = self.next_plan_index.max(snapshot.index());

        let snapshot = Arc::new(snapshot);
        let result = evaluate_plan(&self.pool, &snapshot, plan)
            .await
            .map_err(|e| match e {
                EvalError::PoolClosed => ApplierError::Shutdown,
                EvalError::WorkerLost => {
                    ApplierError::Fatal("evaluate worker dropped a fit check".to_string())
                }
            })?;

        let mut snapshot = match Arc::try_unwrap(snapshot) {
            Ok(snapshot) => snapshot,
            Err(shared) => (*shared).clone(),
        };

        if result.is_empty() {
            info!(
                refresh_index = result.refresh_index,
                "plan fully rejected, nothing to write"
            );
            return Ok(PlanResponse {
                result,
                commit_index: 0,
                snapshot,
            });
        }

        let commit_index = self.apply(&result, &mut snapshot).await?;
        self.last_commit_index = commit_index;
        info!(
            commit_index,
            placements = result.node_allocation.values().map(Vec::len).sum::<usize>(),
            updates = result.node_update.values().map(Vec::len).sum::<usize>(),
            "plan committed"
        );
        Ok(PlanResponse {
            result,
            commit_index,
            snapshot,
        })
    }

    /// Write the accepted result to the log and overlay it onto the
    /// proposer's snapshot.
    ///
    /// All batches are submitted before any commit is awaited; the overlay
    /// happens in between, so the proposer's snapshot reflects the write
    /// without waiting for replication. Commit futures are then awaited in
    /// order and the first failure short-circuits — later batches were
    /// already aborted by the engine's ordering.
    async fn apply(
        &mut self,
        result: &PlanResult,
        snapshot: &mut StateSnapshot,
    ) -> ApplierResult<u64> {
        let batches = split_into_batches(result, self.max_batch_bytes, &mut self.next_plan_index)?;

        let mut commits = Vec::with_capacity(batches.len());
        for batch in &batches {
            let entry = codec::encode_batch(batch)
                .map_err(|e| ApplierError::Fatal(format!("batch encode failed: {e}")))?;
            debug!(
                plan_index = batch.plan_index,
                bytes = entry.len(),
                "submitting batch to log"
            );
            commits.push(self.log.apply(entry));
        }

        for batch in &batches {
            snapshot.apply_plan_batch(batch).map_err(|e| {
                ApplierError::Fatal(format!("optimistic snapshot update failed: {e}"))
            })?;
        }

        let mut commit_index = 0;
        for commit in commits {
            let outcome = commit.await.map_err(|_| LogError::Closed)?;
            commit_index = outcome?;
        }
        Ok(commit_index)
    }
}

/// Per-node slice of a result while packing batches.
#[derive(Debug, Clone, Default)]
struct NodeEntries {
    update: Vec<Allocation>,
    allocation: Vec<Allocation>,
    preemptions: Vec<Allocation>,
}

/// Split an accepted result into log batches no larger than `max_bytes`.
///
/// A node's entries are atomic and never split across batches; the job and
/// deployment ride the first batch only, and preemptions travel with the
/// placements that caused them (implied by the by-node split). Update
/// records are normalized to by-ref jobs before sizing — the log applier
/// resolves them from committed state. A single node whose entries alone
/// exceed the ceiling is a validation error: splitting it would tear
/// node-local state.
fn split_into_batches(
    result: &PlanResult,
    max_bytes: usize,
    next_plan_index: &mut u64,
) -> ApplierResult<Vec<PlanBatch>> {
    let mut per_node: BTreeMap<NodeId, NodeEntries> = BTreeMap::new();
    for (node_id, allocs) in &result.node_allocation {
        per_node.entry(*node_id).or_default().allocation = allocs.clone();
    }
    for (node_id, updates) in &result.node_update {
        let mut updates = updates.clone();
        for alloc in &mut updates {
            alloc.job = JobRef::ByRef;
        }
        per_node.entry(*node_id).or_default().update = updates;
    }
    for (node_id, preempted) in &result.node_preemptions {
        per_node.entry(*node_id).or_default().preemptions = preempted.clone();
    }

    let mut new_batch = |job: Option<Job>, deployment: Option<Deployment>| {
        *next_plan_index += 1;
        PlanBatch {
            plan_index: *next_plan_index,
            job,
            deployment,
            ..PlanBatch::default()
        }
    };

    let mut batches = Vec::new();
    let mut current = new_batch(result.job.clone(), result.deployment.clone());
    let mut current_nodes = 0usize;

    for (node_id, entries) in per_node {
        let mut candidate = current.clone();
        insert_node(&mut candidate, node_id, entries.clone());
        if batch_len(&candidate)? <= max_bytes {
            current = candidate;
            current_nodes += 1;
            continue;
        }

        if current_nodes == 0 {
            if current.job.is_none() && current.deployment.is_none() {
                return Err(oversized_node(node_id, max_bytes));
            }
            // The job and deployment alone crowd the first batch; ship them
            // by themselves and give this node a fresh one.
        }
        batches.push(current);
        current = new_batch(None, None);
        insert_node(&mut current, node_id, entries);
        if batch_len(&current)? > max_bytes {
            return Err(oversized_node(node_id, max_bytes));
        }
        current_nodes = 1;
    }
    batches.push(current);
    Ok(batches)
}

fn insert_node(batch: &mut PlanBatch, node_id: NodeId, entries: NodeEntries) {
    if !entries.update.is_empty() {
        batch.node_update.insert(node_id, entries.update);
    }
    if !entries.allocation.is_empty() {
        batch.node_allocation.insert(node_id, entries.allocation);
    }
    if !entries.preemptions.is_empty() {
        batch.node_preemptions.insert(node_id, entries.preemptions);
    }
}

fn batch_len(batch: &PlanBatch) -> ApplierResult<usize> {
    codec::encoded_len(batch).map_err(|e| ApplierError::Fatal(format!("batch encode failed: {e}")))
}

fn oversized_node(node_id: NodeId, max_bytes: usize) -> ApplierError {
    ApplierError::Validation(format!(
        "entries for node {node_id} exceed the {max_bytes}-byte log entry ceiling"
    ))
}
