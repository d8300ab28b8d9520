//! StateSnapshot — a point-in-time immutable view of committed state.
//!
//! Snapshots are what schedulers plan against and what the fit evaluator
//! reads. They are plain in-memory maps, cheap to clone, and detached from
//! the store: writes committed after `snapshot()` are never visible.
//!
//! The snapshot also carries the optimistic mutator: the applier overlays
//! an accepted plan onto the proposer's snapshot immediately after the log
//! write, before replication completes, so the proposer can keep
//! scheduling without waiting for quorum. The overlay mirrors exactly what
//! [`crate::StateStore::apply_plan_batch`] will commit.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Immutable view of nodes, allocations, jobs, and deployments at a single
/// log index.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    index: u64,
    nodes: HashMap<NodeId, Node>,
    allocs: HashMap<AllocId, Allocation>,
    jobs: HashMap<JobId, Job>,
    deployments: HashMap<DeploymentId, Deployment>,
}

impl StateSnapshot {
    pub(crate) fn new(
        index: u64,
        nodes: HashMap<NodeId, Node>,
        allocs: HashMap<AllocId, Allocation>,
        jobs: HashMap<JobId, Job>,
        deployments: HashMap<DeploymentId, Deployment>,
    ) -> Self {
        Self {
            index,
            nodes,
            allocs,
            jobs,
            deployments,
        }
    }

    /// The greatest log index this view reflects.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn node_by_id(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn alloc_by_id(&self, alloc_id: AllocId) -> Option<&Allocation> {
        self.allocs.get(&alloc_id)
    }

    /// All allocations placed on a node, in unspecified order.
    pub fn allocs_by_node(&self, node_id: NodeId) -> Vec<&Allocation> {
        self.allocs
            .values()
            .filter(|alloc| alloc.node_id == node_id)
            .collect()
    }

    pub fn job_by_id(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn deployment_by_id(&self, deployment_id: DeploymentId) -> Option<&Deployment> {
        self.deployments.get(&deployment_id)
    }

    // ── Optimistic mutation ────────────────────────────────────────

    /// Overlay an accepted plan result onto this snapshot at `plan_index`.
    ///
    /// Idempotent: all mutations are last-writer-wins by allocation id, so
    /// applying the same result twice yields the same state as once.
    pub fn apply_plan_result(&mut self, result: &PlanResult, plan_index: u64) -> StateResult<()> {
        let batch = PlanBatch {
            plan_index,
            job: result.job.clone(),
            deployment: result.deployment.clone(),
            node_update: result.node_update.clone(),
            node_allocation: result.node_allocation.clone(),
            node_preemptions: result.node_preemptions.clone(),
        };
        self.apply_plan_batch(&batch)
    }

    /// Overlay one plan batch, mirroring the committed application:
    ///
    /// - new placements are inserted with `create_index` and `modify_index`
    ///   set to the batch's plan index;
    /// - updates merge mutable fields onto the existing record and are
    ///   skipped when the record is missing, exactly as the authoritative
    ///   applier does;
    /// - preemption markers set `preempted_by` on the existing record;
    /// - the batch's job and deployment are upserted.
    ///
    /// Fails with [`StateError::Divergence`] when a by-ref job cannot be
    /// resolved from the batch, the snapshot, or the record being replaced;
    /// the committed state would disagree with this view from then on, so
    /// the applier must stop.
    pub fn apply_plan_batch(&mut self, batch: &PlanBatch) -> StateResult<()> {
        let plan_index = batch.plan_index;

        if let Some(job) = &batch.job {
            let mut record = job.clone();
            record.modify_index = plan_index;
            self.jobs.insert(record.id.clone(), record);
        }

        if let Some(deployment) = &batch.deployment {
            let mut record = deployment.clone();
            record.create_index = self
                .deployments
                .get(&record.id)
                .map_or(plan_index, |d| d.create_index);
            record.modify_index = plan_index;
            self.deployments.insert(record.id, record);
        }

        for placed in batch.node_allocation.values().flatten() {
            let existing = self.allocs.get(&placed.id);

            let mut record = placed.clone();
            if record.job.is_by_ref() {
                record.job = self.resolve_job(placed, batch.job.as_ref(), existing)?;
            }
            record.create_index = existing.map_or(plan_index, |a| a.create_index);
            record.modify_index = plan_index;
            self.allocs.insert(record.id, record);
        }

        for update in batch.node_update.values().flatten() {
            let Some(existing) = self.allocs.get_mut(&update.id) else {
                debug!(alloc = %update.id, "optimistic update for unknown allocation, skipping");
                continue;
            };
            existing.apply_update(update);
            existing.modify_index = plan_index;
        }

        for preempted in batch.node_preemptions.values().flatten() {
            let Some(existing) = self.allocs.get_mut(&preempted.id) else {
                debug!(alloc = %preempted.id, "optimistic preemption of unknown allocation, skipping");
                continue;
            };
            existing.preempted_by = preempted.preempted_by;
            existing.desired_status = preempted.desired_status;
            existing.desired_description = preempted.desired_description.clone();
            existing.modify_index = plan_index;
        }

        self.index = self.index.max(plan_index);
        Ok(())
    }

    fn resolve_job(
        &self,
        alloc: &Allocation,
        batch_job: Option<&Job>,
        existing: Option<&Allocation>,
    ) -> StateResult<JobRef> {
        if let Some(job) = batch_job.filter(|j| j.id == alloc.job_id) {
            return Ok(JobRef::Inline(job.clone()));
        }
        if let Some(JobRef::Inline(job)) = existing.map(|a| &a.job) {
            return Ok(JobRef::Inline(job.clone()));
        }
        if let Some(job) = self.jobs.get(alloc.job_id.as_str()) {
            return Ok(JobRef::Inline(job.clone()));
        }
        Err(StateError::Divergence(format!(
            "allocation {} references job {} which is neither embedded nor known",
            alloc.id, alloc.job_id
        )))
    }
}
