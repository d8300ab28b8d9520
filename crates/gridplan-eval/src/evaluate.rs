//! Plan evaluator — per-node fan-out and result aggregation.
//!
//! Partitions a plan across the nodes it touches, runs one fit check per
//! node through the evaluate pool, and assembles the accepted subset.
//! Rejected nodes are omitted entirely (their placements and their
//! updates) and contribute the state index at which they were observed to
//! the result's refresh index.

use std::sync::Arc;

use tracing::debug;

use gridplan_state::{NodeId, Plan, PlanResult, StateSnapshot};

use crate::error::{EvalError, EvalResult};
use crate::fit::{evaluate_node_plan, NodeFit};
use crate::pool::EvaluatePool;

/// Evaluate `plan` against `snapshot`, returning the accepted subset.
///
/// An all-or-nothing plan with any rejected node yields an empty result
/// carrying only the refresh index. The snapshot is never mutated; an
/// all-rejected outcome is staleness, not an error — errors here are
/// pool-lifecycle only.
pub async fn evaluate_plan(
    pool: &EvaluatePool,
    snapshot: &Arc<StateSnapshot>,
    plan: &Arc<Plan>,
) -> EvalResult<PlanResult> {
    let mut checks = Vec::new();
    for node_id in plan.node_ids() {
        let snapshot = Arc::clone(snapshot);
        let plan = Arc::clone(plan);
        let check = pool
            .submit(move || (node_id, evaluate_node_plan(&snapshot, &plan, node_id)))
            .await?;
        checks.push(check);
    }

    let mut result = PlanResult::default();
    let mut rejected = 0usize;
    let mut accepted = 0usize;

    for check in checks {
        let (node_id, fit): (NodeId, NodeFit) =
            check.await.map_err(|_| EvalError::WorkerLost)?;
        if fit.fits {
            accepted += 1;
            copy_node_entries(plan, &mut result, node_id);
        } else {
            rejected += 1;
            result.refresh_index = result.refresh_index.max(fit.observed_index);
            debug!(
                node = %node_id,
                reason = ?fit.reason,
                observed_index = fit.observed_index,
                "node rejected its share of the plan"
            );
        }
    }

    if plan.all_at_once && rejected > 0 {
        debug!(
            rejected,
            refresh_index = result.refresh_index,
            "all-at-once plan partially rejected, dropping entire result"
        );
        return Ok(PlanResult {
            refresh_index: result.refresh_index,
            ..PlanResult::default()
        });
    }

    if accepted > 0 {
        result.job = plan.job.clone();
    }
    // A deployment describes the full desired rollout; it only rides a
    // fully accepted plan.
    if rejected == 0 {
        result.deployment = plan.deployment.clone();
    }
    Ok(result)
}

/// Copy one accepted node's entries from the plan into the result,
/// preserving the order within each list.
fn copy_node_entries(plan: &Plan, result: &mut PlanResult, node_id: NodeId) {
    if let Some(allocs) = plan.node_allocation.get(&node_id) {
        result.node_allocation.insert(node_id, allocs.clone());
    }
    if let Some(updates) = plan.node_update.get(&node_id) {
        result.node_update.insert(node_id, updates.clone());
    }
    if let Some(preempted) = plan.node_preemptions.get(&node_id) {
        result.node_preemptions.insert(node_id, preempted.clone());
    }
}
