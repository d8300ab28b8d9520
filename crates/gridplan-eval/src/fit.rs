//! Per-node feasibility predicate.
//!
//! `evaluate_node_plan` is a pure function over (snapshot, plan, node):
//! no I/O, no mutation. It reports whether one node can absorb its share
//! of a plan, why not, and the state index at which the node was observed
//! so the caller can aggregate a refresh index for rejected plans.

use std::collections::{BTreeSet, HashSet};

use gridplan_state::{
    AllocId, DesiredStatus, NodeId, NodeStatus, Plan, ResourceVector, StateSnapshot,
};

/// Why a node accepted or rejected its share of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitReason {
    Fits,
    UnknownNode,
    NodeNotReady,
    NodeDraining,
    ResourcesExhausted,
    PortCollision,
}

/// Outcome of a single node's feasibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFit {
    pub fits: bool,
    pub reason: FitReason,
    /// State index at which the node was observed; feeds the refresh index
    /// when the node rejects.
    pub observed_index: u64,
}

impl NodeFit {
    fn accept(observed_index: u64) -> Self {
        Self {
            fits: true,
            reason: FitReason::Fits,
            observed_index,
        }
    }

    fn reject(reason: FitReason, observed_index: u64) -> Self {
        Self {
            fits: false,
            reason,
            observed_index,
        }
    }
}

/// Decide whether `node_id` can absorb its share of `plan`.
///
/// The predicate is structured around what the plan contributes to the
/// node: a plan that only updates existing allocations always fits, since
/// stopping or evicting work never increases load and dead or draining
/// nodes must still be able to shed allocations. New placements require a
/// schedulable node and a capacity check.
pub fn evaluate_node_plan(snapshot: &StateSnapshot, plan: &Plan, node_id: NodeId) -> NodeFit {
    let Some(node) = snapshot.node_by_id(node_id) else {
        return NodeFit::reject(FitReason::UnknownNode, snapshot.index());
    };
    let observed_index = node.modify_index;

    let placements = plan
        .node_allocation
        .get(&node_id)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if placements.is_empty() {
        return NodeFit::accept(observed_index);
    }

    if !node.schedulable() {
        let reason = if node.status != NodeStatus::Ready {
            FitReason::NodeNotReady
        } else {
            FitReason::NodeDraining
        };
        return NodeFit::reject(reason, observed_index);
    }

    // Ids superseded by this plan no longer count against capacity: the
    // plan either evicts/stops them or replaces them with a new copy.
    let mut superseded: HashSet<AllocId> = placements.iter().map(|alloc| alloc.id).collect();
    if let Some(updates) = plan.node_update.get(&node_id) {
        superseded.extend(updates.iter().filter_map(|alloc| {
            matches!(
                alloc.desired_status,
                DesiredStatus::Stop | DesiredStatus::Evict
            )
            .then_some(alloc.id)
        }));
    }

    let mut total = ResourceVector::default();
    let mut claimed: BTreeSet<u16> = node.reserved.ports.clone();
    let mut collision = false;

    for alloc in snapshot.allocs_by_node(node_id) {
        if superseded.contains(&alloc.id) || !alloc.counts_against_node() {
            continue;
        }
        total.add(&alloc.resources);
        for &port in &alloc.resources.ports {
            collision |= !claimed.insert(port);
        }
    }
    for alloc in placements {
        total.add(&alloc.resources);
        for &port in &alloc.resources.ports {
            collision |= !claimed.insert(port);
        }
    }

    if collision {
        return NodeFit::reject(FitReason::PortCollision, observed_index);
    }
    if !total.fits_within(&node.available()) {
        return NodeFit::reject(FitReason::ResourcesExhausted, observed_index);
    }
    NodeFit::accept(observed_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplan_state::{Allocation, ClientStatus, Job, JobRef, Node, StateStore};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn vector(cpu: u64, mem: u64) -> ResourceVector {
        ResourceVector {
            cpu_mhz: cpu,
            memory_mb: mem,
            ..ResourceVector::default()
        }
    }

    fn test_node(resources: ResourceVector) -> Node {
        Node {
            id: Uuid::new_v4(),
            status: NodeStatus::Ready,
            drain: false,
            resources,
            reserved: ResourceVector::default(),
            create_index: 0,
            modify_index: 0,
        }
    }

    fn test_job() -> Job {
        Job {
            id: "web".to_string(),
            name: "web".to_string(),
            priority: 50,
            modify_index: 0,
        }
    }

    fn test_alloc(node_id: NodeId, resources: ResourceVector) -> Allocation {
        Allocation {
            id: Uuid::new_v4(),
            job_id: "web".to_string(),
            node_id,
            resources,
            desired_status: DesiredStatus::Run,
            desired_description: String::new(),
            client_status: ClientStatus::Pending,
            job: JobRef::Inline(test_job()),
            preempted_by: None,
            create_index: 0,
            modify_index: 0,
        }
    }

    fn placement_plan(node_id: NodeId, allocs: Vec<Allocation>) -> Plan {
        Plan {
            job: Some(test_job()),
            node_allocation: HashMap::from([(node_id, allocs)]),
            ..Plan::default()
        }
    }

    /// Store with one node upserted at index 1000, snapshotted.
    fn snapshot_with(node: &Node, allocs: &[Allocation]) -> StateSnapshot {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_node(1000, node).unwrap();
        if !allocs.is_empty() {
            store.upsert_allocs(1001, allocs).unwrap();
        }
        store.snapshot().unwrap()
    }

    #[test]
    fn empty_node_accepts_small_placement() {
        let node = test_node(vector(4000, 8192));
        let snap = snapshot_with(&node, &[]);
        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(500, 256))]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
        assert_eq!(fit.reason, FitReason::Fits);
        assert_eq!(fit.observed_index, 1000);
    }

    #[test]
    fn unknown_node_rejects() {
        let node = test_node(vector(4000, 8192));
        let snap = snapshot_with(&node, &[]);
        let ghost = Uuid::new_v4();
        let plan = placement_plan(ghost, vec![test_alloc(ghost, vector(500, 256))]);

        let fit = evaluate_node_plan(&snap, &plan, ghost);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::UnknownNode);
        assert_eq!(fit.observed_index, snap.index());
    }

    #[test]
    fn initializing_node_rejects_placement() {
        let mut node = test_node(vector(4000, 8192));
        node.status = NodeStatus::Init;
        let snap = snapshot_with(&node, &[]);
        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(500, 256))]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::NodeNotReady);
    }

    #[test]
    fn draining_node_rejects_placement() {
        let mut node = test_node(vector(4000, 8192));
        node.drain = true;
        let snap = snapshot_with(&node, &[]);
        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(500, 256))]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::NodeDraining);
    }

    #[test]
    fn draining_node_accepts_eviction_only_plan() {
        let mut node = test_node(vector(1000, 1024));
        node.drain = true;
        let existing = test_alloc(node.id, vector(1000, 1024));
        let snap = snapshot_with(&node, &[existing.clone()]);

        let mut evict = existing;
        evict.desired_status = DesiredStatus::Evict;
        let plan = Plan {
            node_update: HashMap::from([(node.id, vec![evict])]),
            ..Plan::default()
        };

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn down_node_accepts_eviction_only_plan() {
        let mut node = test_node(vector(1000, 1024));
        node.status = NodeStatus::Down;
        let existing = test_alloc(node.id, vector(1000, 1024));
        let snap = snapshot_with(&node, &[existing.clone()]);

        let mut evict = existing;
        evict.desired_status = DesiredStatus::Evict;
        let plan = Plan {
            node_update: HashMap::from([(node.id, vec![evict])]),
            ..Plan::default()
        };

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn full_node_rejects_placement() {
        let node = test_node(vector(1000, 1024));
        let existing = test_alloc(node.id, vector(1000, 1024));
        let snap = snapshot_with(&node, &[existing]);
        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(100, 64))]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::ResourcesExhausted);
        assert_eq!(fit.observed_index, 1000);
    }

    #[test]
    fn reserved_capacity_shrinks_the_node() {
        let mut node = test_node(vector(1000, 1024));
        node.reserved = vector(500, 512);
        let snap = snapshot_with(&node, &[]);
        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(600, 100))]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::ResourcesExhausted);
    }

    #[test]
    fn replacing_an_existing_allocation_does_not_double_count() {
        // The node is exactly full with one allocation; re-placing the same
        // allocation id supersedes the stored copy instead of stacking.
        let node = test_node(vector(1000, 1024));
        let existing = test_alloc(node.id, vector(1000, 1024));
        let snap = snapshot_with(&node, &[existing.clone()]);
        let plan = placement_plan(node.id, vec![existing]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn evicting_in_plan_frees_capacity_for_placement() {
        let node = test_node(vector(1000, 1024));
        let existing = test_alloc(node.id, vector(1000, 1024));
        let snap = snapshot_with(&node, &[existing.clone()]);

        let mut evict = existing;
        evict.desired_status = DesiredStatus::Evict;
        let replacement = test_alloc(node.id, vector(1000, 1024));
        let plan = Plan {
            job: Some(test_job()),
            node_update: HashMap::from([(node.id, vec![evict])]),
            node_allocation: HashMap::from([(node.id, vec![replacement])]),
            ..Plan::default()
        };

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn already_evicted_allocation_frees_capacity() {
        let node = test_node(vector(1000, 1024));
        let mut existing = test_alloc(node.id, vector(1000, 1024));
        existing.desired_status = DesiredStatus::Evict;
        let snap = snapshot_with(&node, &[existing]);

        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(1000, 1024))]);
        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn terminal_client_status_frees_capacity() {
        let node = test_node(vector(1000, 1024));
        let mut existing = test_alloc(node.id, vector(1000, 1024));
        existing.client_status = ClientStatus::Complete;
        let snap = snapshot_with(&node, &[existing]);

        let plan = placement_plan(node.id, vec![test_alloc(node.id, vector(1000, 1024))]);
        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(fit.fits);
    }

    #[test]
    fn port_collision_with_existing_allocation() {
        let node = test_node(vector(4000, 8192));
        let mut existing = test_alloc(node.id, vector(100, 64));
        existing.resources.ports.insert(8080);
        let snap = snapshot_with(&node, &[existing]);

        let mut placed = test_alloc(node.id, vector(100, 64));
        placed.resources.ports.insert(8080);
        let plan = placement_plan(node.id, vec![placed]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::PortCollision);
    }

    #[test]
    fn port_collision_between_new_placements() {
        let node = test_node(vector(4000, 8192));
        let snap = snapshot_with(&node, &[]);

        let mut a = test_alloc(node.id, vector(100, 64));
        a.resources.ports.insert(9000);
        let mut b = test_alloc(node.id, vector(100, 64));
        b.resources.ports.insert(9000);
        let plan = placement_plan(node.id, vec![a, b]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::PortCollision);
    }

    #[test]
    fn reserved_port_is_not_placeable() {
        let mut node = test_node(vector(4000, 8192));
        node.reserved.ports.insert(22);
        let snap = snapshot_with(&node, &[]);

        let mut placed = test_alloc(node.id, vector(100, 64));
        placed.resources.ports.insert(22);
        let plan = placement_plan(node.id, vec![placed]);

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::PortCollision);
    }

    #[test]
    fn overflowing_demand_rejects() {
        let node = test_node(vector(u64::MAX - 1, 1024));
        let snap = snapshot_with(&node, &[]);
        let plan = placement_plan(
            node.id,
            vec![
                test_alloc(node.id, vector(u64::MAX - 10, 1)),
                test_alloc(node.id, vector(1000, 1)),
            ],
        );

        let fit = evaluate_node_plan(&snap, &plan, node.id);
        assert!(!fit.fits);
        assert_eq!(fit.reason, FitReason::ResourcesExhausted);
    }
}
