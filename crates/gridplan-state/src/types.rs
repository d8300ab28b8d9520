//! Domain types for the plan-application core.
//!
//! These types represent the committed state of nodes, allocations, jobs,
//! and deployments, plus the plan types exchanged between schedulers and
//! the applier. All types are serializable to/from JSON for storage in
//! redb tables; the batch types additionally travel through the log codec.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit identifier for a cluster node.
pub type NodeId = Uuid;

/// Opaque 128-bit identifier for an allocation.
pub type AllocId = Uuid;

/// Opaque 128-bit identifier for a deployment.
pub type DeploymentId = Uuid;

/// Identifier for a job (scheduler-scoped, human readable).
pub type JobId = String;

// ── Resources ─────────────────────────────────────────────────────

/// Resource demand or capacity, additive per dimension.
///
/// Scalar dimensions add with saturation: an overflowing sum pins at the
/// maximum and therefore fails the subsequent capacity comparison instead
/// of erroring. Ports are not additive; feasibility is checked through a
/// collision set so a port claimed twice is detectable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu_mhz: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_mbits: u64,
    /// Ports reserved on the node's shared network namespace.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ports: BTreeSet<u16>,
}

impl ResourceVector {
    /// Accumulate another vector's scalar dimensions, saturating on overflow.
    pub fn add(&mut self, other: &ResourceVector) {
        self.cpu_mhz = self.cpu_mhz.saturating_add(other.cpu_mhz);
        self.memory_mb = self.memory_mb.saturating_add(other.memory_mb);
        self.disk_mb = self.disk_mb.saturating_add(other.disk_mb);
        self.network_mbits = self.network_mbits.saturating_add(other.network_mbits);
        self.ports.extend(other.ports.iter().copied());
    }

    /// Componentwise `<=` over the scalar dimensions. Ports are excluded;
    /// they are checked via collision tracking.
    pub fn fits_within(&self, capacity: &ResourceVector) -> bool {
        self.cpu_mhz <= capacity.cpu_mhz
            && self.memory_mb <= capacity.memory_mb
            && self.disk_mb <= capacity.disk_mb
            && self.network_mbits <= capacity.network_mbits
    }

    /// Componentwise saturating subtraction over the scalar dimensions.
    pub fn minus(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_mhz: self.cpu_mhz.saturating_sub(other.cpu_mhz),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
            network_mbits: self.network_mbits.saturating_sub(other.network_mbits),
            ports: BTreeSet::new(),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Lifecycle status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Init,
    Ready,
    Down,
    Disconnected,
}

/// A worker node in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub status: NodeStatus,
    /// Draining nodes shed work; they accept evictions but no new placements.
    pub drain: bool,
    /// Total schedulable capacity.
    pub resources: ResourceVector,
    /// Capacity held back for system use; its ports are never placeable.
    pub reserved: ResourceVector,
    /// Log index that first stored this node.
    pub create_index: u64,
    /// Log index of the last modification.
    pub modify_index: u64,
}

impl Node {
    /// Capacity available for allocations: `resources − reserved`.
    pub fn available(&self) -> ResourceVector {
        self.resources.minus(&self.reserved)
    }

    /// Whether the node accepts new placements at all.
    pub fn schedulable(&self) -> bool {
        self.status == NodeStatus::Ready && !self.drain
    }
}

// ── Allocation ────────────────────────────────────────────────────

/// What the scheduler wants done with an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredStatus {
    Run,
    Stop,
    Evict,
}

/// What the client actually reports for an allocation.
///
/// `Pending` doubles as the unset sentinel on update records: an update
/// carrying `Pending` leaves the committed client status untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
}

impl ClientStatus {
    /// Terminal statuses no longer hold resources on their node.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientStatus::Complete | ClientStatus::Failed | ClientStatus::Lost)
    }
}

/// Job payload carried by an allocation.
///
/// `ByRef` is a size optimization on the wire: the log applier resolves
/// the job from the batch's top-level job or from the committed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRef {
    Inline(Job),
    #[default]
    ByRef,
}

impl JobRef {
    pub fn is_by_ref(&self) -> bool {
        matches!(self, JobRef::ByRef)
    }

    pub fn as_inline(&self) -> Option<&Job> {
        match self {
            JobRef::Inline(job) => Some(job),
            JobRef::ByRef => None,
        }
    }
}

/// A committed or proposed placement of a task group on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocId,
    pub job_id: JobId,
    pub node_id: NodeId,
    pub resources: ResourceVector,
    pub desired_status: DesiredStatus,
    /// Human-readable reason for the latest desired-status transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desired_description: String,
    pub client_status: ClientStatus,
    pub job: JobRef,
    /// Allocation that forced this one off its node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preempted_by: Option<AllocId>,
    /// Log index that first stored this allocation.
    pub create_index: u64,
    /// Log index of the last modification.
    pub modify_index: u64,
}

impl Allocation {
    /// Whether this allocation's resources count against its node: it is
    /// meant to run and the client has not reached a terminal state.
    pub fn counts_against_node(&self) -> bool {
        self.desired_status == DesiredStatus::Run && !self.client_status.is_terminal()
    }

    /// Merge the mutable fields of an update record onto this committed
    /// allocation. The update's job is taken only when inline, so a
    /// by-ref update preserves the job already stored here.
    pub fn apply_update(&mut self, update: &Allocation) {
        self.desired_status = update.desired_status;
        self.desired_description = update.desired_description.clone();
        if update.client_status != ClientStatus::Pending {
            self.client_status = update.client_status;
        }
        if let JobRef::Inline(job) = &update.job {
            self.job = JobRef::Inline(job.clone());
        }
    }
}

// ── Job & Deployment ──────────────────────────────────────────────

/// The unit of work allocations belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub priority: u32,
    /// Log index of the last modification.
    pub modify_index: u64,
}

/// Rollout state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Successful,
    Failed,
    Cancelled,
}

/// A deployment record created or updated atomically with a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub job_id: JobId,
    pub status: DeploymentStatus,
    pub create_index: u64,
    pub modify_index: u64,
}

// ── Plan ──────────────────────────────────────────────────────────

/// A scheduler's proposed set of cluster state changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// The job the new placements belong to. Required whenever
    /// `node_allocation` is non-empty.
    pub job: Option<Job>,
    /// Deployment record to create or update atomically with the plan.
    pub deployment: Option<Deployment>,
    /// Require total acceptance: any rejected node empties the result.
    pub all_at_once: bool,
    /// New placements, keyed by target node.
    pub node_allocation: HashMap<NodeId, Vec<Allocation>>,
    /// Status updates to existing allocations (evictions and stops).
    pub node_update: HashMap<NodeId, Vec<Allocation>>,
    /// Allocations preempted by the new placements on the same node.
    pub node_preemptions: HashMap<NodeId, Vec<Allocation>>,
}

impl Plan {
    /// Every node this plan touches, across all three entry maps.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.node_allocation
            .keys()
            .chain(self.node_update.keys())
            .chain(self.node_preemptions.keys())
            .copied()
            .collect()
    }
}

/// The subset of a plan accepted by the applier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub job: Option<Job>,
    pub deployment: Option<Deployment>,
    pub node_allocation: HashMap<NodeId, Vec<Allocation>>,
    pub node_update: HashMap<NodeId, Vec<Allocation>>,
    pub node_preemptions: HashMap<NodeId, Vec<Allocation>>,
    /// Greatest state index observed while rejecting a node. A proposer
    /// must refresh its snapshot past this index before resubmitting.
    /// Zero when no node rejected.
    pub refresh_index: u64,
}

impl PlanResult {
    /// True when the result commits nothing: no entries and no deployment.
    pub fn is_empty(&self) -> bool {
        self.node_allocation.is_empty()
            && self.node_update.is_empty()
            && self.node_preemptions.is_empty()
            && self.deployment.is_none()
    }
}

/// The slice of a plan result committed as one log entry.
///
/// Large results are split into several batches along node boundaries;
/// the job and deployment ride the first batch only. `plan_index` is
/// assigned by the applier, monotonically per applier instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanBatch {
    pub plan_index: u64,
    pub job: Option<Job>,
    pub deployment: Option<Deployment>,
    pub node_update: HashMap<NodeId, Vec<Allocation>>,
    pub node_allocation: HashMap<NodeId, Vec<Allocation>>,
    pub node_preemptions: HashMap<NodeId, Vec<Allocation>>,
}
