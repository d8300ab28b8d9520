//! StateStore — redb-backed committed cluster state.
//!
//! Provides typed CRUD operations over nodes, allocations, jobs, and
//! deployments, all stamped with the log index that wrote them, plus the
//! log-applier entry point [`StateStore::apply_plan_batch`] and
//! [`StateStore::snapshot`] for point-in-time immutable views. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::snapshot::StateSnapshot;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Read and deserialize one value from any readable table.
fn get_value<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and
    /// single-process deployments).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Index tracking ─────────────────────────────────────────────

    /// Greatest log index this store has applied.
    pub fn latest_index(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(META).map_err(map_err!(Table))?;
        Ok(get_value(&table, LATEST_INDEX_KEY)?.unwrap_or(0))
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node at the given log index. `create_index` is
    /// preserved across updates.
    pub fn upsert_node(&self, index: u64, node: &Node) -> StateResult<()> {
        let key = node.id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let existing: Option<Node> = get_value(&table, key.as_str())?;

            let mut record = node.clone();
            record.create_index = existing.map_or(index, |n| n.create_index);
            record.modify_index = index;

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            bump_index(&mut meta, index)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %key, index, "node stored");
        Ok(())
    }

    /// Get a node by id.
    pub fn node_by_id(&self, node_id: NodeId) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        get_value(&table, node_id.to_string().as_str())
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: Node =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(node);
        }
        Ok(results)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Insert or update a set of allocations at the given log index.
    /// `create_index` is preserved across updates.
    pub fn upsert_allocs(&self, index: u64, allocs: &[Allocation]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            for alloc in allocs {
                let key = alloc.id.to_string();
                let existing: Option<Allocation> = get_value(&table, key.as_str())?;

                let mut record = alloc.clone();
                record.create_index = existing.map_or(index, |a| a.create_index);
                record.modify_index = index;

                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            bump_index(&mut meta, index)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = allocs.len(), index, "allocations stored");
        Ok(())
    }

    /// Get an allocation by id.
    pub fn alloc_by_id(&self, alloc_id: AllocId) -> StateResult<Option<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        get_value(&table, alloc_id.to_string().as_str())
    }

    /// List all allocations.
    pub fn list_allocs(&self) -> StateResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let alloc: Allocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(alloc);
        }
        Ok(results)
    }

    /// List all allocations placed on a node.
    pub fn allocs_by_node(&self, node_id: NodeId) -> StateResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let alloc: Allocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if alloc.node_id == node_id {
                results.push(alloc);
            }
        }
        Ok(results)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job at the given log index.
    pub fn upsert_job(&self, index: u64, job: &Job) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut record = job.clone();
            record.modify_index = index;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            bump_index(&mut meta, index)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a job by id.
    pub fn job_by_id(&self, job_id: &str) -> StateResult<Option<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        get_value(&table, job_id)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment at the given log index.
    pub fn upsert_deployment(&self, index: u64, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existing: Option<Deployment> = get_value(&table, key.as_str())?;

            let mut record = deployment.clone();
            record.create_index = existing.map_or(index, |d| d.create_index);
            record.modify_index = index;

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            bump_index(&mut meta, index)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a deployment by id.
    pub fn deployment_by_id(&self, deployment_id: DeploymentId) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        get_value(&table, deployment_id.to_string().as_str())
    }

    // ── Plan batches ───────────────────────────────────────────────

    /// Apply one committed plan batch at `commit_index`, atomically.
    ///
    /// This is the log-applier side of the plan pipeline: new placements
    /// are inserted (resolving by-ref jobs against the batch job, the
    /// record being replaced, or the committed jobs table), updates are
    /// merged onto existing records, preemption markers are set, and the
    /// batch's job and deployment are upserted. Updates referencing
    /// unknown allocations are skipped.
    pub fn apply_plan_batch(&self, commit_index: u64, batch: &PlanBatch) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut allocs = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;

            if let Some(job) = &batch.job {
                let mut record = job.clone();
                record.modify_index = commit_index;
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                jobs.insert(record.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            if let Some(deployment) = &batch.deployment {
                let key = deployment.id.to_string();
                let existing: Option<Deployment> = get_value(&deployments, key.as_str())?;
                let mut record = deployment.clone();
                record.create_index = existing.map_or(commit_index, |d| d.create_index);
                record.modify_index = commit_index;
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                deployments
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            for placed in batch.node_allocation.values().flatten() {
                let key = placed.id.to_string();
                let existing: Option<Allocation> = get_value(&allocs, key.as_str())?;

                let mut record = placed.clone();
                if record.job.is_by_ref() {
                    record.job = resolve_job(placed, batch.job.as_ref(), existing.as_ref(), |id| {
                        get_value(&jobs, id)
                    })?;
                }
                record.create_index = existing.map_or(commit_index, |a| a.create_index);
                record.modify_index = commit_index;

                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                allocs
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            for update in batch.node_update.values().flatten() {
                let key = update.id.to_string();
                let existing: Option<Allocation> = get_value(&allocs, key.as_str())?;
                let Some(mut existing) = existing else {
                    warn!(alloc = %update.id, "plan updates unknown allocation, skipping");
                    continue;
                };
                existing.apply_update(update);
                existing.modify_index = commit_index;

                let value = serde_json::to_vec(&existing).map_err(map_err!(Serialize))?;
                allocs
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            for preempted in batch.node_preemptions.values().flatten() {
                let key = preempted.id.to_string();
                let existing: Option<Allocation> = get_value(&allocs, key.as_str())?;
                let Some(mut existing) = existing else {
                    warn!(alloc = %preempted.id, "plan preempts unknown allocation, skipping");
                    continue;
                };
                existing.preempted_by = preempted.preempted_by;
                existing.desired_status = preempted.desired_status;
                existing.desired_description = preempted.desired_description.clone();
                existing.modify_index = commit_index;

                let value = serde_json::to_vec(&existing).map_err(map_err!(Serialize))?;
                allocs
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            bump_index(&mut meta, commit_index)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(commit_index, plan_index = batch.plan_index, "plan batch applied");
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Take a point-in-time immutable view of the committed state.
    pub fn snapshot(&self) -> StateResult<StateSnapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let mut nodes = HashMap::new();
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: Node =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            nodes.insert(node.id, node);
        }

        let mut allocs = HashMap::new();
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let alloc: Allocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            allocs.insert(alloc.id, alloc);
        }

        let mut jobs = HashMap::new();
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: Job = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            jobs.insert(job.id.clone(), job);
        }

        let mut deployments = HashMap::new();
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            deployments.insert(deployment.id, deployment);
        }

        let meta = txn.open_table(META).map_err(map_err!(Table))?;
        let index = get_value(&meta, LATEST_INDEX_KEY)?.unwrap_or(0);

        Ok(StateSnapshot::new(index, nodes, allocs, jobs, deployments))
    }
}

/// Advance the stored latest index, never moving it backwards.
fn bump_index(
    meta: &mut redb::Table<&'static str, &'static [u8]>,
    index: u64,
) -> StateResult<()> {
    let current: u64 = get_value(meta, LATEST_INDEX_KEY)?.unwrap_or(0);
    if index > current {
        let value = serde_json::to_vec(&index).map_err(map_err!(Serialize))?;
        meta.insert(LATEST_INDEX_KEY, value.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Resolve a by-ref job for an allocation about to be committed: prefer the
/// batch's job when the id matches, then the job embedded in the record
/// being replaced, then the committed jobs table.
fn resolve_job(
    alloc: &Allocation,
    batch_job: Option<&Job>,
    existing: Option<&Allocation>,
    lookup: impl FnOnce(&str) -> StateResult<Option<Job>>,
) -> StateResult<JobRef> {
    if let Some(job) = batch_job.filter(|j| j.id == alloc.job_id) {
        return Ok(JobRef::Inline(job.clone()));
    }
    if let Some(JobRef::Inline(job)) = existing.map(|a| &a.job) {
        return Ok(JobRef::Inline(job.clone()));
    }
    if let Some(job) = lookup(alloc.job_id.as_str())? {
        return Ok(JobRef::Inline(job));
    }
    warn!(alloc = %alloc.id, job = %alloc.job_id, "no job found for by-ref allocation");
    Ok(JobRef::ByRef)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn vector(cpu: u64, mem: u64) -> ResourceVector {
        ResourceVector {
            cpu_mhz: cpu,
            memory_mb: mem,
            ..ResourceVector::default()
        }
    }

    fn test_node() -> Node {
        Node {
            id: Uuid::new_v4(),
            status: NodeStatus::Ready,
            drain: false,
            resources: vector(4000, 8192),
            reserved: ResourceVector::default(),
            create_index: 0,
            modify_index: 0,
        }
    }

    fn test_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            name: id.to_string(),
            priority: 50,
            modify_index: 0,
        }
    }

    fn test_alloc(node_id: NodeId, job: &Job) -> Allocation {
        Allocation {
            id: Uuid::new_v4(),
            job_id: job.id.clone(),
            node_id,
            resources: vector(500, 256),
            desired_status: DesiredStatus::Run,
            desired_description: String::new(),
            client_status: ClientStatus::Pending,
            job: JobRef::Inline(job.clone()),
            preempted_by: None,
            create_index: 0,
            modify_index: 0,
        }
    }

    #[test]
    fn node_upsert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();

        store.upsert_node(1000, &node).unwrap();
        let stored = store.node_by_id(node.id).unwrap().unwrap();

        assert_eq!(stored.id, node.id);
        assert_eq!(stored.create_index, 1000);
        assert_eq!(stored.modify_index, 1000);
        assert_eq!(store.latest_index().unwrap(), 1000);
    }

    #[test]
    fn node_update_preserves_create_index() {
        let store = StateStore::open_in_memory().unwrap();
        let mut node = test_node();
        store.upsert_node(1000, &node).unwrap();

        node.drain = true;
        store.upsert_node(1010, &node).unwrap();

        let stored = store.node_by_id(node.id).unwrap().unwrap();
        assert!(stored.drain);
        assert_eq!(stored.create_index, 1000);
        assert_eq!(stored.modify_index, 1010);
    }

    #[test]
    fn latest_index_never_regresses() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_node(1000, &test_node()).unwrap();
        store.upsert_node(900, &test_node()).unwrap();
        assert_eq!(store.latest_index().unwrap(), 1000);
    }

    #[test]
    fn allocs_by_node_filters() {
        let store = StateStore::open_in_memory().unwrap();
        let job = test_job("web");
        let (n1, n2) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .upsert_allocs(
                1000,
                &[test_alloc(n1, &job), test_alloc(n1, &job), test_alloc(n2, &job)],
            )
            .unwrap();

        assert_eq!(store.allocs_by_node(n1).unwrap().len(), 2);
        assert_eq!(store.allocs_by_node(n2).unwrap().len(), 1);
        assert_eq!(store.allocs_by_node(Uuid::new_v4()).unwrap().len(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();
        store.upsert_node(1000, &node).unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.index(), 1000);

        let mut drained = node.clone();
        drained.drain = true;
        store.upsert_node(1001, &drained).unwrap();

        // The earlier snapshot still sees the pre-drain node.
        assert!(!snap.node_by_id(node.id).unwrap().drain);
        assert_eq!(snap.index(), 1000);
        assert!(store.snapshot().unwrap().node_by_id(node.id).unwrap().drain);
    }

    #[test]
    fn apply_batch_inserts_placements_with_indexes() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();
        store.upsert_node(1000, &node).unwrap();

        let job = test_job("web");
        let mut alloc = test_alloc(node.id, &job);
        alloc.job = JobRef::ByRef;

        let batch = PlanBatch {
            plan_index: 1001,
            job: Some(job.clone()),
            deployment: None,
            node_allocation: HashMap::from([(node.id, vec![alloc.clone()])]),
            ..PlanBatch::default()
        };
        store.apply_plan_batch(1001, &batch).unwrap();

        let stored = store.alloc_by_id(alloc.id).unwrap().unwrap();
        assert_eq!(stored.create_index, 1001);
        assert_eq!(stored.modify_index, 1001);
        // The by-ref job resolved against the batch job.
        assert_eq!(stored.job.as_inline().map(|j| j.id.as_str()), Some("web"));
        assert_eq!(store.job_by_id("web").unwrap().unwrap().modify_index, 1001);
        assert_eq!(store.latest_index().unwrap(), 1001);
    }

    #[test]
    fn apply_batch_merges_updates_and_keeps_job() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();
        store.upsert_node(1000, &node).unwrap();

        let job = test_job("web");
        let alloc = test_alloc(node.id, &job);
        store.upsert_allocs(1001, &[alloc.clone()]).unwrap();

        let mut evict = alloc.clone();
        evict.desired_status = DesiredStatus::Evict;
        evict.desired_description = "making room".to_string();
        evict.job = JobRef::ByRef;

        let batch = PlanBatch {
            plan_index: 1002,
            node_update: HashMap::from([(node.id, vec![evict])]),
            ..PlanBatch::default()
        };
        store.apply_plan_batch(1002, &batch).unwrap();

        let stored = store.alloc_by_id(alloc.id).unwrap().unwrap();
        assert_eq!(stored.desired_status, DesiredStatus::Evict);
        assert_eq!(stored.desired_description, "making room");
        assert_eq!(stored.create_index, 1001);
        assert_eq!(stored.modify_index, 1002);
        // The stored job survived the by-ref update.
        assert_eq!(stored.job.as_inline(), Some(&job));
    }

    #[test]
    fn apply_batch_skips_unknown_update() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();
        store.upsert_node(1000, &node).unwrap();

        let mut ghost = test_alloc(node.id, &test_job("web"));
        ghost.desired_status = DesiredStatus::Evict;

        let batch = PlanBatch {
            plan_index: 1001,
            node_update: HashMap::from([(node.id, vec![ghost.clone()])]),
            ..PlanBatch::default()
        };
        store.apply_plan_batch(1001, &batch).unwrap();
        assert!(store.alloc_by_id(ghost.id).unwrap().is_none());
    }

    #[test]
    fn apply_batch_marks_preemptions() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node();
        store.upsert_node(1000, &node).unwrap();

        let job = test_job("batch");
        let victim = test_alloc(node.id, &job);
        store.upsert_allocs(1001, &[victim.clone()]).unwrap();

        let preemptor = Uuid::new_v4();
        let mut marker = victim.clone();
        marker.desired_status = DesiredStatus::Evict;
        marker.preempted_by = Some(preemptor);

        let batch = PlanBatch {
            plan_index: 1002,
            node_preemptions: HashMap::from([(node.id, vec![marker])]),
            ..PlanBatch::default()
        };
        store.apply_plan_batch(1002, &batch).unwrap();

        let stored = store.alloc_by_id(victim.id).unwrap().unwrap();
        assert_eq!(stored.preempted_by, Some(preemptor));
        assert_eq!(stored.desired_status, DesiredStatus::Evict);
    }

    #[test]
    fn apply_batch_upserts_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            job_id: "web".to_string(),
            status: DeploymentStatus::Running,
            create_index: 0,
            modify_index: 0,
        };

        let batch = PlanBatch {
            plan_index: 1001,
            deployment: Some(deployment.clone()),
            ..PlanBatch::default()
        };
        store.apply_plan_batch(1001, &batch).unwrap();

        let stored = store.deployment_by_id(deployment.id).unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Running);
        assert_eq!(stored.create_index, 1001);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");
        let node = test_node();

        {
            let store = StateStore::open(&db_path).unwrap();
            store.upsert_node(1000, &node).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.node_by_id(node.id).unwrap().is_some());
        assert_eq!(store.latest_index().unwrap(), 1000);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert_eq!(store.latest_index().unwrap(), 0);
        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.node_by_id(Uuid::new_v4()).unwrap().is_none());
        assert!(store.alloc_by_id(Uuid::new_v4()).unwrap().is_none());
        assert!(store.job_by_id("nope").unwrap().is_none());

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.index(), 0);
    }
}
