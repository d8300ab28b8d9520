//! redb table definitions for the cluster state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Nodes, allocations, and deployments are keyed by their UUID in
//! hyphenated form; jobs by their job id.

use redb::TableDefinition;

/// Nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Allocations keyed by `{alloc_id}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Store metadata; holds the greatest applied log index under [`LATEST_INDEX_KEY`].
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Meta key for the greatest log index applied to this store.
pub const LATEST_INDEX_KEY: &str = "latest_index";
