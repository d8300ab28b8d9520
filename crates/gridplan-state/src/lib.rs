//! gridplan-state — committed cluster state for the plan applier.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for nodes, allocations, jobs, and deployments, plus the two views
//! the plan pipeline works against:
//!
//! - `StateStore`: the authoritative committed state. Mutated only by the
//!   log applier via [`StateStore::apply_plan_batch`].
//! - `StateSnapshot`: a point-in-time immutable view handed to schedulers
//!   and the fit evaluator. Carries the optimistic mutator that overlays an
//!   accepted plan before replication completes.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every record carries the log index that created and last modified it;
//! the store tracks the greatest index it has applied so snapshots can
//! report how current they are.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use snapshot::StateSnapshot;
pub use store::StateStore;
pub use types::*;
