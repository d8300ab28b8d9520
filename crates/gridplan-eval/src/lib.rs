//! gridplan-eval — plan feasibility evaluation.
//!
//! Given an immutable state snapshot and a scheduler's plan, decides which
//! nodes can accept their share of the plan and assembles the accepted
//! subset:
//!
//! - [`fit`]: the pure per-node predicate (resources, status, ports).
//! - [`pool`]: a bounded worker pool that runs fit checks in parallel.
//! - [`evaluate`]: partitions a plan by node, fans checks out through the
//!   pool, and aggregates an ordered [`gridplan_state::PlanResult`].
//!
//! # Architecture
//!
//! ```text
//! evaluate_plan
//!   ├── Plan.node_ids()            (union of all three entry maps)
//!   ├── EvaluatePool.submit(..)    (one fit check per node, parallel)
//!   │     └── evaluate_node_plan   (pure read on the snapshot)
//!   └── aggregation                (accepted entries, refresh index)
//! ```
//!
//! Evaluation never mutates the snapshot; checks are pure reads on an
//! immutable view, so no locking is involved.

pub mod error;
pub mod evaluate;
pub mod fit;
pub mod pool;

pub use error::{EvalError, EvalResult};
pub use evaluate::evaluate_plan;
pub use fit::{evaluate_node_plan, FitReason, NodeFit};
pub use pool::{EvaluatePool, PoolConfig};
