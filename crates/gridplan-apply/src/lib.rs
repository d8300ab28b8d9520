//! gridplan-apply — the serialization point of the plan pipeline.
//!
//! Schedulers compute plans speculatively and in parallel; this crate is
//! where they meet the single authoritative cluster state. Exactly one
//! applier task drains the admission queue, evaluates each plan against a
//! fresh snapshot, writes the accepted subset to the replicated log as one
//! or more batched entries, and overlays the accepted changes onto the
//! proposer's snapshot before replication completes so the proposer can
//! keep scheduling.
//!
//! # Architecture
//!
//! ```text
//! PlanService::submit_plan          (validation, admission)
//!   └── PlanQueue                   (bounded, many submitters)
//!         └── applier task          (exactly one, submission order)
//!               ├── StateStore::snapshot
//!               ├── evaluate_plan   (gridplan-eval, parallel fit checks)
//!               ├── batching        (split by node, job/deployment first)
//!               ├── codec           (versioned MessagePack entries)
//!               ├── LogEngine::apply(batch) → commit future
//!               └── StateSnapshot::apply_plan_batch   (optimistic)
//! ```
//!
//! Log writes are totally ordered by submission order; the optimistic
//! snapshot update happens under the same serial discipline, so a caller
//! always gets back a snapshot at least as new as any plan it previously
//! submitted.

pub mod applier;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod queue;

pub use applier::PlanService;
pub use config::ApplierConfig;
pub use error::{ApplierError, ApplierResult, CodecError, LogError};
pub use log::{CommitFuture, DirectLog, LogEngine};
pub use queue::PlanResponse;
