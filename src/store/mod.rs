//! Work order store.
//!
//! The store persists [`Job`] aggregates. Every write is a compare-and-swap
//! on the work order's version: a commit built from a stale read is refused
//! and the caller decides what to tell its client. Two implementations ship:
//! [`MemoryStore`] for tests and demos, and Postgres via [`crate::db::Db`].

mod memory;

pub use memory::MemoryStore;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{AssignmentId, IdempotencyKey, Job, MutationResponse, TimerEvent, WorkOrderId};

/// Which assignment (and so which work order) a bearer token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentRef {
    pub work_order_id: WorkOrderId,
    pub assignment_id: AssignmentId,
}

/// Stored response of an already-applied mutation. Keys are scoped to the
/// assignment that sent them.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub assignment_id: AssignmentId,
    pub key: IdempotencyKey,
    pub response: MutationResponse,
    pub created_at: DateTime<Utc>,
}

/// A write against one job.
#[derive(Debug, Clone)]
pub struct Commit {
    /// The job as it should be after the write, already carrying its next
    /// version.
    pub job: Job,
    /// Version the write was computed from.
    pub expected_version: u64,
    /// Events appended by this write. Already present in `job.events`.
    pub new_events: Vec<TimerEvent>,
    pub receipt: Option<Receipt>,
}

/// Result of a compare-and-swap commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Someone else committed first; nothing was written.
    Stale,
}

/// Persistence for job aggregates.
pub trait Store: Send + Sync + 'static {
    /// Map a bearer token to its assignment.
    fn resolve_token(&self, token: &str)
    -> impl Future<Output = Result<Option<AssignmentRef>>> + Send;

    /// Load a full job.
    fn load(&self, id: WorkOrderId) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Look up the receipt of a mutation this assignment already applied.
    fn receipt(
        &self,
        id: WorkOrderId,
        assignment_id: AssignmentId,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    /// Insert a brand-new job.
    fn create(&self, job: &Job) -> impl Future<Output = Result<()>> + Send;

    /// Atomically write a job if nobody else has written since
    /// `expected_version`.
    fn commit(&self, commit: Commit) -> impl Future<Output = Result<CommitOutcome>> + Send;

    /// Is the backing storage reachable?
    fn health_check(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
