//! In-process store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::model::{AssignmentId, IdempotencyKey, Job, WorkOrderId};

use super::{AssignmentRef, Commit, CommitOutcome, Receipt, Store};

#[derive(Default)]
struct Inner {
    jobs: HashMap<WorkOrderId, Job>,
    receipts: HashMap<(WorkOrderId, AssignmentId, IdempotencyKey), Receipt>,
}

/// Store backed by a mutex-guarded map. Same semantics as the Postgres
/// store, including the version check on commit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored receipts for a job.
    pub fn receipt_count(&self, id: WorkOrderId) -> usize {
        self.lock()
            .receipts
            .keys()
            .filter(|(wo, _, _)| *wo == id)
            .count()
    }
}

impl Store for MemoryStore {
    async fn resolve_token(&self, token: &str) -> Result<Option<AssignmentRef>> {
        let inner = self.lock();
        Ok(inner.jobs.values().find_map(|job| {
            job.assignments
                .iter()
                .find(|a| a.token.as_str() == token)
                .map(|a| AssignmentRef {
                    work_order_id: job.id(),
                    assignment_id: a.id,
                })
        }))
    }

    async fn load(&self, id: WorkOrderId) -> Result<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn receipt(
        &self,
        id: WorkOrderId,
        assignment_id: AssignmentId,
        key: &IdempotencyKey,
    ) -> Result<Option<Receipt>> {
        Ok(self
            .lock()
            .receipts
            .get(&(id, assignment_id, key.clone()))
            .cloned())
    }

    async fn create(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id()) {
            return Err(Error::Other(format!("work order {} already exists", job.id())));
        }
        inner.jobs.insert(job.id(), job.clone());
        Ok(())
    }

    async fn commit(&self, commit: Commit) -> Result<CommitOutcome> {
        let mut inner = self.lock();
        let id = commit.job.id();
        let current = inner
            .jobs
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("work order {id}")))?;

        if current.version() != commit.expected_version {
            return Ok(CommitOutcome::Stale);
        }

        if let Some(receipt) = commit.receipt {
            inner
                .receipts
                .insert((id, receipt.assignment_id, receipt.key.clone()), receipt);
        }
        inner.jobs.insert(id, commit.job);
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewWorkOrder;
    use chrono::Utc;

    #[tokio::test]
    async fn stale_commit_is_refused() {
        let store = MemoryStore::new();
        let job = Job::new(NewWorkOrder::new("c", "d").into_work_order(Utc::now()));
        store.create(&job).await.unwrap();

        let mut next = job.clone();
        next.work_order.version = 1;
        let commit = Commit {
            job: next.clone(),
            expected_version: 0,
            new_events: vec![],
            receipt: None,
        };
        assert_eq!(
            store.commit(commit.clone()).await.unwrap(),
            CommitOutcome::Committed
        );
        // Same base version again: someone already moved past it.
        assert_eq!(store.commit(commit).await.unwrap(), CommitOutcome::Stale);
        assert_eq!(store.load(job.id()).await.unwrap().unwrap().version(), 1);
    }
}
