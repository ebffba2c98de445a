//! Offline mutation queue.
//!
//! FIFO per work order, persisted to a JSON file after every change so it
//! survives restarts. An entry leaves the queue only when the server
//! acknowledges its idempotency key, or when the server rejects it outright.
//!
//! Consecutive entries aimed at the same target collapse into one before
//! they are sent (see [`OfflineQueue::enqueue`]). Timer entries never
//! collapse: each is a distinct event in the audit trail.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::persist;
use crate::error::Result;
use crate::model::{IdempotencyKey, Mutation, MutationKind, MutationTarget, WorkOrderId};

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineMutation {
    pub local_id: Uuid,
    pub work_order_id: WorkOrderId,
    pub mutation: Mutation,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: IdempotencyKey,
    /// Version the edit was based on, sent as `If-Match`. Only set for
    /// mutations that overwrite shared fields.
    #[serde(default)]
    pub base_version: Option<u64>,
    /// Failed network attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Conflicts absorbed by rebasing so far.
    #[serde(default)]
    pub conflicts: u32,
    /// Earliest time the next attempt may be made.
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

impl OfflineMutation {
    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    entries: BTreeMap<WorkOrderId, VecDeque<OfflineMutation>>,
}

/// Persistent per-work-order FIFO of pending mutations.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    path: Option<PathBuf>,
    state: QueueFile,
}

impl OfflineQueue {
    /// A queue that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the queue at `path`, or start empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = persist::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => persist::write_json_atomic(path, &self.state),
            None => Ok(()),
        }
    }

    /// Add a mutation to the back of its work order's queue.
    ///
    /// If the current tail targets the same thing and has not been sent
    /// yet, it is replaced instead: details patches merge (later fields
    /// win), everything else keeps only the newer payload. Returns the
    /// local id of the entry now holding the mutation.
    pub fn enqueue(
        &mut self,
        work_order_id: WorkOrderId,
        mutation: Mutation,
        base_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let queue = self.state.entries.entry(work_order_id).or_default();

        let target = mutation.target();
        let collapse = target != MutationTarget::Timer
            && queue.back().is_some_and(|tail| {
                tail.attempts == 0 && tail.conflicts == 0 && tail.mutation.target() == target
            });
        if let (true, Some(tail)) = (collapse, queue.back_mut()) {
            match (&mut tail.mutation, mutation) {
                (Mutation::Details(existing), Mutation::Details(later)) => existing.merge(later),
                (slot, newer) => *slot = newer,
            }
            // The payload changed; a receipt for the old key would be wrong.
            tail.idempotency_key = IdempotencyKey::generate();
            tail.base_version = base_version.or(tail.base_version);
            debug!(local_id = %tail.local_id, kind = %tail.kind(), "collapsed queued mutation");
            let local_id = tail.local_id;
            self.persist()?;
            return Ok(local_id);
        }

        let entry = OfflineMutation {
            local_id: Uuid::new_v4(),
            work_order_id,
            mutation,
            created_at: now,
            idempotency_key: IdempotencyKey::generate(),
            base_version,
            attempts: 0,
            conflicts: 0,
            not_before: None,
        };
        let local_id = entry.local_id;
        debug!(%local_id, kind = %entry.kind(), work_order = %work_order_id, "queued mutation");
        queue.push_back(entry);
        self.persist()?;
        Ok(local_id)
    }

    /// Oldest pending entry for a work order.
    pub fn front(&self, work_order_id: WorkOrderId) -> Option<&OfflineMutation> {
        self.state.entries.get(&work_order_id)?.front()
    }

    /// Remove the front entry if the server acknowledged its key.
    pub fn ack(
        &mut self,
        work_order_id: WorkOrderId,
        key: &IdempotencyKey,
    ) -> Result<Option<OfflineMutation>> {
        let matches = self
            .front(work_order_id)
            .is_some_and(|e| &e.idempotency_key == key);
        if !matches {
            return Ok(None);
        }
        self.pop_front(work_order_id)
    }

    /// Remove the front entry unconditionally (server rejected it).
    pub fn reject(&mut self, work_order_id: WorkOrderId) -> Result<Option<OfflineMutation>> {
        self.pop_front(work_order_id)
    }

    fn pop_front(&mut self, work_order_id: WorkOrderId) -> Result<Option<OfflineMutation>> {
        let Some(queue) = self.state.entries.get_mut(&work_order_id) else {
            return Ok(None);
        };
        let entry = queue.pop_front();
        if queue.is_empty() {
            self.state.entries.remove(&work_order_id);
        }
        self.persist()?;
        Ok(entry)
    }

    /// Record a failed network attempt on the front entry.
    pub fn defer(&mut self, work_order_id: WorkOrderId, not_before: DateTime<Utc>) -> Result<()> {
        if let Some(front) = self
            .state
            .entries
            .get_mut(&work_order_id)
            .and_then(VecDeque::front_mut)
        {
            front.attempts += 1;
            front.not_before = Some(not_before);
        }
        self.persist()
    }

    /// Record a conflict on the front entry and point it at the new base.
    pub fn rebase_front(&mut self, work_order_id: WorkOrderId, version: u64) -> Result<()> {
        if let Some(front) = self
            .state
            .entries
            .get_mut(&work_order_id)
            .and_then(VecDeque::front_mut)
        {
            front.conflicts += 1;
            if front.base_version.is_some() {
                front.base_version = Some(version);
            }
        }
        self.persist()
    }

    /// Drop a not-yet-acknowledged entry, e.g. an undone local edit.
    pub fn cancel(&mut self, local_id: Uuid) -> Result<Option<OfflineMutation>> {
        let mut removed = None;
        for queue in self.state.entries.values_mut() {
            if let Some(pos) = queue.iter().position(|e| e.local_id == local_id) {
                removed = queue.remove(pos);
                break;
            }
        }
        self.state.entries.retain(|_, q| !q.is_empty());
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Pending entries for one work order, oldest first.
    pub fn pending(&self, work_order_id: WorkOrderId) -> impl Iterator<Item = &OfflineMutation> {
        self.state
            .entries
            .get(&work_order_id)
            .into_iter()
            .flat_map(|q| q.iter())
    }

    /// Work orders with at least one pending entry.
    pub fn work_orders(&self) -> Vec<WorkOrderId> {
        self.state.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.entries.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn part(target: u32) -> Mutation {
        Mutation::Parts(PartAdjustment::new(
            ProductId::new("X"),
            QtyChange::Target(target),
        ))
    }

    #[test]
    fn part_targets_collapse_into_the_latest() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        let first = q.enqueue(id, part(1), None, now).unwrap();
        let second = q.enqueue(id, part(0), None, now).unwrap();

        assert_eq!(first, second);
        assert_eq!(q.len(), 1);
        assert_eq!(q.front(id).unwrap().mutation, part(0));
    }

    #[test]
    fn timer_actions_never_collapse() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        q.enqueue(id, Mutation::Timer(TimerCommand::new(TimerAction::Start)), None, now)
            .unwrap();
        q.enqueue(id, Mutation::Timer(TimerCommand::new(TimerAction::Pause)), None, now)
            .unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn collapse_only_touches_the_tail() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        q.enqueue(id, part(2), None, now).unwrap();
        q.enqueue(id, Mutation::Timer(TimerCommand::new(TimerAction::Start)), None, now)
            .unwrap();
        q.enqueue(id, part(1), None, now).unwrap();
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn details_patches_merge() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        let a = DetailsPatch {
            cause: Some("worn belt".into()),
            mileage: Some(1000),
            ..Default::default()
        };
        let b = DetailsPatch {
            mileage: Some(1200),
            ..Default::default()
        };
        q.enqueue(id, Mutation::Details(a), Some(3), now).unwrap();
        q.enqueue(id, Mutation::Details(b), None, now).unwrap();

        let Mutation::Details(merged) = &q.front(id).unwrap().mutation else {
            panic!("expected details");
        };
        assert_eq!(merged.cause.as_deref(), Some("worn belt"));
        assert_eq!(merged.mileage, Some(1200));
        assert_eq!(q.front(id).unwrap().base_version, Some(3));
    }

    #[test]
    fn collapse_issues_a_fresh_key() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        q.enqueue(id, part(3), None, now).unwrap();
        let before = q.front(id).unwrap().idempotency_key.clone();
        q.enqueue(id, part(2), None, now).unwrap();
        assert_ne!(q.front(id).unwrap().idempotency_key, before);
    }

    #[test]
    fn sent_entries_are_not_collapsed() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        let now = Utc::now();
        q.enqueue(id, part(3), None, now).unwrap();
        q.defer(id, now).unwrap();
        q.enqueue(id, part(2), None, now).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn ack_requires_matching_key() {
        let mut q = OfflineQueue::in_memory();
        let id = WorkOrderId::new();
        q.enqueue(id, part(1), None, Utc::now()).unwrap();

        assert!(q.ack(id, &IdempotencyKey::generate()).unwrap().is_none());
        assert_eq!(q.len(), 1);

        let key = q.front(id).unwrap().idempotency_key.clone();
        assert!(q.ack(id, &key).unwrap().is_some());
        assert!(q.is_empty());
    }
}
