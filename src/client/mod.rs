//! Field client: the mechanic's side of the sync protocol.
//!
//! Every intent goes through the same path. It is checked against the
//! local view, appended to the [`OfflineQueue`], projected into the
//! [`JobCache`] view, and then the queue for that work order is drained
//! through the [`Transport`]. When the network is down the intent stays
//! queued and the view already shows it.

mod persist;

pub mod cache;
pub mod queue;
pub mod replay;
pub mod transport;

pub use cache::{CachedJob, InspectionDraft, JobCache};
pub use queue::{OfflineMutation, OfflineQueue};
pub use replay::{Rejection, ReplayReport};
pub use transport::{HttpTransport, InProcessTransport, SendOutcome, Transport};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{BackoffConfig, ClientConfig};
use crate::error::{Error, Result, ValidationError};
use crate::inspection;
use crate::model::*;
use crate::timer;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Replay tunables.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub backoff: BackoffConfig,
    /// Conflicts an entry may absorb before it is dropped.
    pub max_conflict_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_conflict_retries: 3,
        }
    }
}

pub struct FieldClient<T> {
    transport: T,
    queue: OfflineQueue,
    cache: JobCache,
    options: ClientOptions,
    clock: Clock,
}

impl<T: Transport> FieldClient<T> {
    pub fn new(transport: T, queue: OfflineQueue, cache: JobCache, options: ClientOptions) -> Self {
        Self {
            transport,
            queue,
            cache,
            options,
            clock: Arc::new(Utc::now),
        }
    }

    /// Open the queue and cache files under `config.state_dir`.
    pub fn open(config: &ClientConfig, transport: T) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        let queue = OfflineQueue::open(config.state_dir.join("queue.json"))?;
        let cache = JobCache::open(config.state_dir.join("cache.json"))?;
        let options = ClientOptions {
            backoff: config.backoff.clone(),
            max_conflict_retries: config.max_conflict_retries,
        };
        Ok(Self::new(transport, queue, cache, options))
    }

    /// Replace the wall clock, for deterministic tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The optimistic view of a cached job.
    pub fn view(&self, id: WorkOrderId) -> Option<&JobSnapshot> {
        self.cache.view(id)
    }

    /// Pending entries for a work order, oldest first.
    pub fn pending(&self, id: WorkOrderId) -> Vec<OfflineMutation> {
        self.queue.pending(id).cloned().collect()
    }

    /// Fetch canonical state and rebase the local view onto it.
    pub async fn refresh(&mut self, id: WorkOrderId) -> Result<&JobSnapshot> {
        let snapshot = self.transport.fetch(id).await?;
        self.cache.rebase(snapshot, self.queue.pending(id))?;
        self.cache
            .view(id)
            .ok_or_else(|| Error::NotFound(format!("work order {id}")))
    }

    fn cached_view(&self, id: WorkOrderId) -> Result<&JobSnapshot> {
        self.cache
            .view(id)
            .ok_or_else(|| Error::NotFound(format!("work order {id} is not cached")))
    }

    fn ensure_editable(&self, id: WorkOrderId) -> Result<&JobSnapshot> {
        let view = self.cached_view(id)?;
        if view.read_only {
            return Err(Error::PermissionDenied(format!(
                "work order {id} is completed and read-only"
            )));
        }
        Ok(view)
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Start, pause, resume, depart, arrive or complete the mechanic's timer.
    ///
    /// The transition is checked locally first and stamped with the local
    /// clock, so a replay hours later still records when it happened.
    pub async fn timer(
        &mut self,
        id: WorkOrderId,
        action: TimerAction,
        reason: Option<String>,
    ) -> Result<ReplayReport> {
        let now = self.now();
        let view = self.cached_view(id)?;
        let current = view.assignment.as_ref().ok_or_else(|| {
            Error::PermissionDenied(format!("not assigned to work order {id}"))
        })?;
        if view.read_only && action != TimerAction::Complete {
            return Err(Error::transition(
                format!("{} (work order completed)", current.state),
                action,
            ));
        }
        timer::transition(&Assignment::from_view(id, current), action, now, reason.clone())?;

        let command = TimerCommand {
            action,
            reason,
            at: Some(now),
        };
        self.submit(id, Mutation::Timer(command), None).await
    }

    /// Override the work order status. The effective status never moves
    /// backward.
    pub async fn set_status(
        &mut self,
        id: WorkOrderId,
        status: WorkOrderStatus,
    ) -> Result<ReplayReport> {
        self.ensure_editable(id)?;
        self.submit(id, Mutation::Status(StatusCommand { status }), None)
            .await
    }

    /// Edit descriptive fields. The patch is stamped with the local clock and
    /// sent against the version it was made on.
    pub async fn edit_details(
        &mut self,
        id: WorkOrderId,
        mut patch: DetailsPatch,
    ) -> Result<ReplayReport> {
        if patch.is_empty() {
            return Err(ValidationError::single("details", "no fields to update").into());
        }
        let base = self.ensure_editable(id)?.version;
        patch.edited_at.get_or_insert_with(|| self.now());
        self.submit(id, Mutation::Details(patch), Some(base)).await
    }

    /// Change a part quantity.
    ///
    /// Whatever the caller asks for, the queued mutation carries the target
    /// quantity computed from the view, so resending it is harmless and two
    /// queued decrements of the same part collapse into one absolute value.
    pub async fn adjust_part(
        &mut self,
        id: WorkOrderId,
        product_id: ProductId,
        change: QtyChange,
        rate_cents: Option<i64>,
    ) -> Result<ReplayReport> {
        let view = self.ensure_editable(id)?;
        let current = view.line_item(&product_id).map_or(0, |li| li.qty);
        let target = match change {
            QtyChange::Delta(delta) => {
                let next = i64::from(current).saturating_add(delta);
                u32::try_from(next.max(0)).unwrap_or(u32::MAX)
            }
            QtyChange::Target(target) => target,
            QtyChange::Clear => 0,
        };
        debug!(product = %product_id, current, target, "part change");
        let adjustment = PartAdjustment {
            product_id,
            change: QtyChange::Target(target),
            rate_cents,
        };
        self.submit(id, Mutation::Parts(adjustment), None).await
    }

    /// Keep a local inspection draft. Nothing is sent.
    pub fn save_inspection_draft(
        &mut self,
        id: WorkOrderId,
        submission: InspectionSubmission,
    ) -> Result<()> {
        let now = self.now();
        if self.cache.save_draft(id, submission, now)? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("work order {id} is not cached")))
        }
    }

    /// Validate the saved draft and queue it for submission. An invalid
    /// draft stays local with every issue reported.
    pub async fn submit_inspection(&mut self, id: WorkOrderId) -> Result<ReplayReport> {
        let draft = self
            .cache
            .draft(id)
            .ok_or_else(|| Error::NotFound(format!("no inspection draft for work order {id}")))?;
        inspection::validate(&draft.submission)?;
        let submission = draft.submission.clone();
        self.cache.set_draft_dirty(id, false)?;
        self.submit(id, Mutation::Inspection(submission), None).await
    }

    /// Withdraw a queued entry that has not been acknowledged and drop it
    /// from the view.
    pub fn cancel(&mut self, local_id: uuid::Uuid) -> Result<Option<OfflineMutation>> {
        let cancelled = self.queue.cancel(local_id)?;
        if let Some(entry) = &cancelled {
            self.cache
                .reproject(entry.work_order_id, self.queue.pending(entry.work_order_id))?;
        }
        Ok(cancelled)
    }

    async fn submit(
        &mut self,
        id: WorkOrderId,
        mutation: Mutation,
        base_version: Option<u64>,
    ) -> Result<ReplayReport> {
        let now = self.now();
        self.queue.enqueue(id, mutation, base_version, now)?;
        self.cache.reproject(id, self.queue.pending(id))?;
        self.drain(id).await
    }
}
