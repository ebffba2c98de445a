//! Sync controller: the server-side arbiter for every mutation.
//!
//! All mutations for one work order are serialized here. Each request is
//! authorized from its bearer token, checked against idempotency receipts,
//! applied to a fresh read of the job, and committed with a version
//! compare-and-swap. No lock is held across a client round trip: read,
//! validate, write and release happen inside one call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use tokio::sync::OwnedMutexGuard;
use tracing::{Instrument, debug, info, warn};

use crate::collab;
use crate::error::{Error, Result, ValidationError};
use crate::inspection;
use crate::line_items;
use crate::model::*;
use crate::store::{AssignmentRef, Commit, CommitOutcome, Receipt, Store};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_timer_transition, start_mutation_span};
use crate::timer;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type LockMap = Mutex<HashMap<WorkOrderId, Arc<tokio::sync::Mutex<()>>>>;

/// Tunables for the sync controller.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far in the future a client timestamp may be before it is refused.
    pub max_clock_skew: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: Duration::minutes(5),
        }
    }
}

/// Applies mutations to jobs held in a [`Store`].
pub struct SyncController<S> {
    store: Arc<S>,
    config: SyncConfig,
    clock: Clock,
    locks: LockMap,
}

/// Held writer lock for one work order. The map entry is removed on drop
/// once no other task holds or awaits it.
struct WriterLock<'a> {
    locks: &'a LockMap,
    id: WorkOrderId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriterLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl<S: Store> SyncController<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(Utc::now),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the wall clock, for deterministic tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Per-work-order writer lock. Serializes writers within this process;
    /// the version check on commit covers writers in other processes.
    async fn writer_lock(&self, id: WorkOrderId) -> WriterLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        WriterLock {
            locks: &self.locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Open a new work order with no assignments.
    pub async fn create_job(&self, new: NewWorkOrder) -> Result<Job> {
        let job = Job::new(new.into_work_order(self.now()));
        self.store.create(&job).await?;
        info!(work_order = %job.id(), "work order created");
        Ok(job)
    }

    /// Attach a mechanic to a work order. One assignment per mechanic.
    pub async fn assign(
        &self,
        id: WorkOrderId,
        mechanic_id: &str,
        mechanic_name: &str,
    ) -> Result<Assignment> {
        let _writer = self.writer_lock(id).await;

        let job = self.load(id).await?;
        if job.assignments.iter().any(|a| a.mechanic_id == mechanic_id) {
            return Err(Error::Other(format!(
                "mechanic {mechanic_id} is already assigned to work order {id}"
            )));
        }

        let assignment = Assignment::new(id, mechanic_id, mechanic_name);
        let mut next = job.clone();
        next.assignments.push(assignment.clone());
        self.bump(&mut next);

        match self.store.commit(plain_commit(next, job.version())).await? {
            CommitOutcome::Committed => {
                info!(work_order = %id, mechanic = mechanic_id, "mechanic assigned");
                Ok(assignment)
            }
            CommitOutcome::Stale => Err(self.conflict(id, None).await),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Map a token to its assignment and check it belongs to work order `id`.
    /// Client-supplied mechanic ids are never consulted.
    pub async fn authorize(&self, token: &str, id: WorkOrderId) -> Result<AssignmentRef> {
        let who = self
            .store
            .resolve_token(token)
            .await?
            .ok_or_else(|| Error::PermissionDenied("unknown token".to_string()))?;
        if who.work_order_id != id {
            return Err(Error::PermissionDenied(format!(
                "token is not assigned to work order {id}"
            )));
        }
        Ok(who)
    }

    /// Full canonical state of a job as seen by the token's assignment.
    pub async fn job(&self, token: &str, id: WorkOrderId) -> Result<JobSnapshot> {
        let who = self.authorize(token, id).await?;
        let job = self.load(id).await?;
        Ok(collab::snapshot(&job, Some(who.assignment_id)))
    }

    async fn load(&self, id: WorkOrderId) -> Result<Job> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work order {id}")))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Apply one mutation on behalf of the token's assignment.
    pub async fn apply(
        &self,
        token: &str,
        id: WorkOrderId,
        request: MutationRequest,
    ) -> Result<MutationResponse> {
        let who = self.authorize(token, id).await?;
        let kind = request.mutation.kind();
        let span = start_mutation_span(&kind.to_string(), &id.0);
        let started = std::time::Instant::now();

        let result = self.apply_serialized(who, request).instrument(span).await;

        let outcome = match &result {
            Ok(resp) if resp.replayed => "replayed",
            Ok(_) => "ok",
            Err(Error::Conflict(_)) => "conflict",
            Err(e) if e.class() == crate::error::ErrorClass::Fatal => "error",
            Err(_) => "rejected",
        };
        metrics::mutations_applied().add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", format!("mutation.{kind}"))],
        );
        result
    }

    async fn apply_serialized(
        &self,
        who: AssignmentRef,
        request: MutationRequest,
    ) -> Result<MutationResponse> {
        let id = who.work_order_id;
        let _writer = self.writer_lock(id).await;

        if let Some(key) = &request.idempotency_key {
            if let Some(receipt) = self.store.receipt(id, who.assignment_id, key).await? {
                debug!(key = %key, "replayed mutation served from receipt");
                return Ok(MutationResponse {
                    replayed: true,
                    ..receipt.response
                });
            }
        }

        let job = self.load(id).await?;
        if let Some(expected) = request.expected_version {
            if expected != job.version() {
                warn!(expected, actual = job.version(), "stale base version");
                return Err(self.conflict_from(&job, Some(who.assignment_id)));
            }
        }

        let now = self.now();
        let mut next = job.clone();
        let (ack, new_events) =
            self.apply_mutation(&mut next, who.assignment_id, request.mutation, now)?;
        self.bump(&mut next);

        let response = MutationResponse {
            version: next.version(),
            replayed: false,
            ack,
        };
        let receipt = request.idempotency_key.map(|key| Receipt {
            assignment_id: who.assignment_id,
            key,
            response: response.clone(),
            created_at: now,
        });

        let commit = Commit {
            job: next,
            expected_version: job.version(),
            new_events,
            receipt,
        };
        match self.store.commit(commit).await? {
            CommitOutcome::Committed => Ok(response),
            CommitOutcome::Stale => Err(self.conflict(id, Some(who.assignment_id)).await),
        }
    }

    fn apply_mutation(
        &self,
        job: &mut Job,
        assignment_id: AssignmentId,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Result<(Ack, Vec<TimerEvent>)> {
        match mutation {
            Mutation::Timer(cmd) => self.apply_timer(job, assignment_id, cmd, now),
            Mutation::Status(cmd) => {
                ensure_editable(job)?;
                job.work_order.status_override = Some(cmd.status);
                let status = collab::effective_status(job);
                info!(requested = %cmd.status, effective = %status, "status override");
                Ok((Ack::Status { status }, vec![]))
            }
            Mutation::Details(patch) => {
                ensure_editable(job)?;
                self.apply_details(&mut job.work_order, patch, now)?;
                Ok((
                    Ack::Details {
                        work_order: Box::new(job.work_order.clone()),
                    },
                    vec![],
                ))
            }
            Mutation::Parts(adjustment) => {
                ensure_editable(job)?;
                let outcome = line_items::adjust(job.id(), &mut job.line_items, &adjustment)?;
                if outcome.deleted {
                    metrics::line_items_deleted().add(1, &[]);
                }
                debug!(product = %adjustment.product_id, qty = outcome.qty, deleted = outcome.deleted, "line item reconciled");
                Ok((Ack::Parts(outcome), vec![]))
            }
            Mutation::Inspection(submission) => {
                let inspection_id = inspection::upsert(job, submission, now)?;
                metrics::inspections_submitted().add(1, &[]);
                info!(inspection = %inspection_id, "inspection stored");
                let report = job
                    .inspection
                    .clone()
                    .ok_or_else(|| Error::Other("inspection missing after upsert".to_string()))?;
                Ok((
                    Ack::Inspection {
                        inspection_id,
                        report: Box::new(report),
                    },
                    vec![],
                ))
            }
        }
    }

    fn apply_timer(
        &self,
        job: &mut Job,
        assignment_id: AssignmentId,
        cmd: TimerCommand,
        now: DateTime<Utc>,
    ) -> Result<(Ack, Vec<TimerEvent>)> {
        let at = cmd.at.unwrap_or(now);
        self.check_skew("at", at, now)?;

        let current = job
            .assignment(assignment_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))?;

        // Actions stamped before the first completion are late reports of
        // work done while the job was open; they go through the replay below.
        let after_freeze = collab::frozen_at(job).is_none_or(|frozen| at > frozen);
        if collab::is_read_only(job) && after_freeze && cmd.action != TimerAction::Complete {
            return Err(Error::transition(
                format!("{} (work order completed)", current.state),
                cmd.action,
            ));
        }

        let mut event = TimerEvent::new(assignment_id, cmd.action, at, cmd.reason);
        event.recorded_at = now;

        if job
            .events_for(assignment_id)
            .any(|e| e.same_occurrence(&event))
        {
            debug!(action = %cmd.action, %at, "timer action already recorded");
            return Ok((Ack::Timer { assignment: current.view() }, vec![]));
        }

        let in_order = job.events_for(assignment_id).all(|e| e.timestamp <= at);
        let next = if in_order {
            timer::apply_event(&current, &event)?
        } else {
            // Late arrival: slot it in by timestamp and recompute.
            let mut events: Vec<TimerEvent> = job.events_for(assignment_id).cloned().collect();
            events.push(event.clone());
            debug!(action = %cmd.action, %at, "out-of-order timer action, replaying");
            timer::replay(&current, &events)?
        };

        record_timer_transition(
            &tracing::Span::current(),
            &current.state.to_string(),
            &next.state.to_string(),
        );
        metrics::timer_transitions().add(
            1,
            &[
                KeyValue::new("from", current.state.to_string()),
                KeyValue::new("to", next.state.to_string()),
            ],
        );

        let view = next.view();
        if let Some(slot) = job.assignment_mut(assignment_id) {
            *slot = next;
        }
        job.events.push(event.clone());
        debug!(counts = ?collab::state_counts(&job.assignments), "assignment states");

        Ok((Ack::Timer { assignment: view }, vec![event]))
    }

    /// Per-field last-write-wins: a field is only overwritten by an edit at
    /// least as recent as the one that last set it.
    fn apply_details(
        &self,
        work_order: &mut WorkOrder,
        patch: DetailsPatch,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if patch.is_empty() {
            return Err(ValidationError::single("details", "no fields to update").into());
        }
        let edited_at = patch.edited_at.unwrap_or(now);
        self.check_skew("edited_at", edited_at, now)?;

        let mut applied = Vec::new();
        for field in patch.fields() {
            let newer = work_order
                .field_stamps
                .get(&field)
                .is_none_or(|stamp| *stamp <= edited_at);
            if !newer {
                continue;
            }
            match field {
                DetailField::Cause => work_order.cause = patch.cause.clone(),
                DetailField::Correction => work_order.correction = patch.correction.clone(),
                DetailField::VehicleRef => work_order.vehicle_ref = patch.vehicle_ref.clone(),
                DetailField::Vin => work_order.vehicle.vin = patch.vin.clone(),
                DetailField::Mileage => work_order.vehicle.mileage = patch.mileage,
                DetailField::UnitNo => work_order.vehicle.unit_no = patch.unit_no.clone(),
                DetailField::MakeModel => work_order.vehicle.make_model = patch.make_model.clone(),
            }
            work_order.field_stamps.insert(field, edited_at);
            applied.push(field);
        }
        debug!(?applied, "details patched");
        Ok(())
    }

    fn check_skew(&self, field: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if at > now + self.config.max_clock_skew {
            return Err(ValidationError::single(field, "timestamp is in the future").into());
        }
        Ok(())
    }

    fn bump(&self, job: &mut Job) {
        job.work_order.version += 1;
        job.work_order.updated_at = self.now();
    }

    async fn conflict(&self, id: WorkOrderId, viewer: Option<AssignmentId>) -> Error {
        match self.load(id).await {
            Ok(current) => self.conflict_from(&current, viewer),
            Err(e) => e,
        }
    }

    fn conflict_from(&self, current: &Job, viewer: Option<AssignmentId>) -> Error {
        metrics::sync_conflicts().add(1, &[]);
        Error::Conflict(Box::new(collab::snapshot(current, viewer)))
    }
}

fn ensure_editable(job: &Job) -> Result<()> {
    if collab::is_read_only(job) {
        return Err(Error::PermissionDenied(format!(
            "work order {} is completed and read-only",
            job.id()
        )));
    }
    Ok(())
}

fn plain_commit(job: Job, expected_version: u64) -> Commit {
    Commit {
        job,
        expected_version,
        new_events: vec![],
        receipt: None,
    }
}
