//! Queue replay.
//!
//! Drains each work order's queue strictly in order. The front entry is
//! sent and, depending on the answer, acknowledged, rebased and resent,
//! dropped, or left in place with a backoff deadline. A deferred front
//! entry blocks everything behind it: later timer events must not overtake
//! earlier ones.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::queue::OfflineMutation;
use super::transport::{SendOutcome, Transport};
use super::FieldClient;
use crate::error::{Error, Result};
use crate::model::{Mutation, WorkOrderId};
use crate::telemetry::metrics;

/// An entry the server refused and the queue dropped.
#[derive(Debug)]
pub struct Rejection {
    pub entry: OfflineMutation,
    pub error: Error,
}

/// What one drain pass did.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub acked: usize,
    pub rebased: usize,
    pub deferred: usize,
    pub rejected: Vec<Rejection>,
}

impl ReplayReport {
    pub fn merge(&mut self, other: ReplayReport) {
        self.acked += other.acked;
        self.rebased += other.rebased;
        self.deferred += other.deferred;
        self.rejected.extend(other.rejected);
    }

    /// Nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.acked == 0 && self.rebased == 0 && self.deferred == 0 && self.rejected.is_empty()
    }
}

fn record(outcome: &'static str) {
    metrics::replay_outcomes().add(1, &[KeyValue::new("outcome", outcome)]);
}

impl<T: Transport> FieldClient<T> {
    /// Drain every work order with pending entries.
    pub async fn sync(&mut self) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        for id in self.queue.work_orders() {
            report.merge(self.drain(id).await?);
        }
        Ok(report)
    }

    /// Send one work order's queue until it is empty or an entry has to
    /// wait.
    pub async fn drain(&mut self, id: WorkOrderId) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        while let Some(entry) = self.queue.front(id).cloned() {
            let now = self.now();
            if !entry.is_due(now) {
                debug!(local_id = %entry.local_id, not_before = ?entry.not_before, "entry backing off");
                report.deferred += 1;
                break;
            }

            match self.transport.send(&entry).await {
                SendOutcome::Acked(response) => {
                    self.queue.ack(id, &entry.idempotency_key)?;
                    self.cache
                        .confirm(id, &entry.mutation, &response, self.queue.pending(id))?;
                    debug!(
                        local_id = %entry.local_id,
                        kind = %entry.kind(),
                        version = response.version,
                        replayed = response.replayed,
                        "mutation acknowledged"
                    );
                    record("acked");
                    report.acked += 1;
                }
                SendOutcome::Conflict(current) => {
                    let version = current.version;
                    if entry.conflicts >= self.options.max_conflict_retries {
                        warn!(
                            local_id = %entry.local_id,
                            conflicts = entry.conflicts,
                            "giving up on mutation after repeated conflicts"
                        );
                        self.queue.reject(id)?;
                        self.cache.rebase((*current).clone(), self.queue.pending(id))?;
                        record("dropped");
                        report.rejected.push(Rejection {
                            entry,
                            error: Error::Conflict(current),
                        });
                        continue;
                    }
                    info!(local_id = %entry.local_id, version, "conflict, rebasing");
                    self.cache.rebase(*current, self.queue.pending(id))?;
                    self.queue.rebase_front(id, version)?;
                    record("rebased");
                    report.rebased += 1;
                }
                SendOutcome::Rejected(error) => {
                    warn!(local_id = %entry.local_id, kind = %entry.kind(), error = %error, "mutation rejected");
                    self.queue.reject(id)?;
                    // The refusal may stem from state this client has not
                    // seen yet, such as a collaborator completing the job.
                    let refreshed = self.refresh(id).await.map(|_| ());
                    if let Err(e) = refreshed {
                        debug!(error = %e, "refetch after rejection failed");
                        self.cache.reproject(id, self.queue.pending(id))?;
                    }
                    if matches!(entry.mutation, Mutation::Inspection(_)) {
                        self.cache.set_draft_dirty(id, true)?;
                    }
                    record("dropped");
                    report.rejected.push(Rejection { entry, error });
                }
                SendOutcome::Network(reason) => {
                    let delay = self.options.backoff.delay(entry.attempts + 1);
                    let not_before = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::hours(1));
                    info!(
                        local_id = %entry.local_id,
                        attempts = entry.attempts + 1,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "send failed, backing off"
                    );
                    self.queue.defer(id, not_before)?;
                    record("deferred");
                    report.deferred += 1;
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Drain all queues every `interval` until `shutdown` is notified.
    pub async fn run(&mut self, interval: Duration, shutdown: Arc<Notify>) -> Result<()> {
        info!(interval_ms = interval.as_millis() as u64, "replay loop started");
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("replay loop shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match self.sync().await {
                Ok(report) if !report.is_empty() => info!(
                    acked = report.acked,
                    rebased = report.rebased,
                    deferred = report.deferred,
                    rejected = report.rejected.len(),
                    "replay pass"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "replay pass failed"),
            }
        }
    }
}
