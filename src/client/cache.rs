//! Client-local job cache.
//!
//! Per work order the cache keeps two snapshots: `canonical`, the last state
//! the server confirmed, and `view`, which is canonical with every pending
//! queue entry applied on top. The view is never edited in place; it is
//! rebuilt from canonical plus the queue whenever either changes, so a
//! dropped or rejected mutation disappears from the view by construction.
//!
//! The inspection draft lives here too, with an explicit dirty flag, until
//! it is submitted through the queue.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::persist;
use super::queue::OfflineMutation;
use crate::error::Result;
use crate::line_items;
use crate::model::*;
use crate::timer;

/// Locally edited inspection not yet handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionDraft {
    pub submission: InspectionSubmission,
    /// Set on every local edit, cleared once the draft is queued.
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedJob {
    pub canonical: JobSnapshot,
    pub view: JobSnapshot,
    #[serde(default)]
    pub draft: Option<InspectionDraft>,
}

#[derive(Debug, Default)]
pub struct JobCache {
    path: Option<PathBuf>,
    jobs: BTreeMap<WorkOrderId, CachedJob>,
}

impl JobCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = persist::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            jobs,
        })
    }

    fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => persist::write_json_atomic(path, &self.jobs),
            None => Ok(()),
        }
    }

    pub fn get(&self, id: WorkOrderId) -> Option<&CachedJob> {
        self.jobs.get(&id)
    }

    /// The optimistic view shown to the mechanic.
    pub fn view(&self, id: WorkOrderId) -> Option<&JobSnapshot> {
        self.jobs.get(&id).map(|j| &j.view)
    }

    pub fn canonical(&self, id: WorkOrderId) -> Option<&JobSnapshot> {
        self.jobs.get(&id).map(|j| &j.canonical)
    }

    /// Replace canonical state with a server snapshot and rebuild the view
    /// from it plus `pending`.
    pub fn rebase<'a>(
        &mut self,
        canonical: JobSnapshot,
        pending: impl IntoIterator<Item = &'a OfflineMutation>,
    ) -> Result<()> {
        let id = canonical.work_order.id;
        let view = project(&canonical, pending);
        let draft = self.jobs.remove(&id).and_then(|j| j.draft);
        debug!(work_order = %id, version = canonical.version, "cache rebased");
        self.jobs.insert(
            id,
            CachedJob {
                canonical,
                view,
                draft,
            },
        );
        self.persist()
    }

    /// Fold an acknowledged mutation into canonical state, then rebuild the
    /// view from what is still pending.
    pub fn confirm<'a>(
        &mut self,
        id: WorkOrderId,
        mutation: &Mutation,
        response: &MutationResponse,
        pending: impl IntoIterator<Item = &'a OfflineMutation>,
    ) -> Result<()> {
        let Some(job) = self.jobs.get_mut(&id) else {
            return Ok(());
        };
        let canonical = &mut job.canonical;
        canonical.version = canonical.version.max(response.version);

        match (&response.ack, mutation) {
            (Ack::Timer { assignment }, _) => {
                canonical.assignment = Some(assignment.clone());
                refresh_status(canonical);
            }
            (Ack::Status { status }, _) => {
                canonical.work_order.status_override = Some(*status);
                canonical.status = canonical.status.max(*status);
                canonical.read_only = canonical.status == WorkOrderStatus::Completed;
            }
            (Ack::Details { work_order }, _) => {
                canonical.work_order = (**work_order).clone();
            }
            (Ack::Parts(outcome), Mutation::Parts(adjustment)) => {
                // Patch to the server's answer, whatever was asked for.
                let product = &adjustment.product_id;
                if outcome.deleted {
                    canonical.line_items.retain(|li| &li.product_id != product);
                } else if let Some(li) = canonical
                    .line_items
                    .iter_mut()
                    .find(|li| &li.product_id == product)
                {
                    li.qty = outcome.qty;
                } else {
                    canonical.line_items.push(LineItem {
                        work_order_id: id,
                        product_id: product.clone(),
                        qty: outcome.qty,
                        rate_cents: adjustment.rate_cents.unwrap_or(0),
                    });
                }
            }
            (Ack::Inspection { report, .. }, _) => {
                canonical.inspection = Some((**report).clone());
                if let Some(draft) = &mut job.draft {
                    draft.dirty = false;
                }
            }
            (ack, mutation) => {
                warn!(?ack, kind = %mutation.kind(), "ack does not match mutation");
            }
        }

        job.view = project(&job.canonical, pending);
        self.persist()
    }

    /// Rebuild the view after the queue changed without new server state:
    /// an entry was queued, collapsed, rejected or cancelled.
    pub fn reproject<'a>(
        &mut self,
        id: WorkOrderId,
        pending: impl IntoIterator<Item = &'a OfflineMutation>,
    ) -> Result<()> {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.view = project(&job.canonical, pending);
        }
        self.persist()
    }

    pub fn draft(&self, id: WorkOrderId) -> Option<&InspectionDraft> {
        self.jobs.get(&id).and_then(|j| j.draft.as_ref())
    }

    /// Store the current draft and mark it dirty. No-op for unknown jobs.
    pub fn save_draft(
        &mut self,
        id: WorkOrderId,
        submission: InspectionSubmission,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(job) = self.jobs.get_mut(&id) else {
            return Ok(false);
        };
        job.draft = Some(InspectionDraft {
            submission,
            dirty: true,
            updated_at: now,
        });
        self.persist()?;
        Ok(true)
    }

    /// Cleared when the draft is handed to the queue, set again if the
    /// server refuses it.
    pub fn set_draft_dirty(&mut self, id: WorkOrderId, dirty: bool) -> Result<()> {
        if let Some(draft) = self.jobs.get_mut(&id).and_then(|j| j.draft.as_mut()) {
            draft.dirty = dirty;
        }
        self.persist()
    }
}

/// Canonical state with `pending` applied in order.
fn project<'a>(
    canonical: &JobSnapshot,
    pending: impl IntoIterator<Item = &'a OfflineMutation>,
) -> JobSnapshot {
    let mut view = canonical.clone();
    for entry in pending {
        apply(&mut view, &entry.mutation);
    }
    view
}

/// Best-effort local effect of a mutation. Anything the local state machine
/// refuses is left out of the view; the server has the final word.
fn apply(view: &mut JobSnapshot, mutation: &Mutation) {
    match mutation {
        Mutation::Timer(cmd) => {
            let Some(current) = &view.assignment else {
                return;
            };
            let assignment = Assignment::from_view(view.work_order.id, current);
            let at = cmd.at.unwrap_or_else(Utc::now);
            match timer::transition(&assignment, cmd.action, at, cmd.reason.clone()) {
                Ok((next, _event)) => {
                    view.assignment = Some(next.view());
                    refresh_status(view);
                }
                Err(e) => debug!(error = %e, "timer action not applied locally"),
            }
        }
        Mutation::Status(cmd) => {
            view.work_order.status_override = Some(cmd.status);
            view.status = view.status.max(cmd.status);
            view.read_only = view.status == WorkOrderStatus::Completed;
        }
        Mutation::Details(patch) => {
            let wo = &mut view.work_order;
            macro_rules! set {
                ($($src:ident => $($dst:ident).+),* $(,)?) => {
                    $(if let Some(v) = &patch.$src {
                        wo.$($dst).+ = Some(v.clone());
                    })*
                };
            }
            set!(
                cause => cause,
                correction => correction,
                vehicle_ref => vehicle_ref,
                vin => vehicle.vin,
                mileage => vehicle.mileage,
                unit_no => vehicle.unit_no,
                make_model => vehicle.make_model,
            );
        }
        Mutation::Parts(adjustment) => {
            let id = view.work_order.id;
            let mut items: BTreeMap<ProductId, LineItem> = view
                .line_items
                .drain(..)
                .map(|li| (li.product_id.clone(), li))
                .collect();
            if let Err(e) = line_items::adjust(id, &mut items, adjustment) {
                debug!(error = %e, "part change not applied locally");
            }
            view.line_items = items.into_values().collect();
        }
        // The draft holds the local copy; the stored report only changes on
        // acknowledgement.
        Mutation::Inspection(_) => {}
    }
}

/// Move the coarse status forward to match the viewer's own clock.
fn refresh_status(view: &mut JobSnapshot) {
    let own = match view.assignment.as_ref().map(|a| a.state) {
        Some(TimerState::Completed) => WorkOrderStatus::Completed,
        Some(state) if state.is_active() => WorkOrderStatus::InProgress,
        _ => WorkOrderStatus::Idle,
    };
    view.status = view.status.max(own);
    view.read_only = view.status == WorkOrderStatus::Completed;
}
