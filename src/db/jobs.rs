//! Job aggregate persistence: load, create, and compare-and-swap commit.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{AssignmentRef, Commit, CommitOutcome, Receipt, Store};

impl Store for super::Db {
    async fn resolve_token(&self, token: &str) -> Result<Option<AssignmentRef>> {
        let row: Option<(Uuid, Uuid)> =
            sqlx::query_as("SELECT work_order_id, id FROM assignments WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(work_order_id, assignment_id)| AssignmentRef {
            work_order_id: WorkOrderId(work_order_id),
            assignment_id: AssignmentId(assignment_id),
        }))
    }

    async fn load(&self, id: WorkOrderId) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        // One snapshot for all five reads.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let row: Option<WorkOrderRow> = sqlx::query_as(
            "SELECT id, customer_ref, vehicle_ref, description, cause, correction, vehicle,
                    status_override, field_stamps, version, created_at, updated_at
             FROM work_orders WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = Job::new(row.try_into_work_order()?);

        let assignments: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT id, work_order_id, mechanic_id, mechanic_name, token, submitted, state,
                    started_at, paused_at, resumed_at, departed_at, arrived_at, ended_at,
                    pause_reason, total_paused_seconds, total_travel_seconds
             FROM assignments WHERE work_order_id = $1 ORDER BY mechanic_id",
        )
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?;
        job.assignments = assignments
            .into_iter()
            .map(AssignmentRow::try_into_assignment)
            .collect::<Result<_>>()?;

        let events: Vec<EventRow> = sqlx::query_as(
            "SELECT e.id, e.assignment_id, e.action, e.occurred_at, e.reason, e.recorded_at
             FROM timer_events e JOIN assignments a ON a.id = e.assignment_id
             WHERE a.work_order_id = $1
             ORDER BY e.occurred_at, e.recorded_at",
        )
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?;
        job.events = events
            .into_iter()
            .map(EventRow::try_into_event)
            .collect::<Result<_>>()?;

        let line_items: Vec<LineItemRow> = sqlx::query_as(
            "SELECT work_order_id, product_id, qty, rate_cents
             FROM line_items WHERE work_order_id = $1",
        )
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?;
        for row in line_items {
            let item = row.try_into_line_item()?;
            job.line_items.insert(item.product_id.clone(), item);
        }

        let inspection: Option<InspectionRow> = sqlx::query_as(
            "SELECT id, work_order_id, business, vehicle, checklist, pushrod_stroke, tread_depth,
                    additional_notes, inspector_name, inspection_date, submitted_at
             FROM pm_inspections WHERE work_order_id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;
        job.inspection = inspection.map(InspectionRow::into_inspection);

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn receipt(
        &self,
        id: WorkOrderId,
        assignment_id: AssignmentId,
        key: &IdempotencyKey,
    ) -> Result<Option<Receipt>> {
        let row: Option<(String, Json<MutationResponse>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT idempotency_key, response, created_at
             FROM mutation_receipts
             WHERE work_order_id = $1 AND assignment_id = $2 AND idempotency_key = $3",
        )
        .bind(id.0)
        .bind(assignment_id.0)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(key, response, created_at)| Receipt {
            assignment_id,
            key: IdempotencyKey(key),
            response: response.0,
            created_at,
        }))
    }

    async fn create(&self, job: &Job) -> Result<()> {
        let wo = &job.work_order;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO work_orders (id, customer_ref, vehicle_ref, description, cause, correction,
                                      vehicle, status_override, field_stamps, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(wo.id.0)
        .bind(&wo.customer_ref)
        .bind(&wo.vehicle_ref)
        .bind(&wo.description)
        .bind(&wo.cause)
        .bind(&wo.correction)
        .bind(Json(&wo.vehicle))
        .bind(wo.status_override.map(|s| s.to_string()))
        .bind(Json(&wo.field_stamps))
        .bind(wo.version as i64)
        .bind(wo.created_at)
        .bind(wo.updated_at)
        .execute(&mut *tx)
        .await?;

        for assignment in &job.assignments {
            upsert_assignment(&mut tx, assignment).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn commit(&self, commit: Commit) -> Result<CommitOutcome> {
        let Commit {
            job,
            expected_version,
            new_events,
            receipt,
        } = commit;
        let wo = &job.work_order;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE work_orders
             SET vehicle_ref = $2, cause = $3, correction = $4, vehicle = $5,
                 status_override = $6, field_stamps = $7, version = $8, updated_at = $9
             WHERE id = $1 AND version = $10",
        )
        .bind(wo.id.0)
        .bind(&wo.vehicle_ref)
        .bind(&wo.cause)
        .bind(&wo.correction)
        .bind(Json(&wo.vehicle))
        .bind(wo.status_override.map(|s| s.to_string()))
        .bind(Json(&wo.field_stamps))
        .bind(wo.version as i64)
        .bind(wo.updated_at)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Stale);
        }

        for assignment in &job.assignments {
            upsert_assignment(&mut tx, assignment).await?;
        }

        for event in &new_events {
            sqlx::query(
                "INSERT INTO timer_events (id, assignment_id, action, occurred_at, reason, recorded_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(event.id)
            .bind(event.assignment_id.0)
            .bind(event.action.to_string())
            .bind(event.timestamp)
            .bind(&event.reason)
            .bind(event.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        sync_line_items(&mut tx, &job).await?;

        if let Some(inspection) = &job.inspection {
            upsert_inspection(&mut tx, inspection).await?;
        }

        if let Some(receipt) = &receipt {
            sqlx::query(
                "INSERT INTO mutation_receipts
                     (work_order_id, assignment_id, idempotency_key, response, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(wo.id.0)
            .bind(receipt.assignment_id.0)
            .bind(receipt.key.as_str())
            .bind(Json(&receipt.response))
            .bind(receipt.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn health_check(&self) -> Result<()> {
        super::Db::health_check(self).await
    }
}

async fn upsert_assignment(conn: &mut PgConnection, a: &Assignment) -> Result<()> {
    sqlx::query(
        "INSERT INTO assignments (id, work_order_id, mechanic_id, mechanic_name, token, submitted, state,
                                  started_at, paused_at, resumed_at, departed_at, arrived_at, ended_at,
                                  pause_reason, total_paused_seconds, total_travel_seconds)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
         ON CONFLICT (id) DO UPDATE SET
             submitted = EXCLUDED.submitted,
             state = EXCLUDED.state,
             started_at = EXCLUDED.started_at,
             paused_at = EXCLUDED.paused_at,
             resumed_at = EXCLUDED.resumed_at,
             departed_at = EXCLUDED.departed_at,
             arrived_at = EXCLUDED.arrived_at,
             ended_at = EXCLUDED.ended_at,
             pause_reason = EXCLUDED.pause_reason,
             total_paused_seconds = EXCLUDED.total_paused_seconds,
             total_travel_seconds = EXCLUDED.total_travel_seconds",
    )
    .bind(a.id.0)
    .bind(a.work_order_id.0)
    .bind(&a.mechanic_id)
    .bind(&a.mechanic_name)
    .bind(a.token.as_str())
    .bind(a.submitted)
    .bind(a.state.to_string())
    .bind(a.stamps.started_at)
    .bind(a.stamps.paused_at)
    .bind(a.stamps.resumed_at)
    .bind(a.stamps.departed_at)
    .bind(a.stamps.arrived_at)
    .bind(a.stamps.ended_at)
    .bind(&a.pause_reason)
    .bind(a.total_paused_seconds)
    .bind(a.total_travel_seconds)
    .execute(conn)
    .await?;
    Ok(())
}

/// Make the stored rows match `job.line_items` exactly. Rows missing from
/// the map are deleted, so a zero quantity is never written.
async fn sync_line_items(conn: &mut PgConnection, job: &Job) -> Result<()> {
    let keep: Vec<String> = job.line_items.keys().map(|p| p.0.clone()).collect();
    let deleted = sqlx::query(
        "DELETE FROM line_items WHERE work_order_id = $1 AND product_id <> ALL($2)",
    )
    .bind(job.id().0)
    .bind(&keep)
    .execute(&mut *conn)
    .await?;
    if deleted.rows_affected() > 0 {
        tracing::debug!(work_order = %job.id(), rows = deleted.rows_affected(), "line items deleted");
    }

    for item in job.line_items.values() {
        sqlx::query(
            "INSERT INTO line_items (work_order_id, product_id, qty, rate_cents)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (work_order_id, product_id)
             DO UPDATE SET qty = EXCLUDED.qty, rate_cents = EXCLUDED.rate_cents",
        )
        .bind(item.work_order_id.0)
        .bind(&item.product_id.0)
        .bind(i64::from(item.qty))
        .bind(item.rate_cents)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Keyed on `work_order_id`: a second submission overwrites every column of
/// the existing row and keeps its id.
async fn upsert_inspection(conn: &mut PgConnection, inspection: &PmInspection) -> Result<()> {
    sqlx::query(
        "INSERT INTO pm_inspections (id, work_order_id, business, vehicle, checklist, pushrod_stroke,
                                     tread_depth, additional_notes, inspector_name, inspection_date, submitted_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (work_order_id) DO UPDATE SET
             business = EXCLUDED.business,
             vehicle = EXCLUDED.vehicle,
             checklist = EXCLUDED.checklist,
             pushrod_stroke = EXCLUDED.pushrod_stroke,
             tread_depth = EXCLUDED.tread_depth,
             additional_notes = EXCLUDED.additional_notes,
             inspector_name = EXCLUDED.inspector_name,
             inspection_date = EXCLUDED.inspection_date,
             submitted_at = EXCLUDED.submitted_at",
    )
    .bind(inspection.id.0)
    .bind(inspection.work_order_id.0)
    .bind(Json(&inspection.business))
    .bind(Json(&inspection.vehicle))
    .bind(Json(&inspection.checklist))
    .bind(Json(&inspection.pushrod_stroke))
    .bind(Json(&inspection.tread_depth))
    .bind(&inspection.additional_notes)
    .bind(&inspection.inspector_name)
    .bind(inspection.inspection_date)
    .bind(inspection.submitted_at)
    .execute(conn)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct WorkOrderRow {
    id: Uuid,
    customer_ref: String,
    vehicle_ref: Option<String>,
    description: String,
    cause: Option<String>,
    correction: Option<String>,
    vehicle: Json<VehicleSnapshot>,
    status_override: Option<String>,
    field_stamps: Json<BTreeMap<DetailField, DateTime<Utc>>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkOrderRow {
    fn try_into_work_order(self) -> Result<WorkOrder> {
        Ok(WorkOrder {
            id: WorkOrderId(self.id),
            customer_ref: self.customer_ref,
            vehicle_ref: self.vehicle_ref,
            description: self.description,
            cause: self.cause,
            correction: self.correction,
            vehicle: self.vehicle.0,
            status_override: self
                .status_override
                .map(|s| s.parse::<WorkOrderStatus>())
                .transpose()?,
            field_stamps: self.field_stamps.0,
            version: self.version as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: Uuid,
    work_order_id: Uuid,
    mechanic_id: String,
    mechanic_name: String,
    token: String,
    submitted: bool,
    state: String,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    resumed_at: Option<DateTime<Utc>>,
    departed_at: Option<DateTime<Utc>>,
    arrived_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    pause_reason: Option<String>,
    total_paused_seconds: i64,
    total_travel_seconds: i64,
}

impl AssignmentRow {
    fn try_into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: AssignmentId(self.id),
            work_order_id: WorkOrderId(self.work_order_id),
            mechanic_id: self.mechanic_id,
            mechanic_name: self.mechanic_name,
            token: AssignmentToken::from(self.token),
            submitted: self.submitted,
            state: self.state.parse()?,
            stamps: TimerStamps {
                started_at: self.started_at,
                paused_at: self.paused_at,
                resumed_at: self.resumed_at,
                departed_at: self.departed_at,
                arrived_at: self.arrived_at,
                ended_at: self.ended_at,
            },
            pause_reason: self.pause_reason,
            total_paused_seconds: self.total_paused_seconds,
            total_travel_seconds: self.total_travel_seconds,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    assignment_id: Uuid,
    action: String,
    occurred_at: DateTime<Utc>,
    reason: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl EventRow {
    fn try_into_event(self) -> Result<TimerEvent> {
        Ok(TimerEvent {
            id: self.id,
            assignment_id: AssignmentId(self.assignment_id),
            action: self.action.parse()?,
            timestamp: self.occurred_at,
            reason: self.reason,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LineItemRow {
    work_order_id: Uuid,
    product_id: String,
    qty: i64,
    rate_cents: i64,
}

impl LineItemRow {
    fn try_into_line_item(self) -> Result<LineItem> {
        let qty = u32::try_from(self.qty)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| {
                Error::Other(format!(
                    "line item {} has invalid quantity {}",
                    self.product_id, self.qty
                ))
            })?;
        Ok(LineItem {
            work_order_id: WorkOrderId(self.work_order_id),
            product_id: ProductId(self.product_id),
            qty,
            rate_cents: self.rate_cents,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InspectionRow {
    id: Uuid,
    work_order_id: Uuid,
    business: Json<BusinessSnapshot>,
    vehicle: Json<VehicleSnapshot>,
    checklist: Json<Vec<ChecklistSection>>,
    pushrod_stroke: Json<BTreeMap<AxlePosition, f64>>,
    tread_depth: Json<BTreeMap<TirePosition, f64>>,
    additional_notes: Option<String>,
    inspector_name: String,
    inspection_date: NaiveDate,
    submitted_at: DateTime<Utc>,
}

impl InspectionRow {
    fn into_inspection(self) -> PmInspection {
        PmInspection {
            id: InspectionId(self.id),
            work_order_id: WorkOrderId(self.work_order_id),
            business: self.business.0,
            vehicle: self.vehicle.0,
            checklist: self.checklist.0,
            pushrod_stroke: self.pushrod_stroke.0,
            tread_depth: self.tread_depth.0,
            additional_notes: self.additional_notes,
            inspector_name: self.inspector_name,
            inspection_date: self.inspection_date,
            submitted_at: self.submitted_at,
        }
    }
}
