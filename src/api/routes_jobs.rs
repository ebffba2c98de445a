//! Job routes: one canonical read plus one POST per mutation kind.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path as AxumPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{ApiError, BearerToken, MutationHeaders};
use crate::error::ValidationError;
use crate::model::*;
use crate::store::Store;
use crate::sync::SyncController;

type SyncState<S> = State<Arc<SyncController<S>>>;

fn etag(version: u64) -> (header::HeaderName, String) {
    (header::ETAG, format!("\"{version}\""))
}

pub(super) async fn handler_job_get<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
) -> Result<Response, ApiError> {
    let snapshot = sync.job(&token, id).await?;
    Ok(([etag(snapshot.version)], Json(snapshot)).into_response())
}

async fn apply<S: Store>(
    sync: &SyncController<S>,
    token: &str,
    id: WorkOrderId,
    headers: MutationHeaders,
    mutation: Mutation,
) -> Result<Response, ApiError> {
    let request = MutationRequest {
        idempotency_key: headers.idempotency_key,
        expected_version: headers.expected_version,
        mutation,
    };
    let response = sync.apply(token, id, request).await?;
    Ok(([etag(response.version)], Json(response)).into_response())
}

pub(super) async fn handler_job_status<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(cmd): Json<StatusCommand>,
) -> Result<Response, ApiError> {
    apply(&sync, &token, id, headers, Mutation::Status(cmd)).await
}

pub(super) async fn handler_job_timer<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(cmd): Json<TimerCommand>,
) -> Result<Response, ApiError> {
    apply(&sync, &token, id, headers, Mutation::Timer(cmd)).await
}

pub(super) async fn handler_job_details<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(patch): Json<DetailsPatch>,
) -> Result<Response, ApiError> {
    apply(&sync, &token, id, headers, Mutation::Details(patch)).await
}

/// Body shared by both parts routes.
///
/// `target` sets an absolute quantity and is what replaying clients send.
/// Otherwise `/add` increments by `qty` (default 1) and `/remove`
/// decrements by `qty` (default 1), or deletes the row when `clear` is set.
#[derive(Debug, Deserialize)]
pub(super) struct PartsBody {
    #[serde(alias = "partId")]
    product_id: ProductId,
    #[serde(default)]
    qty: Option<u32>,
    #[serde(default)]
    target: Option<u32>,
    #[serde(default)]
    clear: bool,
    #[serde(default)]
    rate_cents: Option<i64>,
}

impl PartsBody {
    fn into_adjustment(self, change: QtyChange) -> PartAdjustment {
        PartAdjustment {
            product_id: self.product_id,
            change,
            rate_cents: self.rate_cents,
        }
    }
}

pub(super) async fn handler_job_parts_add<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(body): Json<PartsBody>,
) -> Result<Response, ApiError> {
    if body.clear {
        return Err(
            crate::error::Error::from(ValidationError::single("clear", "use parts/remove"))
                .into(),
        );
    }
    let change = match (body.target, body.qty) {
        (Some(target), _) => QtyChange::Target(target),
        (None, Some(0)) => {
            return Err(crate::error::Error::from(ValidationError::single(
                "qty",
                "must be at least 1",
            ))
            .into());
        }
        (None, qty) => QtyChange::Delta(i64::from(qty.unwrap_or(1))),
    };
    let mutation = Mutation::Parts(body.into_adjustment(change));
    apply(&sync, &token, id, headers, mutation).await
}

pub(super) async fn handler_job_parts_remove<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(body): Json<PartsBody>,
) -> Result<Response, ApiError> {
    let change = if body.clear {
        QtyChange::Clear
    } else if let Some(target) = body.target {
        QtyChange::Target(target)
    } else {
        QtyChange::Delta(-i64::from(body.qty.unwrap_or(1)))
    };
    let mutation = Mutation::Parts(body.into_adjustment(change));
    apply(&sync, &token, id, headers, mutation).await
}

pub(super) async fn handler_job_inspection_submit<S: Store>(
    State(sync): SyncState<S>,
    BearerToken(token): BearerToken,
    AxumPath(id): AxumPath<WorkOrderId>,
    headers: MutationHeaders,
    Json(submission): Json<InspectionSubmission>,
) -> Result<Response, ApiError> {
    apply(&sync, &token, id, headers, Mutation::Inspection(submission)).await
}
