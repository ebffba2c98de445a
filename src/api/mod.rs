//! HTTP API over the sync controller.
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /api/health` | store reachability |
//! | `GET /api/jobs/{id}` | canonical job snapshot |
//! | `POST /api/jobs/{id}/status` | status override |
//! | `POST /api/jobs/{id}/timer` | timer action |
//! | `POST /api/jobs/{id}/details` | details patch |
//! | `POST /api/jobs/{id}/parts/add` | add or increment a part |
//! | `POST /api/jobs/{id}/parts/remove` | decrement, set, or clear a part |
//! | `POST /api/jobs/{id}/pm_inspection/submit` | inspection upsert |
//!
//! Every job route requires `Authorization: Bearer <assignment token>`.
//! Mutations accept `Idempotency-Key` and `If-Match: <version>`.

mod auth;
mod routes_health;
mod routes_jobs;

pub use auth::{BearerToken, MutationHeaders};

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::{Error, ValidationIssue};
use crate::model::JobSnapshot;
use crate::store::Store;
use crate::sync::SyncController;

pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Build the router with every route wired to `sync`.
pub fn build_router<S: Store>(sync: Arc<SyncController<S>>) -> Router {
    Router::new()
        .route("/api/health", get(routes_health::handler_health::<S>))
        .route("/api/jobs/{id}", get(routes_jobs::handler_job_get::<S>))
        .route(
            "/api/jobs/{id}/status",
            post(routes_jobs::handler_job_status::<S>),
        )
        .route(
            "/api/jobs/{id}/timer",
            post(routes_jobs::handler_job_timer::<S>),
        )
        .route(
            "/api/jobs/{id}/details",
            post(routes_jobs::handler_job_details::<S>),
        )
        .route(
            "/api/jobs/{id}/parts/add",
            post(routes_jobs::handler_job_parts_add::<S>),
        )
        .route(
            "/api/jobs/{id}/parts/remove",
            post(routes_jobs::handler_job_parts_remove::<S>),
        )
        .route(
            "/api/jobs/{id}/pm_inspection/submit",
            post(routes_jobs::handler_job_inspection_submit::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(sync)
}

/// Serve `router` on `addr` until ctrl-c.
pub async fn serve(addr: std::net::SocketAddr, router: Router) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("received SIGINT, shutting down");
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON body of every non-2xx response. Also parsed by the field client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code: `not_found`, `permission_denied`,
    /// `invalid_transition`, `validation`, `conflict`, `unauthorized`,
    /// `internal`.
    pub error: String,
    pub message: String,
    /// Bare reason for not-found and permission errors, without the prefix
    /// `message` carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
    /// State and action of a refused timer transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Canonical state to rebase on, for conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Box<JobSnapshot>>,
}

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            detail: None,
            issues: Vec::new(),
            from: None,
            action: None,
            current: None,
        }
    }
}

/// Handler error: an [`Error`] rendered with the right status code.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0 {
            Error::NotFound(detail) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    detail: Some(detail),
                    ..ErrorBody::new("not_found", message)
                },
            ),
            Error::PermissionDenied(detail) => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    detail: Some(detail),
                    ..ErrorBody::new("permission_denied", message)
                },
            ),
            Error::InvalidTransition { from, action } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    from: Some(from),
                    action: Some(action),
                    ..ErrorBody::new("invalid_transition", message)
                },
            ),
            Error::Validation(v) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    issues: v.issues,
                    ..ErrorBody::new("validation", message)
                },
            ),
            Error::Conflict(current) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    current: Some(current),
                    ..ErrorBody::new("conflict", message)
                },
            ),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal", "internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
