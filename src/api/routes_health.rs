//! Readiness: 200 when the store answers within two seconds, 503 otherwise.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::store::Store;
use crate::sync::SyncController;

pub(super) async fn handler_health<S: Store>(
    State(sync): State<Arc<SyncController<S>>>,
) -> impl IntoResponse {
    let check = tokio::time::timeout(Duration::from_secs(2), sync.store().health_check()).await;

    match check {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unreachable")
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store timeout"),
    }
}
