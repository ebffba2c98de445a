//! How queued mutations reach the server.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use reqwest::StatusCode;

use super::queue::OfflineMutation;
use crate::api::{ErrorBody, IDEMPOTENCY_KEY};
use crate::config::secrets::{SecretString, bearer};
use crate::error::{Error, ErrorClass, Result, ValidationError};
use crate::model::*;
use crate::store::Store;
use crate::sync::SyncController;

/// What happened to one send attempt.
#[derive(Debug)]
pub enum SendOutcome {
    /// Applied (or recognised as already applied).
    Acked(MutationResponse),
    /// Lost a version race; carries the state to rebase on.
    Conflict(Box<JobSnapshot>),
    /// Refused for good: transition, validation, permission, not found.
    Rejected(Error),
    /// Nothing definitive came back. Retry later.
    Network(String),
}

impl SendOutcome {
    /// Sort a server-side result into an outcome by error class.
    pub fn from_result(result: Result<MutationResponse>) -> Self {
        match result {
            Ok(response) => SendOutcome::Acked(response),
            Err(Error::Conflict(current)) => SendOutcome::Conflict(current),
            Err(e) => match e.class() {
                ErrorClass::Network => SendOutcome::Network(e.to_string()),
                // Infrastructure failures on the far side are transient from
                // here; not found and permission denied are not.
                ErrorClass::Fatal if is_transient(&e) => SendOutcome::Network(e.to_string()),
                _ => SendOutcome::Rejected(e),
            },
        }
    }
}

fn is_transient(e: &Error) -> bool {
    matches!(e, Error::Database(_) | Error::Io(_) | Error::Other(_))
}

/// A connection to the sync controller.
pub trait Transport: Send + Sync {
    /// Send one queued mutation.
    fn send(&self, entry: &OfflineMutation) -> impl Future<Output = SendOutcome> + Send;

    /// Fetch the canonical job.
    fn fetch(&self, id: WorkOrderId) -> impl Future<Output = Result<JobSnapshot>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Talks to the `api` routes over HTTP.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    tokens: HashMap<WorkOrderId, SecretString>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, tokens: HashMap<WorkOrderId, SecretString>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn token(&self, id: WorkOrderId) -> Result<&SecretString> {
        self.tokens
            .get(&id)
            .ok_or_else(|| Error::Config(format!("no assignment token for work order {id}")))
    }

    fn url(&self, id: WorkOrderId, suffix: &str) -> String {
        format!("{}/api/jobs/{id}{suffix}", self.base_url)
    }

    /// Route and JSON body for a mutation.
    fn route(mutation: &Mutation) -> Result<(&'static str, serde_json::Value)> {
        let route = match mutation {
            Mutation::Timer(cmd) => ("/timer", serde_json::to_value(cmd)?),
            Mutation::Status(cmd) => ("/status", serde_json::to_value(cmd)?),
            Mutation::Details(patch) => ("/details", serde_json::to_value(patch)?),
            Mutation::Inspection(sub) => ("/pm_inspection/submit", serde_json::to_value(sub)?),
            Mutation::Parts(adj) => {
                let mut body = serde_json::json!({ "product_id": adj.product_id });
                if let Some(rate) = adj.rate_cents {
                    body["rate_cents"] = rate.into();
                }
                match adj.change {
                    QtyChange::Delta(d) if d > 0 => {
                        body["qty"] = d.into();
                        ("/parts/add", body)
                    }
                    QtyChange::Delta(d) => {
                        body["qty"] = d.unsigned_abs().into();
                        ("/parts/remove", body)
                    }
                    QtyChange::Target(t) => {
                        body["target"] = t.into();
                        if t > 0 {
                            ("/parts/add", body)
                        } else {
                            ("/parts/remove", body)
                        }
                    }
                    QtyChange::Clear => {
                        body["clear"] = true.into();
                        ("/parts/remove", body)
                    }
                }
            }
        };
        Ok(route)
    }

    async fn try_send(&self, entry: &OfflineMutation) -> Result<SendOutcome> {
        let id = entry.work_order_id;
        let (suffix, body) = Self::route(&entry.mutation)?;
        let mut request = self
            .http
            .post(self.url(id, suffix))
            .header(reqwest::header::AUTHORIZATION, bearer(self.token(id)?))
            .header(IDEMPOTENCY_KEY, entry.idempotency_key.as_str())
            .json(&body);
        if let Some(version) = entry.base_version {
            request = request.header(reqwest::header::IF_MATCH, format!("\"{version}\""));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(SendOutcome::Network(e.to_string())),
        };
        let status = response.status();
        if status.is_success() {
            return match response.json::<MutationResponse>().await {
                Ok(r) => Ok(SendOutcome::Acked(r)),
                // The server applied it but the body was lost; the receipt
                // answers the retry.
                Err(e) => Ok(SendOutcome::Network(e.to_string())),
            };
        }
        if status.is_server_error() {
            return Ok(SendOutcome::Network(format!("server returned {status}")));
        }

        let body: ErrorBody = match response.json().await {
            Ok(b) => b,
            Err(_) => ErrorBody::new("unknown", status.to_string()),
        };
        Ok(SendOutcome::from_result(Err(error_from_body(status, body))))
    }
}

/// Rebuild a typed error from a non-2xx response.
fn error_from_body(status: StatusCode, body: ErrorBody) -> Error {
    match (status, body.error.as_str()) {
        (StatusCode::CONFLICT, _) => match body.current {
            Some(current) => Error::Conflict(current),
            None => Error::Other(format!("conflict without state: {}", body.message)),
        },
        (_, "validation") => Error::Validation(ValidationError {
            issues: body.issues,
        }),
        (_, "invalid_transition") => Error::InvalidTransition {
            from: body.from.unwrap_or_default(),
            action: body.action.unwrap_or(body.message),
        },
        (StatusCode::NOT_FOUND, _) => Error::NotFound(body.detail.unwrap_or(body.message)),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            Error::PermissionDenied(body.detail.unwrap_or(body.message))
        }
        _ => Error::Validation(ValidationError::single("request", body.message)),
    }
}

impl Transport for HttpTransport {
    async fn send(&self, entry: &OfflineMutation) -> SendOutcome {
        match self.try_send(entry).await {
            Ok(outcome) => outcome,
            Err(e) => SendOutcome::Rejected(e),
        }
    }

    async fn fetch(&self, id: WorkOrderId) -> Result<JobSnapshot> {
        let response = self
            .http
            .get(self.url(id, ""))
            .header(reqwest::header::AUTHORIZATION, bearer(self.token(id)?))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Network(e.to_string()));
        }
        if status.is_server_error() {
            return Err(Error::Network(format!("server returned {status}")));
        }
        let body: ErrorBody = response
            .json()
            .await
            .unwrap_or_else(|_| ErrorBody::new("unknown", status.to_string()));
        Err(error_from_body(status, body))
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Calls a [`SyncController`] directly. Same outcomes as HTTP, no sockets.
pub struct InProcessTransport<S> {
    sync: Arc<SyncController<S>>,
    tokens: HashMap<WorkOrderId, String>,
}

impl<S: Store> InProcessTransport<S> {
    pub fn new(sync: Arc<SyncController<S>>) -> Self {
        Self {
            sync,
            tokens: HashMap::new(),
        }
    }

    pub fn with_token(mut self, id: WorkOrderId, token: impl Into<String>) -> Self {
        self.tokens.insert(id, token.into());
        self
    }

    fn token(&self, id: WorkOrderId) -> Result<&str> {
        self.tokens
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| Error::Config(format!("no assignment token for work order {id}")))
    }
}

impl<S: Store> Transport for InProcessTransport<S> {
    async fn send(&self, entry: &OfflineMutation) -> SendOutcome {
        let token = match self.token(entry.work_order_id) {
            Ok(t) => t,
            Err(e) => return SendOutcome::Rejected(e),
        };
        let request = MutationRequest {
            idempotency_key: Some(entry.idempotency_key.clone()),
            expected_version: entry.base_version,
            mutation: entry.mutation.clone(),
        };
        SendOutcome::from_result(self.sync.apply(token, entry.work_order_id, request).await)
    }

    async fn fetch(&self, id: WorkOrderId) -> Result<JobSnapshot> {
        self.sync.job(self.token(id)?, id).await
    }
}
