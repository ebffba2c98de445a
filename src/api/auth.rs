//! Request extractors for the bearer token and mutation headers.
//!
//! The token is only extracted here. Mapping it to an assignment, and
//! refusing it for someone else's work order, happens in the sync
//! controller so every transport gets the same check.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::{ApiError, ErrorBody, IDEMPOTENCY_KEY};
use crate::error::ValidationError;
use crate::model::IdempotencyKey;

/// The raw `Authorization: Bearer <token>` value. 401 when absent.
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| BearerToken(t.to_string()))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorBody::new("unauthorized", "bearer token required")),
                )
                    .into_response()
            })
    }
}

/// Optional `Idempotency-Key` and `If-Match` headers of a mutation.
#[derive(Debug, Default)]
pub struct MutationHeaders {
    pub idempotency_key: Option<IdempotencyKey>,
    pub expected_version: Option<u64>,
}

impl<S: Send + Sync> FromRequestParts<S> for MutationHeaders {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let idempotency_key = header_str(parts, IDEMPOTENCY_KEY)?
            .filter(|k| !k.is_empty())
            .map(|k| IdempotencyKey(k.to_string()));

        // ETags are sent back quoted; accept both forms.
        let expected_version = match header_str(parts, header::IF_MATCH.as_str())? {
            Some(raw) => Some(raw.trim_matches('"').parse::<u64>().map_err(|_| {
                ApiError::from(crate::error::Error::from(ValidationError::single(
                    "If-Match",
                    "must be a work order version",
                )))
            })?),
            None => None,
        };

        Ok(Self {
            idempotency_key,
            expected_version,
        })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    match parts.headers.get(name) {
        Some(value) => value.to_str().map(|v| Some(v.trim())).map_err(|_| {
            ApiError::from(crate::error::Error::from(ValidationError::single(
                name,
                "header is not valid ASCII",
            )))
        }),
        None => Ok(None),
    }
}
