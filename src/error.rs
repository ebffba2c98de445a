//! Error types for fieldsync.
//!
//! The variants mirror how a failure is handled downstream: transition and
//! validation errors are resolved by the caller, conflicts are rebased,
//! network failures are queued for replay, everything else is fatal for the
//! request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::JobSnapshot;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid transition: cannot {action} from {from}")]
    InvalidTransition { from: String, action: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("version conflict: work order is at version {}", .0.version)]
    Conflict(Box<JobSnapshot>),

    #[error("network error: {0}")]
    Network(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a failed request should be treated by whoever issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timer action not legal from the current state. Never retried.
    Transition,
    /// Payload rejected. Surfaced to the user, never retried.
    Validation,
    /// Lost an optimistic-concurrency race. Rebase and resubmit.
    Conflict,
    /// Transport failure. Eligible for the offline queue.
    Network,
    /// Not found, permission denied, or infrastructure failure.
    Fatal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidTransition { .. } => ErrorClass::Transition,
            Error::Validation(_) => ErrorClass::Validation,
            Error::Conflict(_) => ErrorClass::Conflict,
            Error::Network(_) => ErrorClass::Network,
            _ => ErrorClass::Fatal,
        }
    }

    pub(crate) fn transition(from: impl ToString, action: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            action: action.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single rejected field or checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Checklist item id, measurement key, or field name.
    pub target: String,
    pub problem: String,
}

/// Structured validation failure. Enumerates every offending target so the
/// client can highlight all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error, Serialize, Deserialize)]
#[error("validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn single(target: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut err = Self::default();
        err.push(target, problem);
        err
    }

    pub fn push(&mut self, target: impl Into<String>, problem: impl Into<String>) {
        self.issues.push(ValidationIssue {
            target: target.into(),
            problem: problem.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Ids of every offending target, in the order they were found.
    pub fn targets(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.target.as_str()).collect()
    }

    /// `Ok(())` when no issues were collected.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.target, i.problem))
        .collect::<Vec<_>>()
        .join("; ")
}
