//! Secret handling.
//!
//! Database URLs and assignment bearer tokens are held as `SecretString`
//! and only exposed at the point of use.

pub use secrecy::{ExposeSecret, SecretString};

/// `Authorization` header value for a bearer token.
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
