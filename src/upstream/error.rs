//! Upstream client error types.

use thiserror::Error;

use crate::identity::AuthError;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that escape the chat call.
///
/// Transient failures (transport errors, non-200 responses, unparseable
/// bodies) are absorbed by the retry loop and only surface once the attempt
/// budget is spent.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Token acquisition failed. Not retried; the requester decides.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The retry budget is exhausted.
    #[error("upstream call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}
