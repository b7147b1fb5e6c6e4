// src/error.rs
//! Error taxonomy for the capture pipeline.
//!
//! Only `Delivery` (after retries) and `Validation` ever reach the user-visible
//! task history; everything else is logged and recovered locally.

use thiserror::Error;

use crate::capture::gate::Rejection;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Captured response body is not JSON. Logged, capture dropped, no retry.
    #[error("captured body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Fingerprint gate refused the request. Not an error condition, logged at debug.
    #[error("duplicate skipped: {0}")]
    DuplicateRejected(Rejection),

    /// Collector unreachable or answered with a failure.
    #[error("{0}")]
    Delivery(String),

    /// Nothing left after normalization; retrying would not produce more data.
    #[error("no valid data")]
    Validation,

    /// Cross-context message could not be handed over (receiver gone).
    #[error("context channel closed: {0}")]
    Transport(String),
}

impl CaptureError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CaptureError::DuplicateRejected(_))
    }
}

/// Failure of the underlying HTTP primitive. Propagated untouched to the caller
/// of the hooked client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("interval must be within {min}..={max} minutes, got {got}")]
    InvalidInterval { got: i64, min: u32, max: u32 },

    #[error("state store: {0:#}")]
    Store(#[from] anyhow::Error),
}
