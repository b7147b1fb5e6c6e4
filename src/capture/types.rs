// src/capture/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which HTTP primitive observed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    Fetch,
    Xhr,
}

/// A matching network call, alive only while it is processed.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub url: String,
    pub observed_at: DateTime<Utc>,
    pub method: CaptureMethod,
}

impl CaptureRequest {
    pub fn new(url: impl Into<String>, method: CaptureMethod) -> Self {
        Self {
            url: url.into(),
            observed_at: Utc::now(),
            method,
        }
    }
}

/// Dedup key derived from a request's stable query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parsed JSON body of a target response, consumed once by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPayload {
    pub raw_data: serde_json::Value,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub method: CaptureMethod,
    pub capture_id: u64,
}
