// src/capture/interceptor.rs
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

use super::fingerprint::{parse_with_base, FingerprintRule};
use super::gate::FingerprintGate;
use super::types::{CaptureRequest, CapturedPayload, Fingerprint};
use crate::bridge::channel::{ContextSender, API_CAPTURED};
use crate::bridge::CapturedData;
use crate::error::CaptureError;

/// Which requests are worth capturing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRule {
    /// Path fragment the URL must contain, e.g. `/lineup-next/api/stories`.
    pub path: String,
    /// Query parameters that must be present (list-request markers).
    #[serde(default)]
    pub required_params: Vec<String>,
    /// Query parameters that must be absent (single-item markers).
    #[serde(default)]
    pub excluded_params: Vec<String>,
    /// If non-empty, at least one of these must occur somewhere in the URL.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl TargetRule {
    pub fn matches(&self, raw_url: &str, base: Option<&Url>) -> bool {
        if !raw_url.contains(&self.path) {
            return false;
        }
        if !self.keywords.is_empty() && !self.keywords.iter().any(|k| raw_url.contains(k.as_str()))
        {
            return false;
        }

        match parse_with_base(raw_url, base) {
            Some(url) => {
                let has = |name: &str| url.query_pairs().any(|(k, _)| k == name);
                self.required_params.iter().all(|p| has(p))
                    && !self.excluded_params.iter().any(|p| has(p))
            }
            // unparseable: fall back to `name=` substring markers
            None => {
                let has = |name: &str| raw_url.contains(&format!("{name}="));
                self.required_params.iter().all(|p| has(p))
                    && !self.excluded_params.iter().any(|p| has(p))
            }
        }
    }
}

/// Observes target responses for one news source and hands parsed payloads to
/// its bridge channel. Never touches the request or the response seen by the caller.
pub struct NetworkInterceptor {
    name: String,
    base: Option<Url>,
    target: TargetRule,
    fingerprint: FingerprintRule,
    gate: Arc<FingerprintGate>,
    outbox: ContextSender,
    captures: AtomicU64,
}

impl NetworkInterceptor {
    pub fn new(
        name: impl Into<String>,
        base: Option<Url>,
        target: TargetRule,
        fingerprint: FingerprintRule,
        gate: Arc<FingerprintGate>,
        outbox: ContextSender,
    ) -> Self {
        Self {
            name: name.into(),
            base,
            target,
            fingerprint,
            gate,
            outbox,
            captures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate(&self) -> &Arc<FingerprintGate> {
        &self.gate
    }

    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn is_target(&self, url: &str) -> bool {
        self.target.matches(url, self.base.as_ref())
    }

    pub fn fingerprint(&self, url: &str) -> Fingerprint {
        self.fingerprint.fingerprint(url, self.base.as_ref())
    }

    /// One capture attempt for a target response body.
    ///
    /// Synchronous on purpose: gate check, parse, mark-seen and post happen with
    /// no suspension point in between. The active marker is released when the
    /// guard goes out of scope, whatever the outcome; the fingerprint is only
    /// remembered as seen when the body parsed.
    pub fn capture(
        &self,
        req: &CaptureRequest,
        body: &[u8],
    ) -> Result<CapturedPayload, CaptureError> {
        let fp = self.fingerprint(&req.url);
        let guard = match self.gate.try_begin(&fp, Utc::now()) {
            Ok(g) => g,
            Err(r) => {
                counter!("gate_rejections_total").increment(1);
                return Err(CaptureError::DuplicateRejected(r));
            }
        };

        counter!("capture_attempts_total").increment(1);
        let raw_data: serde_json::Value = serde_json::from_slice(body).inspect_err(|_| {
            counter!("capture_parse_errors_total").increment(1);
        })?;

        let id = self.captures.fetch_add(1, Ordering::Relaxed) + 1;
        let captured_at = Utc::now();
        guard.mark_seen(captured_at);

        let payload = CapturedPayload {
            raw_data,
            source_url: req.url.clone(),
            captured_at,
            size_bytes: body.len(),
            method: req.method,
            capture_id: id,
        };

        tracing::info!(
            target: "capture",
            source = %self.name,
            capture_id = id,
            method = ?req.method,
            bytes = payload.size_bytes,
            "captured target response"
        );

        let data = CapturedData::from_payload(&payload);
        match serde_json::to_value(&data) {
            Ok(v) => {
                if let Err(e) = self.outbox.post(API_CAPTURED, v) {
                    tracing::warn!(target: "capture", source = %self.name, error = %e, "bridge unreachable");
                }
            }
            Err(e) => {
                tracing::warn!(target: "capture", source = %self.name, error = %e, "could not encode envelope")
            }
        }

        Ok(payload)
    }
}
