// src/bridge/mod.rs
//! Relay between the capturing context and the privileged controller.
//!
//! Inbound: tagged `API_CAPTURED` envelopes from one interceptor.
//! Outbound: exactly one [`CaptureSummary`] per captured payload, success or not.

pub mod channel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::types::{CaptureMethod, CapturedPayload};
use crate::delivery::{DeliveryResult, DeliverySink};
use crate::error::CaptureError;
use channel::{ContextReceiver, Envelope, API_CAPTURED};

/// `data` of an `API_CAPTURED` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedData {
    pub captured_data: Value,
    pub captured_url: String,
    pub captured_time: DateTime<Utc>,
    pub data_size: usize,
    #[serde(default = "default_method")]
    pub capture_method: CaptureMethod,
    #[serde(default)]
    pub capture_id: u64,
}

fn default_method() -> CaptureMethod {
    CaptureMethod::Fetch
}

impl CapturedData {
    pub fn from_payload(p: &CapturedPayload) -> Self {
        Self {
            captured_data: p.raw_data.clone(),
            captured_url: p.source_url.clone(),
            captured_time: p.captured_at,
            data_size: p.size_bytes,
            capture_method: p.method,
            capture_id: p.capture_id,
        }
    }

    pub fn into_payload(self) -> CapturedPayload {
        CapturedPayload {
            raw_data: self.captured_data,
            source_url: self.captured_url,
            captured_at: self.captured_time,
            size_bytes: self.data_size,
            method: self.capture_method,
            capture_id: self.capture_id,
        }
    }
}

/// Condensed status forwarded to the privileged context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub source: String,
    pub url: String,
    pub size_bytes: usize,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub item_count: usize,
    pub error: Option<String>,
}

/// Messages the privileged controller accepts from bridges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegedMessage {
    Captured(CaptureSummary),
    PageLoadFailed { url: String, error: String },
}

pub type PrivilegedSender = mpsc::UnboundedSender<PrivilegedMessage>;
pub type PrivilegedReceiver = mpsc::UnboundedReceiver<PrivilegedMessage>;

pub struct Bridge {
    name: String,
    inbox: ContextReceiver,
    sink: Arc<dyn DeliverySink>,
    privileged: PrivilegedSender,
}

impl Bridge {
    pub fn new(
        name: impl Into<String>,
        inbox: ContextReceiver,
        sink: Arc<dyn DeliverySink>,
        privileged: PrivilegedSender,
    ) -> Self {
        Self {
            name: name.into(),
            inbox,
            sink,
            privileged,
        }
    }

    /// Deliver one payload. A panicking sink is contained in its own task and
    /// reported as a failed delivery.
    pub async fn relay(&self, payload: CapturedPayload) -> DeliveryResult {
        relay_with(Arc::clone(&self.sink), payload).await
    }

    /// Handle one verified envelope: deliver, then forward exactly one summary.
    pub async fn handle_envelope(&self, env: Envelope) {
        if env.kind != API_CAPTURED {
            tracing::debug!(target: "bridge", bridge = %self.name, kind = %env.kind, "ignored message type");
            return;
        }

        let url_hint = env
            .data
            .get("capturedUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let summary = match serde_json::from_value::<CapturedData>(env.data) {
            Ok(data) => {
                let payload = data.into_payload();
                tracing::info!(
                    target: "bridge",
                    bridge = %self.name,
                    url = %payload.source_url,
                    bytes = payload.size_bytes,
                    "relaying capture"
                );
                let url = payload.source_url.clone();
                let size = payload.size_bytes;
                let time = payload.captured_at;
                let res = self.relay(payload).await;
                CaptureSummary {
                    source: self.name.clone(),
                    url,
                    size_bytes: size,
                    time,
                    success: res.success,
                    item_count: res.item_count,
                    error: res.error,
                }
            }
            Err(e) => {
                tracing::error!(target: "bridge", bridge = %self.name, error = %e, "malformed capture data");
                CaptureSummary {
                    source: self.name.clone(),
                    url: url_hint,
                    size_bytes: 0,
                    time: Utc::now(),
                    success: false,
                    item_count: 0,
                    error: Some(format!("malformed capture data: {e}")),
                }
            }
        };

        self.forward(PrivilegedMessage::Captured(summary));
    }

    /// Report a page-level failure (target page could not be loaded).
    pub fn report_page_failure(&self, url: &str, error: &str) {
        self.forward(PrivilegedMessage::PageLoadFailed {
            url: url.to_string(),
            error: error.to_string(),
        });
    }

    fn forward(&self, msg: PrivilegedMessage) {
        if self.privileged.send(msg).is_err() {
            let e = CaptureError::Transport("privileged context is gone".into());
            tracing::error!(target: "bridge", bridge = %self.name, error = %e, "summary not delivered");
        }
    }

    /// Process envelopes until every sender is dropped.
    pub async fn run(mut self) {
        tracing::info!(target: "bridge", bridge = %self.name, tag = %self.inbox.expected_tag(), "bridge ready");
        while let Some(env) = self.inbox.recv().await {
            self.handle_envelope(env).await;
        }
        tracing::info!(target: "bridge", bridge = %self.name, "bridge inbox closed");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn relay_with(sink: Arc<dyn DeliverySink>, payload: CapturedPayload) -> DeliveryResult {
    let task = tokio::spawn(async move { sink.deliver(&payload.raw_data).await });
    match task.await {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(target: "bridge", error = %e, "delivery task aborted");
            DeliveryResult::failed(format!("relay failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::context_channel;
    use crate::delivery::MockSink;
    use serde_json::json;

    #[tokio::test]
    async fn non_capture_types_produce_no_summary() {
        let (_tx, rx) = context_channel("t");
        let (ptx, mut prx) = mpsc::unbounded_channel();
        let sink = Arc::new(MockSink::new(DeliveryResult::ok(1)));
        let bridge = Bridge::new("t", rx, sink, ptx);

        bridge
            .handle_envelope(Envelope {
                source: "t".into(),
                kind: "PING".into(),
                data: json!({}),
            })
            .await;
        drop(bridge);
        assert!(prx.recv().await.is_none());
    }
}
