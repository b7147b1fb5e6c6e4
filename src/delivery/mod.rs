// src/delivery/mod.rs
pub mod normalize;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CaptureError;
pub use normalize::{FieldSpec, FieldTable, NormalizedRecord};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Outcome of one `deliver` call. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub item_count: usize,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok(item_count: usize) -> Self {
        Self {
            success: true,
            item_count,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            item_count: 0,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, raw: &serde_json::Value) -> DeliveryResult;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectorBody<'a> {
    captured_data: &'a [NormalizedRecord],
}

/// Pushes normalized records to the local collector endpoint.
#[derive(Clone)]
pub struct CollectorSink {
    endpoint: String,
    table: FieldTable,
    client: Client,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
}

impl CollectorSink {
    pub fn new(endpoint: impl Into<String>, table: FieldTable) -> Self {
        Self {
            endpoint: endpoint.into(),
            table,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Total attempts, first one included. `0` is treated as `1`.
    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    async fn post_once(&self, records: &[NormalizedRecord]) -> Result<(), CaptureError> {
        counter!("delivery_attempts_total").increment(1);
        let rsp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&CollectorBody {
                captured_data: records,
            })
            .send()
            .await
            .map_err(|e| CaptureError::Delivery(format!("send failed: {e}")))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(CaptureError::Delivery(format!(
                "collector responded {status}"
            )));
        }
        rsp.json::<serde_json::Value>()
            .await
            .map_err(|e| CaptureError::Delivery(format!("collector reply is not JSON: {e}")))?;
        Ok(())
    }

    /// POST with linear backoff (`attempt × base_delay`) between attempts.
    pub async fn send_records(&self, records: &[NormalizedRecord]) -> DeliveryResult {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.post_once(records).await {
                Ok(()) => {
                    counter!("delivery_items_total").increment(records.len() as u64);
                    tracing::info!(
                        target: "delivery",
                        endpoint = %self.endpoint,
                        items = records.len(),
                        attempt,
                        "delivered to collector"
                    );
                    return DeliveryResult::ok(records.len());
                }
                Err(e) => {
                    tracing::warn!(
                        target: "delivery",
                        endpoint = %self.endpoint,
                        attempt,
                        max = self.max_attempts,
                        error = %e,
                        "delivery attempt failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.base_delay * attempt).await;
                        continue;
                    }
                    counter!("delivery_failures_total").increment(1);
                    return DeliveryResult::failed(e.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl DeliverySink for CollectorSink {
    async fn deliver(&self, raw: &serde_json::Value) -> DeliveryResult {
        let records = self.table.normalize(raw);
        if records.is_empty() {
            tracing::warn!(target: "delivery", endpoint = %self.endpoint, "nothing to deliver");
            return DeliveryResult::failed(CaptureError::Validation.to_string());
        }
        self.send_records(&records).await
    }
}

// --- Test helper ---
/// Records every raw payload it receives and answers with a fixed result.
pub struct MockSink {
    pub calls: std::sync::Mutex<Vec<serde_json::Value>>,
    pub result: DeliveryResult,
}

impl MockSink {
    pub fn new(result: DeliveryResult) -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            result,
        }
    }
}

#[async_trait]
impl DeliverySink for MockSink {
    async fn deliver(&self, raw: &serde_json::Value) -> DeliveryResult {
        self.calls.lock().unwrap().push(raw.clone());
        self.result.clone()
    }
}
