// src/cycle.rs
//! The scheduled capture cycle: refresh the list endpoints through the hooked
//! client, then wait for the bridges' summaries.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};

use crate::bridge::CaptureSummary;
use crate::capture::{HookedClient, HttpRequest, Transport};
use crate::delivery::DeliveryResult;
use crate::scheduler::CaptureCycle;

pub struct RefreshCycle<T: Transport> {
    client: Arc<HookedClient<T>>,
    targets: Vec<String>,
    summaries: broadcast::Sender<CaptureSummary>,
    wait: Duration,
}

impl<T: Transport + 'static> RefreshCycle<T> {
    pub fn new(
        client: Arc<HookedClient<T>>,
        targets: Vec<String>,
        summaries: broadcast::Sender<CaptureSummary>,
        wait: Duration,
    ) -> Self {
        Self {
            client,
            targets,
            summaries,
            wait,
        }
    }

    async fn collect(
        &self,
        rx: &mut broadcast::Receiver<CaptureSummary>,
        expected: usize,
    ) -> Vec<CaptureSummary> {
        let deadline = Instant::now() + self.wait;
        let mut got = Vec::with_capacity(expected);
        while got.len() < expected {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Ok(s)) => got.push(s),
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!(target: "scheduler", skipped = n, "summary receiver lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }
        got
    }
}

#[async_trait]
impl<T: Transport + 'static> CaptureCycle for RefreshCycle<T> {
    async fn run_cycle(&self) -> DeliveryResult {
        // subscribe first so no summary slips past
        let mut rx = self.summaries.subscribe();

        let mut fetched = 0usize;
        let mut last_err = None;
        for url in &self.targets {
            match self.client.fetch(HttpRequest::get(url.clone())).await {
                Ok(rsp) => {
                    fetched += 1;
                    if !rsp.is_success() {
                        tracing::warn!(target: "scheduler", %url, status = rsp.status, "refresh answered non-2xx");
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "scheduler", %url, error = %e, "refresh failed");
                    last_err = Some(e.to_string());
                }
            }
        }

        if fetched == 0 {
            let why = last_err.unwrap_or_else(|| "no refresh targets configured".to_string());
            return DeliveryResult::failed(format!("refresh failed: {why}"));
        }

        let summaries = self.collect(&mut rx, fetched).await;
        if summaries.is_empty() {
            return DeliveryResult::failed(format!(
                "no capture received within {}s",
                self.wait.as_secs()
            ));
        }

        let ok: Vec<&CaptureSummary> = summaries.iter().filter(|s| s.success).collect();
        if ok.is_empty() {
            let err = summaries
                .iter()
                .find_map(|s| s.error.clone())
                .unwrap_or_else(|| "delivery failed".to_string());
            return DeliveryResult::failed(err);
        }
        DeliveryResult::ok(ok.iter().map(|s| s.item_count).sum())
    }
}
