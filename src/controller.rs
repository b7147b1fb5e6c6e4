// src/controller.rs
//! Privileged context: control RPC, status badge, last-capture bookkeeping.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bridge::{CaptureSummary, PrivilegedMessage, PrivilegedReceiver};
use crate::scheduler::{Scheduler, SchedulerStatus, DEFAULT_INTERVAL_MINUTES};
use crate::state::{StateHandle, TaskRecord};

pub const BADGE_TTL: Duration = Duration::from_secs(3);
const BADGE_OK: (&str, &str) = ("✓", "#4CAF50");
const BADGE_FAIL: (&str, &str) = ("✗", "#f44336");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub color: String,
    pub set_at: DateTime<Utc>,
}

impl Badge {
    fn new((text, color): (&str, &str)) -> Self {
        Self {
            text: text.to_string(),
            color: color.to_string(),
            set_at: Utc::now(),
        }
    }
}

/// Scheduler control messages (`{"type": "START_SCHEDULER", "interval": 5}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    StartScheduler {
        #[serde(default)]
        interval: Option<i64>,
    },
    StopScheduler,
    GetSchedulerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SchedulerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    fn ok(status: Option<SchedulerStatus>) -> Self {
        Self {
            success: true,
            status,
            error: None,
        }
    }

    fn err(e: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            status: None,
            error: Some(e.to_string()),
        }
    }
}

pub struct Controller {
    scheduler: Scheduler,
    state: StateHandle,
    summaries: broadcast::Sender<CaptureSummary>,
    badge: Arc<Mutex<Option<Badge>>>,
    badge_ttl: Duration,
}

impl Controller {
    pub fn new(
        scheduler: Scheduler,
        state: StateHandle,
        summaries: broadcast::Sender<CaptureSummary>,
    ) -> Self {
        Self {
            scheduler,
            state,
            summaries,
            badge: Arc::new(Mutex::new(None)),
            badge_ttl: BADGE_TTL,
        }
    }

    pub fn with_badge_ttl(mut self, ttl: Duration) -> Self {
        self.badge_ttl = ttl;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn badge(&self) -> Option<Badge> {
        self.badge.lock().clone()
    }

    pub async fn handle(&self, req: ControlRequest) -> ControlResponse {
        tracing::info!(target: "controller", request = ?req, "control request");
        match req {
            ControlRequest::StartScheduler { interval } => {
                let minutes = interval.unwrap_or(i64::from(DEFAULT_INTERVAL_MINUTES));
                match self.scheduler.start(minutes).await {
                    Ok(()) => ControlResponse::ok(None),
                    Err(e) => {
                        tracing::warn!(target: "controller", error = %e, "start rejected");
                        ControlResponse::err(e)
                    }
                }
            }
            ControlRequest::StopScheduler => match self.scheduler.stop().await {
                Ok(()) => ControlResponse::ok(None),
                Err(e) => ControlResponse::err(e),
            },
            ControlRequest::GetSchedulerStatus => match self.scheduler.status().await {
                Ok(st) => ControlResponse::ok(Some(st)),
                Err(e) => ControlResponse::err(e),
            },
        }
    }

    pub async fn records(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.state.load().await?.task_records)
    }

    pub async fn last_capture(&self) -> Result<Option<CaptureSummary>> {
        Ok(self.state.load().await?.last_capture)
    }

    pub async fn on_message(&self, msg: PrivilegedMessage) {
        match msg {
            PrivilegedMessage::Captured(summary) => {
                tracing::info!(
                    target: "controller",
                    source = %summary.source,
                    url = %summary.url,
                    bytes = summary.size_bytes,
                    items = summary.item_count,
                    success = summary.success,
                    "capture summary received"
                );
                let last = summary.clone();
                if let Err(e) = self.state.update(move |st| st.last_capture = Some(last)).await {
                    tracing::error!(target: "controller", "persisting last capture failed: {e:#}");
                }
                self.set_badge(if summary.success { BADGE_OK } else { BADGE_FAIL });
                // no cycle waiting is fine
                let _ = self.summaries.send(summary);
            }
            PrivilegedMessage::PageLoadFailed { url, error } => {
                tracing::error!(target: "controller", %url, %error, "target page failed to load");
                self.set_badge(BADGE_FAIL);
            }
        }
    }

    /// Consume bridge messages until every bridge is gone.
    pub fn spawn_listener(self: &Arc<Self>, mut rx: PrivilegedReceiver) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                this.on_message(msg).await;
            }
            tracing::info!(target: "controller", "privileged inbox closed");
        })
    }

    fn set_badge(&self, kind: (&str, &str)) {
        let badge = Badge::new(kind);
        let set_at = badge.set_at;
        *self.badge.lock() = Some(badge);

        let slot = Arc::clone(&self.badge);
        let ttl = self.badge_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut b = slot.lock();
            if b.as_ref().is_some_and(|b| b.set_at == set_at) {
                *b = None;
            }
        });
    }
}
