// src/bridge/channel.rs
//! Tagged message channel between execution contexts.
//!
//! Messages are plain JSON values (the structured-clone analogue). The sending
//! side stamps its `source` tag; the receiving side only yields envelopes whose
//! tag equals the one it was created with. Anything else sharing the channel is
//! dropped at the boundary.

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::CaptureError;

pub const API_CAPTURED: &str = "API_CAPTURED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Build a channel whose receiver only accepts envelopes stamped with `tag`.
pub fn context_channel(tag: impl Into<String>) -> (ContextSender, ContextReceiver) {
    let tag = tag.into();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ContextSender {
            tag: tag.clone(),
            tx,
        },
        ContextReceiver {
            expected_tag: tag,
            rx,
        },
    )
}

#[derive(Debug, Clone)]
pub struct ContextSender {
    tag: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl ContextSender {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Stamp `kind`/`data` with this sender's tag and post it. At-most-once.
    pub fn post(&self, kind: &str, data: Value) -> Result<(), CaptureError> {
        let msg = serde_json::json!({
            "source": self.tag,
            "type": kind,
            "data": data,
        });
        self.post_raw(msg)
    }

    /// Post an arbitrary message, as any other script on the page could.
    pub fn post_raw(&self, msg: Value) -> Result<(), CaptureError> {
        self.tx
            .send(msg)
            .map_err(|_| CaptureError::Transport("receiving context is gone".into()))
    }
}

#[derive(Debug)]
pub struct ContextReceiver {
    expected_tag: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ContextReceiver {
    pub fn expected_tag(&self) -> &str {
        &self.expected_tag
    }

    /// Next envelope carrying the expected tag; `None` once all senders are gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        while let Some(msg) = self.rx.recv().await {
            if let Some(env) = self.verify(msg) {
                return Some(env);
            }
        }
        None
    }

    fn verify(&self, msg: Value) -> Option<Envelope> {
        let tag_ok = msg.get("source").and_then(Value::as_str) == Some(self.expected_tag.as_str());
        if !tag_ok {
            counter!("bridge_foreign_messages_total").increment(1);
            tracing::debug!(target: "bridge", "ignored message with foreign or missing source tag");
            return None;
        }
        match serde_json::from_value::<Envelope>(msg) {
            Ok(env) => Some(env),
            Err(e) => {
                tracing::warn!(target: "bridge", error = %e, "tagged message without a valid envelope");
                None
            }
        }
    }
}
