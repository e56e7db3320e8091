use std::str::Utf8Error;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::router::{CommandRouter, RouteOutcome};

/// Raw message as delivered by the broker, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    /// Short payload preview for log lines.
    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        let mut preview: String = text.chars().take(64).collect();
        if text.chars().count() > 64 {
            preview.push('…');
        }
        preview
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// UTF-8 text first, then structured JSON.
pub fn decode_payload(bytes: &[u8]) -> Result<Value, PayloadError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}

/// Outbound command wrapper. `requestId` is the only correlation handle; nothing tracks replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub timestamp: i64,
    pub payload: Value,
    pub request_id: String,
}

impl CommandEnvelope {
    pub fn new(payload: Value) -> Self {
        CommandEnvelope {
            timestamp: epoch_millis(),
            payload,
            request_id: new_request_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub timestamp: i64,
    pub status: ReplyStatus,
    pub payload: Value,
}

impl ReplyEnvelope {
    pub fn new(payload: Value, success: bool) -> Self {
        ReplyEnvelope {
            timestamp: epoch_millis(),
            status: if success {
                ReplyStatus::Success
            } else {
                ReplyStatus::Error
            },
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub timestamp: i64,
    pub payload: Value,
}

impl BroadcastEnvelope {
    pub fn new(payload: Value) -> Self {
        BroadcastEnvelope {
            timestamp: epoch_millis(),
            payload,
        }
    }
}

pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `req_<epoch millis>_<9 random hex chars>`
pub fn new_request_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{}_{}", epoch_millis(), &random[..9])
}

/// Single consumer of the inbound queue.
///
/// The connection's event loop is the only writer and this task the only reader, so
/// messages reach the router one at a time and in broker delivery order.
pub struct MsgManager {
    distribution_msg: mpsc::Receiver<InboundMessage>,
}

impl MsgManager {
    pub fn new(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (received_msg, distribution_msg) = mpsc::channel(capacity);
        (received_msg, MsgManager { distribution_msg })
    }

    /// Runs until every sender is gone.
    pub fn spawn_dispatcher(self, router: Arc<CommandRouter>) -> JoinHandle<()> {
        let mut receiver = self.distribution_msg;
        tokio::spawn(async move {
            info!("Inbound dispatcher started");
            while let Some(message) = receiver.recv().await {
                dispatch_message(&router, message).await;
            }
            info!("Inbound dispatcher stopped");
        })
    }
}

/// Decodes one inbound message and hands it to the router.
///
/// A payload that fails to decode is logged and dropped; it never reaches a handler and is
/// never retried.
pub async fn dispatch_message(
    router: &CommandRouter,
    message: InboundMessage,
) -> Option<RouteOutcome> {
    debug!(topic = %message.topic, payload = %message.preview(), "Message received");

    match decode_payload(&message.payload) {
        Ok(payload) => Some(router.route(&message.topic, payload).await),
        Err(e) => {
            error!(topic = %message.topic, error = %e, "Message handling error");
            None
        }
    }
}
