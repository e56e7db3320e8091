//! Error types for the broker connection and the command publisher.

use thiserror::Error;

/// Failures surfaced synchronously to whoever called into the transport.
///
/// Nothing here is retried internally; connection-level drops are the reconnect
/// policy's job and never show up as a `TransportError` on their own.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection acknowledgment arrived before the connect guard fired.
    #[error("MQTT connection timeout after {0} ms")]
    ConnectionTimeout(u64),

    /// Publish attempted while the connection is not `connected`. Never queued.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The client refused the request (request channel closed or full).
    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    /// The connection dropped before the broker acknowledged the publish.
    #[error("Delivery acknowledgment lost for topic {0}")]
    AckLost(String),

    #[error("No delivery acknowledgment for topic {topic} within {timeout_ms} ms")]
    AckTimeout { topic: String, timeout_ms: u64 },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid broker configuration: {0}")]
    Configuration(String),
}

/// Errors raised by the outbound command publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Topic template not found for {category}/{key}")]
    UnknownTemplate { category: String, key: String },
}

pub type TransportResult<T> = Result<T, TransportError>;
