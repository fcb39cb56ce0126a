//! Error taxonomy for the command gateway.
//!
//! Every failure mode of the adapter is surfaced through [`GatewayError`];
//! no component recovers silently. Features the dispatch protocol cannot
//! express are reported as [`GatewayError::Unsupported`] carrying a typed
//! [`Capability`] so callers can match on the missing feature.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A queue feature the command-dispatch protocol has no delivery path for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DeliveryDelay,
    Priority,
    TopicMessages,
    CommandWithoutReply,
    MultiQueueSubscribe,
    Requeue,
    QueueAdministration,
    TemporaryQueue,
    Close,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::DeliveryDelay => "delayed delivery",
            Capability::Priority => "message priority",
            Capability::TopicMessages => "topic/event messages",
            Capability::CommandWithoutReply => "commands without reply",
            Capability::MultiQueueSubscribe => "subscribing to more than one queue",
            Capability::Requeue => "requeue on reject",
            Capability::QueueAdministration => "queue administration",
            Capability::TemporaryQueue => "temporary queues",
            Capability::Close => "closing the context",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unsupported: {0}")]
    Unsupported(Capability),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("destination error: {0}")]
    Destination(String),
    #[error("communication error: {0}")]
    Communication(String),
    #[error("there is a consumer subscribed to queue: \"{queue}\"")]
    SubscriptionConflict { queue: String },
    #[error("no subscribers")]
    NoSubscribers,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl GatewayError {
    /// The missing capability, if this is an `Unsupported` error.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            GatewayError::Unsupported(c) => Some(*c),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for GatewayError {
    fn from(e: tungstenite::Error) -> Self {
        GatewayError::Communication(e.to_string())
    }
}
