//! The `gateway` module defines the surface the adapter needs from a remote
//! command-dispatch server: one unary `dispatch` call and one bidirectional
//! stream carrying inbound commands and outbound flow-control, subscription
//! and response frames.
//!
//! - `connection`: the lazily resolved client handle shared by a context
//! - `memory`: an in-process server implementing [`CommandService`]

pub mod connection;
pub mod memory;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::utils::Result;

pub use connection::{ClientFactory, GatewayConnection};
pub use memory::InMemoryCommandBus;

/// Error code attached to replies for commands nobody subscribed to.
pub const NO_HANDLER_ERROR_CODE: &str = "CMDQ-4000";
/// Error code attached to replies whose handler went away before answering.
pub const HANDLER_GONE_ERROR_CODE: &str = "CMDQ-4001";

/// A command envelope as carried by both `dispatch` and the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub message_identifier: String,
    pub client_id: String,
    pub component_name: String,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error_code: String,
    pub message: String,
}

/// Reply to a dispatched command; written back on the stream by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_identifier: String,
    #[serde(default, with = "base64_bytes::option")]
    pub payload: Option<Vec<u8>>,
    #[serde(default)]
    pub error_message: Option<ErrorMessage>,
}

impl CommandResponse {
    pub fn success(request_identifier: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            request_identifier: request_identifier.into(),
            payload: Some(payload),
            error_message: None,
        }
    }

    pub fn failure(
        request_identifier: impl Into<String>,
        error_code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_identifier: request_identifier.into(),
            payload: None,
            error_message: Some(ErrorMessage {
                error_code: error_code.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// Frames a stream owner writes to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Grant the server `permits` more commands on this stream.
    FlowControl { client_id: String, permits: u64 },
    /// Declare interest in commands named `command`.
    Subscribe {
        client_id: String,
        component_name: String,
        command: String,
    },
    Response(CommandResponse),
}

/// An open bidirectional channel. Dropping `writer` closes the stream.
pub struct CommandStream {
    pub writer: UnboundedSender<OutboundFrame>,
    pub inbound: BoxStream<'static, Result<Command>>,
}

impl std::fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStream")
            .field("closed", &self.writer.is_closed())
            .finish_non_exhaustive()
    }
}

/// The RPC surface of a command-dispatch server.
#[async_trait]
pub trait CommandService: Send + Sync {
    /// Send a command and wait for its correlated reply. `None` means the
    /// server completed the call without a reply.
    async fn dispatch(&self, command: Command) -> Result<Option<CommandResponse>>;

    /// Open a new bidirectional command stream; the caller owns it.
    async fn open_stream(&self) -> Result<CommandStream>;
}

/// Client/component identity of a producer dispatching `command`.
pub fn producer_identity(app: &str, command: &str) -> String {
    format!("{app}-p-{command}")
}

/// Client/component identity of a consumer subscribing to `command`.
pub fn consumer_identity(app: &str, command: &str) -> String {
    format!("{app}-c-{command}")
}

pub(crate) fn receiver_stream<T: Send + 'static>(rx: UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
