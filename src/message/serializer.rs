//! Byte-level codec between [`Message`] and transport payloads.
//!
//! The default [`JsonSerializer`] writes `{"body", "properties", "headers"}`
//! with the body base64-encoded so arbitrary bytes survive the JSON layer.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::envelope::{Message, Scalar};
use crate::utils::{GatewayError, Result};

/// Pluggable codec used by the context to encode outbound and decode inbound
/// command payloads.
pub trait Serializer: Send + Sync + std::fmt::Debug {
    fn to_bytes(&self, message: &Message) -> Result<Vec<u8>>;

    fn to_message(&self, bytes: &[u8]) -> Result<Message>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonEnvelope {
    body: String,
    #[serde(default)]
    properties: BTreeMap<String, Scalar>,
    #[serde(default)]
    headers: BTreeMap<String, Scalar>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn to_bytes(&self, message: &Message) -> Result<Vec<u8>> {
        let non_finite = message
            .properties()
            .iter()
            .chain(message.headers())
            .find(|(_, value)| matches!(value, Scalar::Float(f) if !f.is_finite()));
        if let Some((name, value)) = non_finite {
            return Err(GatewayError::InvalidMessage(format!(
                "{name} holds a non-finite float: {value:?}"
            )));
        }

        let envelope = JsonEnvelope {
            body: STANDARD.encode(message.body()),
            properties: message.properties().clone(),
            headers: message.headers().clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn to_message(&self, bytes: &[u8]) -> Result<Message> {
        let envelope: JsonEnvelope = serde_json::from_slice(bytes)?;
        let body = STANDARD
            .decode(envelope.body.as_bytes())
            .map_err(|e| GatewayError::InvalidMessage(format!("body is not base64: {e}")))?;
        Ok(Message::from_parts(body, envelope.properties, envelope.headers))
    }
}
