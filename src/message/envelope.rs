//! Message envelope
//!
//! `Message` is the canonical in-memory representation shared by producers,
//! consumers and serializers. It carries an opaque body plus two scalar maps:
//!
//! - `properties`: routing metadata (command name, topic name, processor hint)
//! - `headers`: protocol metadata (`attempts`, `expires_at`) and the
//!   header-backed fields `message_id`, `reply_to`, `key`, `time_to_live` and
//!   `delivery_delay` (durations stored as milliseconds)
//!
//! Keeping the typed fields in headers means a serializer only has to carry
//! body, headers and properties to reproduce a message exactly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{COMMAND_PROPERTY, PROCESSOR_PROPERTY, TOPIC_PROPERTY};
use crate::utils::{GatewayError, Result};

pub const MESSAGE_ID_HEADER: &str = "message_id";
pub const REPLY_TO_HEADER: &str = "reply_to";
pub const KEY_HEADER: &str = "key";
pub const TIME_TO_LIVE_HEADER: &str = "time_to_live";
pub const DELIVERY_DELAY_HEADER: &str = "delivery_delay";
pub const ATTEMPTS_HEADER: &str = "attempts";
pub const EXPIRES_AT_HEADER: &str = "expires_at";

/// A scalar property or header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v.into())
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// Which delivery path a message takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Command(String),
    Topic(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    body: Vec<u8>,
    properties: BTreeMap<String, Scalar>,
    headers: BTreeMap<String, Scalar>,
    /// Identifier of the inbound command this message was decoded from.
    /// Never serialized.
    request_id: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn from_parts(
        body: impl Into<Vec<u8>>,
        properties: BTreeMap<String, Scalar>,
        headers: BTreeMap<String, Scalar>,
    ) -> Self {
        Self {
            body: body.into(),
            properties,
            headers,
            request_id: None,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn properties(&self) -> &BTreeMap<String, Scalar> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Scalar> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn headers(&self) -> &BTreeMap<String, Scalar> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Scalar> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.headers.insert(name.into(), value.into());
    }

    fn string_header(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(Scalar::as_str)
    }

    fn duration_header(&self, name: &str) -> Option<Duration> {
        self.header(name)
            .and_then(Scalar::as_i64)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    fn set_duration_header(&mut self, name: &str, value: Option<Duration>) -> Result<()> {
        match value {
            Some(d) => {
                let ms = i64::try_from(d.as_millis()).map_err(|_| {
                    GatewayError::InvalidMessage(format!("{name} of {d:?} is out of range"))
                })?;
                self.set_header(name, ms);
            }
            None => {
                self.headers.remove(name);
            }
        }
        Ok(())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.string_header(MESSAGE_ID_HEADER)
    }

    pub(crate) fn set_message_id(&mut self, id: String) {
        self.set_header(MESSAGE_ID_HEADER, id);
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.string_header(REPLY_TO_HEADER)
    }

    pub fn set_reply_to(&mut self, reply_to: impl Into<String>) {
        self.set_header(REPLY_TO_HEADER, reply_to.into());
    }

    /// Routing key; bound to the destination name when sent.
    pub fn key(&self) -> Option<&str> {
        self.string_header(KEY_HEADER)
    }

    pub(crate) fn set_key(&mut self, key: &str) {
        self.set_header(KEY_HEADER, key);
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.duration_header(TIME_TO_LIVE_HEADER)
    }

    /// Fails when the duration does not fit in whole milliseconds as `i64`.
    pub fn set_time_to_live(&mut self, ttl: Option<Duration>) -> Result<()> {
        self.set_duration_header(TIME_TO_LIVE_HEADER, ttl)
    }

    pub fn delivery_delay(&self) -> Option<Duration> {
        self.duration_header(DELIVERY_DELAY_HEADER)
    }

    pub fn set_delivery_delay(&mut self, delay: Option<Duration>) -> Result<()> {
        self.set_duration_header(DELIVERY_DELAY_HEADER, delay)
    }

    pub fn command(&self) -> Option<&str> {
        self.property(COMMAND_PROPERTY).and_then(Scalar::as_str)
    }

    pub fn set_command(&mut self, name: impl Into<String>) {
        self.set_property(COMMAND_PROPERTY, name.into());
    }

    pub fn topic(&self) -> Option<&str> {
        self.property(TOPIC_PROPERTY).and_then(Scalar::as_str)
    }

    pub fn set_topic(&mut self, name: impl Into<String>) {
        self.set_property(TOPIC_PROPERTY, name.into());
    }

    pub fn processor(&self) -> Option<&str> {
        self.property(PROCESSOR_PROPERTY).and_then(Scalar::as_str)
    }

    pub(crate) fn set_processor(&mut self, processor: &str) {
        self.set_property(PROCESSOR_PROPERTY, processor);
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub(crate) fn set_request_id(&mut self, id: String) {
        self.request_id = Some(id);
    }

    /// Classify the message. Exactly one of the command-name and topic-name
    /// properties must be present.
    pub fn kind(&self) -> Result<MessageKind> {
        match (self.command(), self.topic()) {
            (Some(_), Some(_)) => Err(GatewayError::InvalidMessage(
                "message is both a command and an event".to_string(),
            )),
            (Some(command), None) => Ok(MessageKind::Command(command.to_string())),
            (None, Some(topic)) => Ok(MessageKind::Topic(topic.to_string())),
            (None, None) => Err(GatewayError::InvalidMessage(
                "message is neither event nor command".to_string(),
            )),
        }
    }
}
