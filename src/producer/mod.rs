//! Dispatch producer
//!
//! Sending a message means dispatching it as a command and waiting for the
//! handler's reply; a completed call is the acknowledgment. Before anything
//! reaches the network the producer stamps the message (id, attempts, key,
//! expiry), serializes it, and refuses every feature the dispatch protocol
//! cannot carry: delayed delivery, priority, events, and commands nobody
//! waits on. Nothing is retried here.

use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::context::Context;
use crate::gateway::{Command, producer_identity};
use crate::message::envelope::{ATTEMPTS_HEADER, EXPIRES_AT_HEADER, MessageKind};
use crate::message::{Destination, Message};
use crate::utils::{Capability, GatewayError, Result};

#[derive(Debug, Clone)]
pub struct DispatchProducer {
    context: Context,
    time_to_live: Option<Duration>,
    delivery_delay: Option<Duration>,
}

impl DispatchProducer {
    pub(crate) fn new(context: Context) -> Self {
        Self {
            context,
            time_to_live: None,
            delivery_delay: None,
        }
    }

    /// Default TTL for messages that do not set their own.
    pub fn set_time_to_live(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.time_to_live = ttl;
        self
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    /// Default delivery delay for messages that do not set their own. Any
    /// effective delay makes `send` fail.
    pub fn set_delivery_delay(&mut self, delay: Option<Duration>) -> &mut Self {
        self.delivery_delay = delay;
        self
    }

    pub fn delivery_delay(&self) -> Option<Duration> {
        self.delivery_delay
    }

    pub fn set_priority(&mut self, priority: Option<u8>) -> Result<&mut Self> {
        match priority {
            None => Ok(self),
            Some(_) => Err(GatewayError::Unsupported(Capability::Priority)),
        }
    }

    pub fn priority(&self) -> Option<u8> {
        None
    }

    /// Dispatch `message` to `destination` and wait for the reply.
    pub async fn send(&self, destination: &Destination, message: &mut Message) -> Result<()> {
        self.request(destination, message).await.map(|_| ())
    }

    /// Like `send`, returning the decoded reply payload, if the handler sent one.
    pub async fn request(
        &self,
        destination: &Destination,
        message: &mut Message,
    ) -> Result<Option<Message>> {
        let kind = message.kind()?;

        message.set_message_id(Uuid::new_v4().to_string());
        message.set_header(ATTEMPTS_HEADER, 0);
        message.set_key(destination.name());

        if message.time_to_live().is_none() && self.time_to_live.is_some() {
            message.set_time_to_live(self.time_to_live)?;
        }
        if message.delivery_delay().is_none() && self.delivery_delay.is_some() {
            message.set_delivery_delay(self.delivery_delay)?;
        }
        if let Some(ttl) = message.time_to_live() {
            let expires_at = i64::try_from(ttl.as_millis())
                .ok()
                .and_then(|ms| chrono::Utc::now().timestamp_millis().checked_add(ms))
                .ok_or_else(|| {
                    GatewayError::InvalidMessage(format!("expiry for a TTL of {ttl:?} overflows"))
                })?;
            message.set_header(EXPIRES_AT_HEADER, expires_at);
        }

        let serializer = self.context.serializer();
        let payload = serializer.to_bytes(message)?;

        if message.delivery_delay().is_some() {
            return Err(GatewayError::Unsupported(Capability::DeliveryDelay));
        }
        let name = match kind {
            MessageKind::Topic(_) => {
                return Err(GatewayError::Unsupported(Capability::TopicMessages));
            }
            MessageKind::Command(name) => name,
        };
        if message.reply_to().is_none() {
            return Err(GatewayError::Unsupported(Capability::CommandWithoutReply));
        }

        let identity = producer_identity(self.context.app_name(), &name);
        let command = Command {
            message_identifier: message.message_id().unwrap_or_default().to_string(),
            client_id: identity.clone(),
            component_name: identity,
            name,
            payload,
        };
        debug!(
            command = %command.name,
            destination = %destination,
            id = %command.message_identifier,
            "dispatching"
        );

        let reply = self
            .context
            .connection()
            .dispatch(command)
            .await?
            .ok_or_else(|| GatewayError::Destination("Reply is null".to_string()))?;
        if let Some(error) = reply.error_message {
            return Err(GatewayError::Destination(error.message));
        }

        reply
            .payload
            .map(|payload| serializer.to_message(&payload))
            .transpose()
    }
}
