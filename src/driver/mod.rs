//! Client driver
//!
//! Translates the queue-client message hints (`cmdq.delay`, `cmdq.expire`,
//! `cmdq.priority`, all in seconds or by name) into producer settings and
//! sends the message to the queue named after its topic or command.

use std::time::Duration;

use crate::context::Context;
use crate::message::{
    DELAY_PROPERTY, Destination, EXPIRE_PROPERTY, Message, PRIORITY_PROPERTY, Scalar,
};
use crate::utils::{GatewayError, Result};

/// Priority names understood by the driver, lowest first.
pub const PRIORITY_NAMES: [&str; 5] = ["very_low", "low", "normal", "high", "very_high"];

#[derive(Debug, Clone)]
pub struct DriverSendResult {
    pub queue: Destination,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub struct Driver {
    context: Context,
}

impl Driver {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub async fn send_to_processor(&self, mut message: Message) -> Result<DriverSendResult> {
        let mut producer = self.context.create_producer();

        if let Some(delay) = seconds_property(&message, DELAY_PROPERTY) {
            producer.set_delivery_delay(Some(delay));
        }
        if let Some(expire) = seconds_property(&message, EXPIRE_PROPERTY) {
            producer.set_time_to_live(Some(expire));
        }
        if let Some(priority) = message.property(PRIORITY_PROPERTY) {
            producer.set_priority(Some(priority_level(priority)?))?;
        }

        let name = message
            .topic()
            .or(message.command())
            .ok_or_else(|| {
                GatewayError::InvalidMessage("message is neither event nor command".to_string())
            })?
            .to_string();
        let queue = self.context.create_queue(name);

        producer.send(&queue, &mut message).await?;
        Ok(DriverSendResult { queue, message })
    }
}

fn seconds_property(message: &Message, name: &str) -> Option<Duration> {
    message
        .property(name)
        .and_then(Scalar::as_i64)
        .and_then(|secs| u64::try_from(secs).ok())
        .map(Duration::from_secs)
}

fn priority_level(value: &Scalar) -> Result<u8> {
    let name = value.as_str().unwrap_or_default();
    PRIORITY_NAMES
        .iter()
        .position(|p| *p == name)
        .map(|level| level as u8)
        .ok_or_else(|| GatewayError::InvalidMessage(format!("unknown priority: {value:?}")))
}

#[cfg(test)]
mod tests;
