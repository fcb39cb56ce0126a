//! The `consumer` module implements the receiving half of the adapter.
//!
//! - `subscription`: callback-driven consumption of one queue over a stream
//! - `plain`: a blocking facade over a single queue, plus acknowledgment
//! - `registry`: queue name → `(consumer, callback)` bookkeeping
//! - `credit` / `stream`: flow-control credits and the outbound stream side
//!
//! Both consumers open streams the same way: grant the initial permits, then
//! declare interest in every routed command. Inbound commands are decoded
//! with the context serializer and stamped with the processor resolved from
//! the route table.

pub mod credit;
pub mod plain;
pub mod registry;
pub mod stream;
pub mod subscription;

use futures::stream::BoxStream;
use tracing::{debug, warn};

use crate::context::Context;
use crate::gateway::{Command, CommandStream, consumer_identity};
use crate::message::Message;
use crate::utils::{Capability, GatewayError, Result};

pub use credit::{CreditWindow, FLOW_CONTROL_PERMITS};
pub use plain::Consumer;
pub use registry::{Subscription, SubscriptionRegistry};
pub use stream::StreamWriter;
pub use subscription::{Callback, ConsumeFlow, SubscriptionConsumer};

pub(crate) struct OpenedStream {
    pub writer: StreamWriter,
    pub inbound: BoxStream<'static, Result<Command>>,
}

/// Command names a stream for `queue` subscribes to: every routed command,
/// or the queue name itself when no routes are configured.
pub(crate) fn subscribed_commands(context: &Context, queue: &str) -> Vec<String> {
    let routes = context.routes();
    if routes.is_empty() {
        return vec![queue.to_string()];
    }
    routes.commands().into_iter().map(String::from).collect()
}

pub(crate) async fn open_command_stream(context: &Context, queue: &str) -> Result<OpenedStream> {
    let CommandStream { writer, inbound } = context.connection().open_stream().await?;
    let app = context.app_name();
    let writer = StreamWriter::new(consumer_identity(app, queue), writer, FLOW_CONTROL_PERMITS);

    writer.grant_initial()?;
    for command in subscribed_commands(context, queue) {
        writer.subscribe(consumer_identity(app, &command), &command)?;
    }
    debug!(queue, "command stream ready");

    Ok(OpenedStream { writer, inbound })
}

/// Turn an inbound command into the message handed to application code.
pub(crate) fn decode_command(context: &Context, command: Command) -> Result<Message> {
    let mut message = context.serializer().to_message(&command.payload)?;

    if message.topic().is_some() {
        return Err(GatewayError::Unsupported(Capability::TopicMessages));
    }

    if message.command().is_some() && message.processor().is_none() {
        match context.routes().lookup_processor(&command.name) {
            Some(processor) => message.set_processor(processor),
            None => warn!("no route for command {}", command.name),
        }
    }

    message.set_request_id(command.message_identifier);
    Ok(message)
}

#[cfg(test)]
mod tests;
