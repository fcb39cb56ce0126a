//! Plain consumer
//!
//! `Consumer` is bound to one queue. It can pull messages itself through
//! `receive`, or be registered with a `SubscriptionConsumer` whose read loop
//! lends it the open stream while callbacks run. Either way, acknowledging a
//! message writes a response frame on the stream the command arrived on,
//! which is what releases the producer blocked in `dispatch`. A lent stream
//! sits beside the consumer's own one and takes precedence until returned.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

use super::stream::StreamWriter;
use super::{OpenedStream, decode_command, open_command_stream};
use crate::context::Context;
use crate::gateway::{Command, CommandResponse};
use crate::message::{Destination, Message};
use crate::utils::{Capability, GatewayError, Result};

/// Slice used when `receive` is asked to block forever.
pub const BLOCKING_POLL_SLICE: Duration = Duration::from_secs(5);

/// Body of the reply written by a plain acknowledgment.
pub const RECEIVED_MARKER: &str = "received";

struct ConsumerInner {
    context: Context,
    queue: Destination,
    redelivery_delay: Mutex<Duration>,
    writer: Mutex<Option<StreamWriter>>,
    lent_writer: Mutex<Option<StreamWriter>>,
    inbound: tokio::sync::Mutex<Option<BoxStream<'static, Result<Command>>>>,
}

enum Wait {
    NoWait,
    Within(Duration),
}

/// Cloning yields another handle to the same consumer; identity is shared.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub(crate) fn new(context: Context, queue: Destination, redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                context,
                queue,
                redelivery_delay: Mutex::new(redelivery_delay),
                writer: Mutex::new(None),
                lent_writer: Mutex::new(None),
                inbound: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &Destination {
        &self.inner.queue
    }

    /// Whether both handles refer to the same consumer.
    pub fn same(&self, other: &Consumer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Currently informational; no requeue path applies it.
    pub fn redelivery_delay(&self) -> Duration {
        *self.lock_delay()
    }

    pub fn set_redelivery_delay(&self, delay: Duration) {
        *self.lock_delay() = delay;
    }

    fn lock_delay(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.inner
            .redelivery_delay
            .lock()
            .expect("redelivery delay lock poisoned")
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<StreamWriter>> {
        self.inner.writer.lock().expect("stream writer lock poisoned")
    }

    fn lock_lent_writer(&self) -> std::sync::MutexGuard<'_, Option<StreamWriter>> {
        self.inner
            .lent_writer
            .lock()
            .expect("lent stream writer lock poisoned")
    }

    /// Lend the writer of a stream read by someone else. The consumer's own
    /// stream, if any, is left open.
    pub(crate) fn attach(&self, writer: StreamWriter) {
        *self.lock_lent_writer() = Some(writer);
    }

    pub(crate) fn detach(&self) {
        self.lock_lent_writer().take();
    }

    fn writer(&self) -> Result<StreamWriter> {
        if let Some(writer) = self.lock_lent_writer().clone() {
            return Ok(writer);
        }
        self.lock_writer()
            .clone()
            .ok_or_else(|| GatewayError::Communication("no open command stream".to_string()))
    }

    /// Wait up to `timeout` for the next message. A zero timeout blocks until
    /// a message arrives and never yields `None`.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<Message>> {
        if timeout.is_zero() {
            loop {
                if let Some(message) = self.poll(Wait::Within(BLOCKING_POLL_SLICE)).await? {
                    return Ok(Some(message));
                }
            }
        }
        self.poll(Wait::Within(timeout)).await
    }

    /// Return a message only if one is already waiting on the stream.
    pub async fn receive_no_wait(&self) -> Result<Option<Message>> {
        self.poll(Wait::NoWait).await
    }

    async fn poll(&self, wait: Wait) -> Result<Option<Message>> {
        let mut inbound = self.inner.inbound.lock().await;
        if inbound.is_none() {
            let OpenedStream { writer, inbound: stream } =
                open_command_stream(&self.inner.context, self.queue().name()).await?;
            *self.lock_writer() = Some(writer);
            *inbound = Some(stream);
        }
        let Some(stream) = inbound.as_mut() else {
            return Err(GatewayError::Communication("no open command stream".to_string()));
        };

        let next = match wait {
            Wait::NoWait => match stream.next().now_or_never() {
                Some(next) => next,
                None => return Ok(None),
            },
            Wait::Within(timeout) => match tokio::time::timeout(timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            },
        };

        match next {
            Some(Ok(command)) => {
                if let Some(writer) = self.lock_writer().as_ref() {
                    writer.record_receipt(&command.message_identifier);
                }
                debug!(queue = %self.queue(), "received {}", command.name);
                decode_command(&self.inner.context, command).map(Some)
            }
            Some(Err(e)) => Err(e),
            None => {
                *inbound = None;
                self.lock_writer().take();
                Err(GatewayError::Communication(
                    "command stream closed by server".to_string(),
                ))
            }
        }
    }

    /// Tell the dispatcher the command was received.
    pub fn acknowledge(&self, message: &Message) -> Result<()> {
        self.respond(message, &Message::new(RECEIVED_MARKER))
    }

    /// Complete the command with `reply` as the dispatcher's result.
    pub fn respond(&self, message: &Message, reply: &Message) -> Result<()> {
        let request_id = Self::request_id(message)?;
        let payload = self.inner.context.serializer().to_bytes(reply)?;
        self.writer()?
            .respond(CommandResponse::success(request_id, payload))
    }

    /// Complete the command with an error the dispatcher will surface.
    pub fn respond_error(&self, message: &Message, error_code: &str, reason: &str) -> Result<()> {
        let request_id = Self::request_id(message)?;
        self.writer()?
            .respond(CommandResponse::failure(request_id, error_code, reason))
    }

    /// Acknowledge, then refuse `requeue`: the protocol has no republish path.
    pub fn reject(&self, message: &Message, requeue: bool) -> Result<()> {
        self.acknowledge(message)?;
        if requeue {
            return Err(GatewayError::Unsupported(Capability::Requeue));
        }
        Ok(())
    }

    fn request_id(message: &Message) -> Result<&str> {
        message.request_id().ok_or_else(|| {
            GatewayError::InvalidMessage(
                "message was not received from a command stream".to_string(),
            )
        })
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", self.queue())
            .field("redelivery_delay", &self.redelivery_delay())
            .finish_non_exhaustive()
    }
}
