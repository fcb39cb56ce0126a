//! Subscription consumer
//!
//! Owns the registry of queue subscriptions and runs the read loop:
//!
//! 1. open one stream, grant the initial permits, subscribe to every routed
//!    command (the setup phase, bounded by the `consume` timeout)
//! 2. read inbound commands one at a time, decode them, and hand each to the
//!    callback registered for the queue together with its consumer
//! 3. stop when a callback returns [`ConsumeFlow::Stop`] or the cancellation
//!    token fires; a stream that ends on its own is a communication error
//!
//! Inbound commands carry no queue name, so only one queue can be consumed
//! per stream; registering more is refused before any stream is opened.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::plain::Consumer;
use super::registry::SubscriptionRegistry;
use super::{OpenedStream, decode_command, open_command_stream};
use crate::context::Context;
use crate::message::Message;
use crate::utils::{Capability, GatewayError, Result};

/// What the read loop does after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeFlow {
    Continue,
    Stop,
}

impl From<bool> for ConsumeFlow {
    /// `false` stops consumption.
    fn from(keep_going: bool) -> Self {
        if keep_going {
            ConsumeFlow::Continue
        } else {
            ConsumeFlow::Stop
        }
    }
}

pub type Callback = Arc<dyn Fn(&Message, &Consumer) -> ConsumeFlow + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Message, &Consumer) -> ConsumeFlow + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct SubscriptionConsumer {
    context: Context,
    registry: SubscriptionRegistry,
    redelivery_delay: Duration,
    shutdown: CancellationToken,
}

impl SubscriptionConsumer {
    pub(crate) fn new(context: Context, redelivery_delay: Duration) -> Self {
        Self {
            context,
            registry: SubscriptionRegistry::new(),
            redelivery_delay,
            shutdown: CancellationToken::new(),
        }
    }

    /// Currently informational; no requeue path applies it.
    pub fn redelivery_delay(&self) -> Duration {
        self.redelivery_delay
    }

    pub fn set_redelivery_delay(&mut self, delay: Duration) {
        self.redelivery_delay = delay;
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn subscribe(&mut self, consumer: &Consumer, callback: Callback) -> Result<()> {
        self.registry.subscribe(consumer, callback)
    }

    pub fn unsubscribe(&mut self, consumer: &Consumer) {
        if !self.registry.unsubscribe(consumer) {
            debug!(queue = %consumer.queue(), "unsubscribe ignored, consumer not registered");
        }
    }

    pub fn unsubscribe_all(&mut self) {
        self.registry.clear();
    }

    /// Token that ends a running `consume` loop when cancelled. Cancellation
    /// is permanent for this subscription consumer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the read loop. A non-zero `timeout` bounds stream setup only; once
    /// reading has started the loop runs until a callback stops it, the
    /// cancellation token fires, or the stream fails.
    pub async fn consume(&mut self, timeout: Duration) -> Result<()> {
        if self.registry.is_empty() {
            return Err(GatewayError::NoSubscribers);
        }
        let Some(subscription) = self.registry.single().cloned() else {
            return Err(GatewayError::Unsupported(Capability::MultiQueueSubscribe));
        };
        let queue = subscription.consumer.queue().name().to_string();

        let setup = open_command_stream(&self.context, &queue);
        let OpenedStream { writer, mut inbound } = if timeout.is_zero() {
            setup.await?
        } else {
            tokio::time::timeout(timeout, setup)
                .await
                .map_err(|_| GatewayError::Timeout(timeout))??
        };
        info!(%queue, "consuming");

        let consumer = subscription.consumer;
        let callback = subscription.callback;
        consumer.attach(writer.clone());

        let outcome = loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                next = inbound.next() => Some(next),
            };
            let Some(next) = next else {
                info!(%queue, "consume cancelled");
                break Ok(());
            };

            let command = match next {
                Some(Ok(command)) => command,
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(GatewayError::Communication(
                        "command stream closed by server".to_string(),
                    ));
                }
            };

            writer.record_receipt(&command.message_identifier);
            let message = match decode_command(&self.context, command) {
                Ok(message) => message,
                Err(e) => break Err(e),
            };

            if callback(&message, &consumer) == ConsumeFlow::Stop {
                debug!(%queue, "callback requested stop");
                break Ok(());
            }
        };

        consumer.detach();
        outcome
    }
}

impl std::fmt::Debug for SubscriptionConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionConsumer")
            .field("queues", &self.registry.queue_names())
            .field("redelivery_delay", &self.redelivery_delay)
            .finish_non_exhaustive()
    }
}
