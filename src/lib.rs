//! # cmdq
//!
//! `cmdq` is a message-queue adapter over a command-dispatch gateway. It
//! exposes the familiar queue vocabulary (connection factory, context,
//! producer, consumer, subscription consumer) on top of a server that only
//! knows how to dispatch named commands and stream them to subscribers.
//!
//! Sending a message dispatches it as a command and waits for the correlated
//! reply. Receiving means subscribing to routed commands over a flow-controlled
//! stream; acknowledging writes the reply back on that stream.
//!
//! ## Core Modules
//!
//! - `context`: `ConnectionFactory` and the `Context` handing out producers,
//!   consumers and destinations.
//! - `producer`: `DispatchProducer`, the sending half.
//! - `consumer`: `Consumer` and `SubscriptionConsumer`, the receiving half,
//!   plus flow-control credits.
//! - `gateway`: wire types, the `CommandService` trait, the lazily resolved
//!   connection, and an in-process command bus.
//! - `transport`: the WebSocket protocol, gateway server and client.
//! - `message`: the `Message` envelope, destinations and serializers.
//! - `routing`: the command → processor route table.
//! - `driver`: queue-client hints (delay, expiry, priority) mapped onto a producer.
//! - `config`: settings loading and DSN parsing.
//! - `utils`: error taxonomy and logging setup.

pub mod config;
pub mod consumer;
pub mod context;
pub mod driver;
pub mod gateway;
pub mod message;
pub mod producer;
pub mod routing;
pub mod transport;
pub mod utils;

pub use consumer::{ConsumeFlow, Consumer, SubscriptionConsumer};
pub use context::{ConnectionFactory, Context};
pub use message::{Destination, Message};
pub use producer::DispatchProducer;
pub use utils::{Capability, GatewayError, Result};

#[cfg(test)]
mod tests;
