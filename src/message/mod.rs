//! The `message` module defines the wire-agnostic envelope exchanged between
//! producers and consumers, the destination naming type, and the pluggable
//! byte-level codec used to put messages on the transport.

pub mod destination;
pub mod envelope;
pub mod serializer;

pub use destination::Destination;
pub use envelope::{Message, Scalar};
pub use serializer::{JsonSerializer, Serializer};

/// Property naming the command a message targets.
pub const COMMAND_PROPERTY: &str = "cmdq.command";
/// Property naming the topic of an event message.
pub const TOPIC_PROPERTY: &str = "cmdq.topic";
/// Property carrying the processor resolved from the route table.
pub const PROCESSOR_PROPERTY: &str = "cmdq.processor";
/// Driver hint: delivery delay in seconds.
pub const DELAY_PROPERTY: &str = "cmdq.delay";
/// Driver hint: expiration in seconds.
pub const EXPIRE_PROPERTY: &str = "cmdq.expire";
/// Driver hint: priority name.
pub const PRIORITY_PROPERTY: &str = "cmdq.priority";
