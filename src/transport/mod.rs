//! The `transport` module carries the command-dispatch protocol over
//! WebSockets.
//!
//! It defines the JSON frames exchanged with a gateway, a server that exposes
//! an [`InMemoryCommandBus`](crate::gateway::InMemoryCommandBus) to remote
//! clients, and [`WsCommandClient`], the [`CommandService`](crate::gateway::CommandService)
//! used by contexts built from a DSN.

pub mod client;
pub mod message;
pub mod websocket;

pub use client::WsCommandClient;
pub use message::{ClientFrame, ServerFrame};
pub use websocket::{serve, start_gateway_server};
