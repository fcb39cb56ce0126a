//! The `context` module ties a gateway connection, a serializer, the
//! application identity and the route table together, and hands out the
//! producers, consumers and destinations that share them.
//!
//! `ConnectionFactory` (in `factory`) builds contexts from a DSN, an options
//! mapping, or a pre-built client handle.

pub mod factory;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::consumer::{Consumer, SubscriptionConsumer};
use crate::gateway::GatewayConnection;
use crate::message::{Destination, JsonSerializer, Message, Scalar, Serializer};
use crate::producer::DispatchProducer;
use crate::routing::RouteTable;
use crate::utils::{Capability, GatewayError, Result};

pub use factory::ConnectionFactory;

struct ContextShared {
    connection: GatewayConnection,
    serializer: RwLock<Arc<dyn Serializer>>,
    app_name: String,
    routes: RouteTable,
    redelivery_delay: Duration,
}

/// Shared handle; clones refer to the same connection and client.
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    pub fn new(
        connection: GatewayConnection,
        app_name: impl Into<String>,
        routes: RouteTable,
        redelivery_delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                connection,
                serializer: RwLock::new(Arc::new(JsonSerializer)),
                app_name: app_name.into(),
                routes,
                redelivery_delay,
            }),
        }
    }

    pub fn connection(&self) -> &GatewayConnection {
        &self.shared.connection
    }

    pub fn app_name(&self) -> &str {
        &self.shared.app_name
    }

    pub fn routes(&self) -> &RouteTable {
        &self.shared.routes
    }

    pub fn redelivery_delay(&self) -> Duration {
        self.shared.redelivery_delay
    }

    pub fn serializer(&self) -> Arc<dyn Serializer> {
        self.shared
            .serializer
            .read()
            .expect("serializer lock poisoned")
            .clone()
    }

    pub fn set_serializer(&self, serializer: Arc<dyn Serializer>) {
        *self
            .shared
            .serializer
            .write()
            .expect("serializer lock poisoned") = serializer;
    }

    pub fn create_message(
        &self,
        body: impl Into<Vec<u8>>,
        properties: BTreeMap<String, Scalar>,
        headers: BTreeMap<String, Scalar>,
    ) -> Message {
        Message::from_parts(body, properties, headers)
    }

    pub fn create_queue(&self, name: impl Into<String>) -> Destination {
        Destination::new(name)
    }

    pub fn create_topic(&self, name: impl Into<String>) -> Destination {
        Destination::new(name)
    }

    pub fn create_temporary_queue(&self) -> Result<Destination> {
        Err(GatewayError::Unsupported(Capability::TemporaryQueue))
    }

    pub fn create_producer(&self) -> DispatchProducer {
        DispatchProducer::new(self.clone())
    }

    pub fn create_consumer(&self, destination: &Destination) -> Consumer {
        Consumer::new(self.clone(), destination.clone(), self.redelivery_delay())
    }

    pub fn create_subscription_consumer(&self) -> SubscriptionConsumer {
        SubscriptionConsumer::new(self.clone(), self.redelivery_delay())
    }

    pub fn delete_queue(&self, _queue: &Destination) -> Result<()> {
        Err(GatewayError::Unsupported(Capability::QueueAdministration))
    }

    pub fn delete_topic(&self, _topic: &Destination) -> Result<()> {
        Err(GatewayError::Unsupported(Capability::QueueAdministration))
    }

    pub fn purge_queue(&self, _queue: &Destination) -> Result<()> {
        Err(GatewayError::Unsupported(Capability::QueueAdministration))
    }

    pub fn close(&self) -> Result<()> {
        Err(GatewayError::Unsupported(Capability::Close))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("app_name", &self.shared.app_name)
            .field("connection", &self.shared.connection)
            .field("routes", &self.shared.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests;
