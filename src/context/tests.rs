use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::ConnectionOptions;
use crate::gateway::{CommandService, InMemoryCommandBus};
use crate::message::COMMAND_PROPERTY;
use crate::routing::Route;

fn memory_context() -> Context {
    let bus: Arc<dyn CommandService> = Arc::new(InMemoryCommandBus::new());
    ConnectionFactory::with_client(bus).create_context("shop", RouteTable::default())
}

#[test]
fn test_create_message_keeps_parts() {
    let context = memory_context();
    let mut properties = BTreeMap::new();
    properties.insert(COMMAND_PROPERTY.to_string(), Scalar::from("CreateOrder"));
    let mut headers = BTreeMap::new();
    headers.insert("trace".to_string(), Scalar::from(7));

    let message = context.create_message("{}", properties, headers);

    assert_eq!(message.body(), b"{}");
    assert_eq!(message.command(), Some("CreateOrder"));
    assert_eq!(message.header("trace"), Some(&Scalar::Int(7)));
}

#[test]
fn test_queues_and_topics_are_plain_destinations() {
    let context = memory_context();
    assert_eq!(context.create_queue("orders"), context.create_topic("orders"));
    assert_eq!(context.create_queue("orders").name(), "orders");
}

#[test]
fn test_administration_is_unsupported() {
    let context = memory_context();
    let queue = context.create_queue("orders");

    let results = [
        (context.delete_queue(&queue), Capability::QueueAdministration),
        (context.delete_topic(&queue), Capability::QueueAdministration),
        (context.purge_queue(&queue), Capability::QueueAdministration),
        (context.close(), Capability::Close),
    ];
    for (result, expected) in results {
        assert_eq!(result.unwrap_err().capability(), Some(expected));
    }
    assert_eq!(
        context.create_temporary_queue().unwrap_err().capability(),
        Some(Capability::TemporaryQueue)
    );
}

#[test]
fn test_consumers_inherit_redelivery_delay() {
    let factory = ConnectionFactory::from_dsn("cmdq://localhost?redelivery_delay=42").unwrap();
    let context = factory.create_context("shop", RouteTable::default());
    let queue = context.create_queue("orders");

    assert_eq!(context.redelivery_delay(), Duration::from_secs(42));
    assert_eq!(
        context.create_consumer(&queue).redelivery_delay(),
        Duration::from_secs(42)
    );
    assert_eq!(
        context.create_subscription_consumer().redelivery_delay(),
        Duration::from_secs(42)
    );
}

#[test]
fn test_lazy_factory_defers_client() {
    let factory = ConnectionFactory::from_dsn("cmdq://localhost:9").unwrap();
    let context = factory.create_context("shop", RouteTable::default());
    assert!(!context.connection().is_resolved());

    let eager = ConnectionFactory::from_dsn("cmdq://localhost:9?lazy=false").unwrap();
    let context = eager.create_context("shop", RouteTable::default());
    assert!(context.connection().is_resolved());
}

#[test]
fn test_injected_client_is_used_as_is() {
    let bus = InMemoryCommandBus::new();
    let client: Arc<dyn CommandService> = Arc::new(bus);
    let context =
        ConnectionFactory::with_client(client.clone()).create_context("shop", RouteTable::default());

    let resolved = context.connection().resolve_client().unwrap();
    assert!(Arc::ptr_eq(&resolved, &client));
}

#[test]
fn test_factory_from_options() {
    let factory = ConnectionFactory::from_options(ConnectionOptions {
        host: Some("gateway".to_string()),
        port: Some(9001),
        ..ConnectionOptions::default()
    })
    .unwrap();
    assert_eq!(factory.config().endpoint(), "gateway:9001");
}

#[test]
fn test_context_clones_share_state() {
    let routes: RouteTable = [Route::new("CreateOrder", "orderProcessor")]
        .into_iter()
        .collect();
    let bus: Arc<dyn CommandService> = Arc::new(InMemoryCommandBus::new());
    let context = ConnectionFactory::with_client(bus).create_context("shop", routes);
    let clone = context.clone();

    assert_eq!(clone.app_name(), "shop");
    assert_eq!(clone.routes().lookup_processor("CreateOrder"), Some("orderProcessor"));

    let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
    context.set_serializer(serializer.clone());
    assert!(Arc::ptr_eq(&clone.serializer(), &serializer));
}
