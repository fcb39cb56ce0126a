//! End-to-end tests: contexts built from a DSN talking to a gateway server
//! over WebSocket, and to the in-process bus directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;

use crate::consumer::subscription::callback;
use crate::driver::Driver;
use crate::gateway::InMemoryCommandBus;
use crate::routing::{Route, RouteTable};
use crate::transport::serve;
use crate::{ConnectionFactory, ConsumeFlow, GatewayError, Message};

async fn start_gateway() -> (u16, InMemoryCommandBus) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let bus = InMemoryCommandBus::new();
    tokio::spawn(serve(listener, bus.clone()));
    (port, bus)
}

async fn wait_for_handler(bus: &InMemoryCommandBus, command: &str) {
    for _ in 0..300 {
        if bus.handler_count(command) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no handler registered for {command}");
}

fn ping_routes() -> RouteTable {
    [Route::new("Ping", "pingProcessor")].into_iter().collect()
}

fn ping() -> Message {
    let mut message = Message::new("ping");
    message.set_command("Ping");
    message.set_reply_to("pong");
    message
}

#[tokio::test]
async fn test_ping_over_websocket_gateway() {
    let (port, bus) = start_gateway().await;
    let factory = ConnectionFactory::from_dsn(&format!("cmdq://127.0.0.1:{port}")).unwrap();
    let context = factory.create_context("shop", ping_routes());
    let queue = context.create_queue("pings");

    let processors = Arc::new(Mutex::new(Vec::new()));
    let recorded = processors.clone();
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(
            &context.create_consumer(&queue),
            callback(move |message, consumer| {
                recorded
                    .lock()
                    .unwrap()
                    .push(message.processor().unwrap_or_default().to_string());
                consumer.acknowledge(message).unwrap();
                ConsumeFlow::Stop
            }),
        )
        .unwrap();
    let running = tokio::spawn(async move { subscription.consume(Duration::from_secs(5)).await });
    wait_for_handler(&bus, "Ping").await;

    let mut message = ping();
    let reply = context
        .create_producer()
        .request(&queue, &mut message)
        .await
        .unwrap()
        .expect("acknowledgment");

    assert_eq!(reply.body(), b"received");
    running.await.unwrap().unwrap();
    assert_eq!(*processors.lock().unwrap(), vec!["pingProcessor".to_string()]);
}

#[tokio::test]
async fn test_driver_over_websocket_without_handler() {
    let (port, _bus) = start_gateway().await;
    let factory = ConnectionFactory::from_dsn(&format!("cmdq://127.0.0.1:{port}")).unwrap();
    let driver = Driver::new(factory.create_context("shop", ping_routes()));

    let err = driver.send_to_processor(ping()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Destination(ref msg) if msg.contains("No handler")));
}

#[tokio::test]
async fn test_unreachable_gateway_is_communication_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let factory = ConnectionFactory::from_dsn(&format!("cmdq://127.0.0.1:{port}")).unwrap();
    let context = factory.create_context("shop", ping_routes());

    let mut message = ping();
    let err = context
        .create_producer()
        .send(&context.create_queue("pings"), &mut message)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Communication(_)));
}

#[tokio::test]
async fn test_ping_over_memory_bus_keeps_consuming() {
    let bus = InMemoryCommandBus::new();
    let context =
        ConnectionFactory::with_client(Arc::new(bus.clone())).create_context("shop", ping_routes());
    let queue = context.create_queue("pings");

    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(
            &context.create_consumer(&queue),
            callback(move |message, consumer| {
                consumer.acknowledge(message).unwrap();
                let mut seen = counter.lock().unwrap();
                *seen += 1;
                ConsumeFlow::from(*seen < 3)
            }),
        )
        .unwrap();
    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    wait_for_handler(&bus, "Ping").await;

    let producer = context.create_producer();
    for _ in 0..3 {
        let mut message = ping();
        producer.send(&queue, &mut message).await.unwrap();
    }

    running.await.unwrap().unwrap();
    assert_eq!(*count.lock().unwrap(), 3);
}
