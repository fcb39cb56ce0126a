use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::subscription::callback;
use super::*;
use crate::context::ConnectionFactory;
use crate::gateway::{
    Command, CommandResponse, CommandService, InMemoryCommandBus, OutboundFrame,
};
use crate::message::{Destination, JsonSerializer, Serializer};
use crate::routing::{Route, RouteTable};

fn memory_context(routes: RouteTable) -> (Context, InMemoryCommandBus) {
    let bus = InMemoryCommandBus::new();
    let context =
        ConnectionFactory::with_client(Arc::new(bus.clone())).create_context("shop", routes);
    (context, bus)
}

fn order_routes() -> RouteTable {
    [Route::new("CreateOrder", "orderProcessor")]
        .into_iter()
        .collect()
}

fn order_message() -> Message {
    let mut message = Message::new(r#"{"sku":"A-1"}"#);
    message.set_command("CreateOrder");
    message.set_reply_to("shop-replies");
    message
}

async fn wait_for_handler(bus: &InMemoryCommandBus, command: &str) {
    for _ in 0..200 {
        if bus.handler_count(command) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no handler registered for {command}");
}

fn stop_after_ack() -> Callback {
    callback(|message, consumer| {
        consumer.acknowledge(message).unwrap();
        ConsumeFlow::Stop
    })
}

/// Never finishes opening a stream.
struct StalledService;

#[async_trait]
impl CommandService for StalledService {
    async fn dispatch(&self, _command: Command) -> Result<Option<CommandResponse>> {
        Ok(None)
    }

    async fn open_stream(&self) -> Result<crate::gateway::CommandStream> {
        futures::future::pending().await
    }
}

#[test]
fn test_consume_flow_from_bool() {
    assert_eq!(ConsumeFlow::from(true), ConsumeFlow::Continue);
    assert_eq!(ConsumeFlow::from(false), ConsumeFlow::Stop);
}

#[tokio::test]
async fn test_resubscribing_same_pair_is_noop() {
    let (context, _bus) = memory_context(RouteTable::default());
    let consumer = context.create_consumer(&Destination::new("orders"));
    let handler = stop_after_ack();
    let mut subscription = context.create_subscription_consumer();

    subscription.subscribe(&consumer, handler.clone()).unwrap();
    subscription.subscribe(&consumer.clone(), handler).unwrap();

    assert_eq!(subscription.registry().len(), 1);
}

#[tokio::test]
async fn test_second_handler_for_queue_conflicts() {
    let (context, _bus) = memory_context(RouteTable::default());
    let queue = Destination::new("orders");
    let first = context.create_consumer(&queue);
    let second = context.create_consumer(&queue);
    let mut subscription = context.create_subscription_consumer();

    subscription.subscribe(&first, stop_after_ack()).unwrap();

    let err = subscription.subscribe(&first, stop_after_ack()).unwrap_err();
    assert!(matches!(err, GatewayError::SubscriptionConflict { ref queue } if queue == "orders"));
    let err = subscription.subscribe(&second, stop_after_ack()).unwrap_err();
    assert!(matches!(err, GatewayError::SubscriptionConflict { .. }));
}

#[tokio::test]
async fn test_unsubscribe_ignores_other_consumer() {
    let (context, _bus) = memory_context(RouteTable::default());
    let queue = Destination::new("orders");
    let registered = context.create_consumer(&queue);
    let stranger = context.create_consumer(&queue);
    let mut subscription = context.create_subscription_consumer();
    subscription.subscribe(&registered, stop_after_ack()).unwrap();

    subscription.unsubscribe(&stranger);
    assert!(subscription.registry().get("orders").is_some());

    subscription.unsubscribe(&registered);
    assert!(subscription.registry().is_empty());

    subscription.subscribe(&stranger, stop_after_ack()).unwrap();
    subscription.unsubscribe_all();
    assert!(subscription.registry().is_empty());
}

#[tokio::test]
async fn test_consume_without_subscribers() {
    let (context, bus) = memory_context(RouteTable::default());
    let mut subscription = context.create_subscription_consumer();

    let err = subscription.consume(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoSubscribers));
    assert_eq!(bus.stream_count(), 0);
}

#[tokio::test]
async fn test_multi_queue_fails_before_opening_stream() {
    let (context, bus) = memory_context(order_routes());
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(&context.create_consumer(&Destination::new("orders")), stop_after_ack())
        .unwrap();
    subscription
        .subscribe(&context.create_consumer(&Destination::new("invoices")), stop_after_ack())
        .unwrap();

    let err = subscription.consume(Duration::ZERO).await.unwrap_err();
    assert_eq!(err.capability(), Some(Capability::MultiQueueSubscribe));
    assert_eq!(bus.stream_count(), 0);
}

#[tokio::test]
async fn test_setup_timeout() {
    let context = ConnectionFactory::with_client(Arc::new(StalledService))
        .create_context("shop", RouteTable::default());
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(&context.create_consumer(&Destination::new("orders")), stop_after_ack())
        .unwrap();

    let err = subscription
        .consume(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(d) if d == Duration::from_millis(50)));
}

#[tokio::test]
async fn test_consume_stamps_processor_and_acknowledges() {
    let (context, bus) = memory_context(order_routes());
    let queue = context.create_queue("orders");
    let consumer = context.create_consumer(&queue);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(
            &consumer,
            callback(move |message, consumer| {
                recorded
                    .lock()
                    .unwrap()
                    .push(message.processor().map(String::from));
                consumer.acknowledge(message).unwrap();
                ConsumeFlow::Stop
            }),
        )
        .unwrap();

    let running =
        tokio::spawn(async move { subscription.consume(Duration::from_secs(5)).await });
    wait_for_handler(&bus, "CreateOrder").await;

    let mut message = order_message();
    let reply = context
        .create_producer()
        .request(&queue, &mut message)
        .await
        .unwrap()
        .expect("acknowledgment payload");

    assert_eq!(reply.body(), plain::RECEIVED_MARKER.as_bytes());
    running.await.unwrap().unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("orderProcessor".to_string())]
    );
}

#[tokio::test]
async fn test_stream_end_is_communication_error() {
    let (context, bus) = memory_context(order_routes());
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(&context.create_consumer(&Destination::new("orders")), stop_after_ack())
        .unwrap();

    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    wait_for_handler(&bus, "CreateOrder").await;
    bus.disconnect_all();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::Communication(_)));
}

#[tokio::test]
async fn test_cancellation_ends_consume() {
    let (context, bus) = memory_context(order_routes());
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(&context.create_consumer(&Destination::new("orders")), stop_after_ack())
        .unwrap();
    let token = subscription.cancellation_token();

    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    wait_for_handler(&bus, "CreateOrder").await;
    token.cancel();

    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reject_with_requeue_acks_then_fails() {
    let (context, bus) = memory_context(order_routes());
    let queue = context.create_queue("orders");
    let outcome = Arc::new(Mutex::new(None));
    let recorded = outcome.clone();

    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(
            &context.create_consumer(&queue),
            callback(move |message, consumer| {
                *recorded.lock().unwrap() = Some(consumer.reject(message, true));
                ConsumeFlow::Stop
            }),
        )
        .unwrap();

    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    wait_for_handler(&bus, "CreateOrder").await;

    let mut message = order_message();
    context
        .create_producer()
        .send(&queue, &mut message)
        .await
        .unwrap();
    running.await.unwrap().unwrap();

    let result = outcome.lock().unwrap().take().expect("callback ran");
    assert_eq!(result.unwrap_err().capability(), Some(Capability::Requeue));
}

#[tokio::test]
async fn test_respond_error_surfaces_at_producer() {
    let (context, bus) = memory_context(order_routes());
    let queue = context.create_queue("orders");
    let mut subscription = context.create_subscription_consumer();
    subscription
        .subscribe(
            &context.create_consumer(&queue),
            callback(|message, consumer| {
                consumer
                    .respond_error(message, "ORD-1", "out of stock")
                    .unwrap();
                ConsumeFlow::Stop
            }),
        )
        .unwrap();

    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    wait_for_handler(&bus, "CreateOrder").await;

    let mut message = order_message();
    let err = context
        .create_producer()
        .send(&queue, &mut message)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Destination(ref reason) if reason == "out of stock"));
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_receive_times_out_with_none() {
    let (context, bus) = memory_context(RouteTable::default());
    let consumer = context.create_consumer(&Destination::new("orders"));

    let received = consumer.receive(Duration::from_millis(50)).await.unwrap();
    assert!(received.is_none());
    assert_eq!(bus.stream_count(), 1);

    assert!(consumer.receive_no_wait().await.unwrap().is_none());
    assert_eq!(bus.stream_count(), 1);
}

#[tokio::test]
async fn test_receive_then_acknowledge() {
    let (context, bus) = memory_context(RouteTable::default());
    let queue = context.create_queue("Ping");
    let consumer = context.create_consumer(&queue);

    let producer_context = context.clone();
    let producer_queue = queue.clone();
    let sender = tokio::spawn(async move {
        wait_for_handler(&bus, "Ping").await;
        let mut message = Message::new("ping");
        message.set_command("Ping");
        message.set_reply_to("pong");
        producer_context
            .create_producer()
            .request(&producer_queue, &mut message)
            .await
    });

    let message = consumer
        .receive(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("a message");
    assert_eq!(message.body(), b"ping");
    assert_eq!(message.processor(), None);
    assert!(message.request_id().is_some());

    consumer
        .respond(&message, &Message::new("pong"))
        .unwrap();
    let reply = sender.await.unwrap().unwrap().expect("reply");
    assert_eq!(reply.body(), b"pong");
}

#[tokio::test]
async fn test_acknowledge_requires_received_message() {
    let (context, _bus) = memory_context(RouteTable::default());
    let consumer = context.create_consumer(&Destination::new("orders"));

    let err = consumer.acknowledge(&Message::new("x")).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidMessage(_)));
}

#[test]
fn test_subscribed_commands_fall_back_to_queue() {
    let (context, _bus) = memory_context(RouteTable::default());
    assert_eq!(subscribed_commands(&context, "orders"), vec!["orders"]);

    let (routed, _bus) = memory_context(order_routes());
    assert_eq!(subscribed_commands(&routed, "orders"), vec!["CreateOrder"]);
}

fn inbound(name: &str, message: &Message) -> Command {
    Command {
        message_identifier: "m-1".to_string(),
        client_id: "shop-p-x".to_string(),
        component_name: "shop-p-x".to_string(),
        name: name.to_string(),
        payload: JsonSerializer.to_bytes(message).unwrap(),
    }
}

#[test]
fn test_decode_command_stamps_processor() {
    let (context, _bus) = memory_context(order_routes());

    let decoded = decode_command(&context, inbound("CreateOrder", &order_message())).unwrap();
    assert_eq!(decoded.processor(), Some("orderProcessor"));
    assert_eq!(decoded.request_id(), Some("m-1"));

    let unrouted = decode_command(&context, inbound("CancelOrder", &order_message())).unwrap();
    assert_eq!(unrouted.processor(), None);

    let mut hinted = order_message();
    hinted.set_property(crate::message::PROCESSOR_PROPERTY, "custom");
    let decoded = decode_command(&context, inbound("CreateOrder", &hinted)).unwrap();
    assert_eq!(decoded.processor(), Some("custom"));
}

#[test]
fn test_decode_command_rejects_topics() {
    let (context, _bus) = memory_context(order_routes());
    let mut event = Message::new("{}");
    event.set_topic("OrderCreated");

    let err = decode_command(&context, inbound("OrderCreated", &event)).unwrap_err();
    assert_eq!(err.capability(), Some(Capability::TopicMessages));
}

#[test]
fn test_credit_window_replenishes_at_half_grant() {
    let mut window = CreditWindow::default();
    assert_eq!(window.initial_grant(), FLOW_CONTROL_PERMITS);
    assert_eq!(window.replenish_threshold(), 1024);

    for _ in 0..1024 {
        window.on_receive();
    }
    assert_eq!(window.available(), 1024);

    for _ in 0..1023 {
        assert_eq!(window.on_ack(), None);
    }
    assert_eq!(window.on_ack(), Some(1024));
    assert_eq!(window.available(), FLOW_CONTROL_PERMITS);
}

#[test]
fn test_stream_writer_frames() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer = StreamWriter::new("shop-c-orders".to_string(), tx, 4);

    writer.grant_initial().unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        OutboundFrame::FlowControl {
            client_id: "shop-c-orders".to_string(),
            permits: 4
        }
    );

    writer.record_receipt("a");
    writer.record_receipt("b");
    assert_eq!(writer.available_permits(), 2);

    writer
        .respond(CommandResponse::success("a", Vec::new()))
        .unwrap();
    assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Response(_)));
    assert!(rx.try_recv().is_err());

    writer
        .respond(CommandResponse::success("b", Vec::new()))
        .unwrap();
    assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Response(_)));
    assert_eq!(
        rx.try_recv().unwrap(),
        OutboundFrame::FlowControl {
            client_id: "shop-c-orders".to_string(),
            permits: 2
        }
    );
    assert_eq!(writer.available_permits(), 4);

    drop(rx);
    assert!(writer.is_closed());
    assert!(matches!(
        writer.grant_initial(),
        Err(GatewayError::Communication(_))
    ));
}

#[test]
fn test_repeated_responses_earn_one_permit() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer = StreamWriter::new("shop-c-orders".to_string(), tx, 4);
    writer.grant_initial().unwrap();
    rx.try_recv().unwrap();

    writer.record_receipt("a");
    for _ in 0..3 {
        writer
            .respond(CommandResponse::success("a", Vec::new()))
            .unwrap();
        assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Response(_)));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(writer.available_permits(), 3);

    writer.record_receipt("b");
    writer
        .respond(CommandResponse::success("b", Vec::new()))
        .unwrap();
    assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Response(_)));
    assert_eq!(
        rx.try_recv().unwrap(),
        OutboundFrame::FlowControl {
            client_id: "shop-c-orders".to_string(),
            permits: 2
        }
    );
    assert_eq!(writer.available_permits(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_receive_blocks_past_poll_slices() {
    let (context, bus) = memory_context(RouteTable::default());
    let queue = context.create_queue("Ping");
    let consumer = context.create_consumer(&queue);

    let receiver = consumer.clone();
    let receiving = tokio::spawn(async move { receiver.receive(Duration::ZERO).await });
    wait_for_handler(&bus, "Ping").await;

    tokio::time::sleep(plain::BLOCKING_POLL_SLICE * 2 + Duration::from_secs(1)).await;
    assert!(!receiving.is_finished());

    let producer = context.create_producer();
    let sender = tokio::spawn(async move {
        let mut message = Message::new("ping");
        message.set_command("Ping");
        message.set_reply_to("pong");
        producer.request(&queue, &mut message).await
    });

    let message = receiving
        .await
        .unwrap()
        .unwrap()
        .expect("blocking receive yields a message");
    assert_eq!(message.body(), b"ping");

    consumer.acknowledge(&message).unwrap();
    let reply = sender.await.unwrap().unwrap().expect("reply");
    assert_eq!(reply.body(), plain::RECEIVED_MARKER.as_bytes());
}

#[tokio::test]
async fn test_receive_keeps_own_stream_after_consume() {
    let (context, bus) = memory_context(RouteTable::default());
    let queue = context.create_queue("Ping");
    let consumer = context.create_consumer(&queue);

    assert!(consumer.receive(Duration::from_millis(20)).await.unwrap().is_none());
    assert_eq!(bus.stream_count(), 1);

    let mut subscription = context.create_subscription_consumer();
    subscription.subscribe(&consumer, stop_after_ack()).unwrap();
    let shutdown = subscription.cancellation_token();
    let running = tokio::spawn(async move { subscription.consume(Duration::ZERO).await });
    for _ in 0..200 {
        if bus.handler_count("Ping") == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bus.handler_count("Ping"), 2);

    shutdown.cancel();
    running.await.unwrap().unwrap();
    for _ in 0..200 {
        if bus.stream_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bus.stream_count(), 1);

    let producer = context.create_producer();
    let sender = tokio::spawn(async move {
        let mut message = Message::new("ping");
        message.set_command("Ping");
        message.set_reply_to("pong");
        producer.request(&queue, &mut message).await
    });

    let message = consumer
        .receive(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("own stream still delivers");
    consumer.acknowledge(&message).unwrap();
    let reply = sender.await.unwrap().unwrap().expect("reply");
    assert_eq!(reply.body(), plain::RECEIVED_MARKER.as_bytes());
}
