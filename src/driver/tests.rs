use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::*;
use crate::context::ConnectionFactory;
use crate::gateway::{Command, CommandResponse, CommandService, CommandStream};
use crate::message::envelope::EXPIRES_AT_HEADER;
use crate::routing::RouteTable;
use crate::utils::Capability;

/// Accepts every command with an empty payload.
#[derive(Default)]
struct AcceptAll {
    names: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandService for AcceptAll {
    async fn dispatch(&self, command: Command) -> Result<Option<CommandResponse>> {
        self.names.lock().unwrap().push(command.name.clone());
        Ok(Some(CommandResponse {
            request_identifier: command.message_identifier,
            payload: None,
            error_message: None,
        }))
    }

    async fn open_stream(&self) -> Result<CommandStream> {
        Err(GatewayError::Communication("not a stream server".to_string()))
    }
}

fn driver() -> (Driver, Arc<AcceptAll>) {
    let service = Arc::new(AcceptAll::default());
    let context =
        ConnectionFactory::with_client(service.clone()).create_context("shop", RouteTable::default());
    (Driver::new(context), service)
}

fn command(name: &str) -> Message {
    let mut message = Message::new("{}");
    message.set_command(name);
    message.set_reply_to("replies");
    message
}

#[tokio::test]
async fn test_send_to_processor_uses_command_queue() {
    let (driver, service) = driver();

    let result = driver.send_to_processor(command("CreateOrder")).await.unwrap();

    assert_eq!(result.queue.name(), "CreateOrder");
    assert_eq!(result.message.key(), Some("CreateOrder"));
    assert!(result.message.message_id().is_some());
    assert_eq!(*service.names.lock().unwrap(), vec!["CreateOrder".to_string()]);
}

#[tokio::test]
async fn test_expire_property_becomes_time_to_live() {
    let (driver, _) = driver();
    let mut message = command("CreateOrder");
    message.set_property(EXPIRE_PROPERTY, 30);

    let result = driver.send_to_processor(message).await.unwrap();

    assert_eq!(
        result.message.time_to_live(),
        Some(std::time::Duration::from_secs(30))
    );
    assert!(result.message.header(EXPIRES_AT_HEADER).is_some());
}

#[tokio::test]
async fn test_delay_property_is_unsupported() {
    let (driver, service) = driver();
    let mut message = command("CreateOrder");
    message.set_property(DELAY_PROPERTY, 10);

    let err = driver.send_to_processor(message).await.unwrap_err();
    assert_eq!(err.capability(), Some(Capability::DeliveryDelay));
    assert!(service.names.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_priority_property_is_unsupported() {
    let (driver, _) = driver();
    let mut message = command("CreateOrder");
    message.set_property(PRIORITY_PROPERTY, "high");

    let err = driver.send_to_processor(message).await.unwrap_err();
    assert_eq!(err.capability(), Some(Capability::Priority));

    let mut unknown = command("CreateOrder");
    unknown.set_property(PRIORITY_PROPERTY, "urgent");
    let err = driver.send_to_processor(unknown).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidMessage(_)));
}

#[tokio::test]
async fn test_message_without_kind_is_invalid() {
    let (driver, _) = driver();
    let err = driver.send_to_processor(Message::new("{}")).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidMessage(_)));
}

#[test]
fn test_priority_levels() {
    assert_eq!(priority_level(&Scalar::from("very_low")).unwrap(), 0);
    assert_eq!(priority_level(&Scalar::from("very_high")).unwrap(), 4);
    assert!(priority_level(&Scalar::from(3)).is_err());
}

#[test]
fn test_seconds_property_accepts_numeric_strings() {
    let mut message = Message::new("");
    message.set_property(DELAY_PROPERTY, "15");
    assert_eq!(
        seconds_property(&message, DELAY_PROPERTY),
        Some(std::time::Duration::from_secs(15))
    );
    message.set_property(DELAY_PROPERTY, -1);
    assert_eq!(seconds_property(&message, DELAY_PROPERTY), None);
}
