//! Integration tests for [`AmqpBroker`] against a real RabbitMQ instance.
//!
//! These tests use testcontainers to spin up RabbitMQ and validate:
//! - Topology declaration and idempotency
//! - Publish/get round-trip with headers and properties
//! - Tail placement of nack-with-requeue
//! - A full requeue run from a dead-letter queue
//! - Channel recovery after a missing-queue error
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 5-20 seconds per test to start RabbitMQ
//!
//! To run explicitly:
//! ```bash
//! cargo test -p travel-messaging-amqp --test integration_tests -- --ignored
//! ```
//!
//! # Panics
//!
//! These tests use `expect()` and `panic!()` for setup failures, which is acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::rabbitmq::RabbitMq;
use travel_messaging_amqp::{AmqpBroker, RequeuePlacement, Topology};
use travel_messaging_core::codec;
use travel_messaging_core::headers::{self, HeaderValue};
use travel_messaging_core::message::{AnyMessage, Envelope};
use travel_messaging_core::transport::{AckMode, OutboundMessage, TransportProperties};
use travel_messaging_core::{Broker, BrokerError};
use travel_messaging_runtime::{RelayConfig, RequeueCoordinator, StopReason};
use travel_messaging_testing::fixtures;

const AMQP_PORT: u16 = 5672;

/// Start RabbitMQ and return the container with its URI.
async fn start_rabbitmq() -> (ContainerAsync<RabbitMq>, String) {
    let container = RabbitMq::default()
        .start()
        .await
        .expect("Failed to start RabbitMQ container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(AMQP_PORT)
        .await
        .expect("Failed to get port");
    (container, format!("amqp://guest:guest@{host}:{port}/%2f"))
}

/// Connect, retrying while RabbitMQ finishes booting.
async fn connect(uri: &str, placement: RequeuePlacement) -> AmqpBroker {
    for attempt in 1..=60 {
        if let Ok(broker) = AmqpBroker::builder()
            .uri(uri)
            .requeue_placement(placement)
            .build()
            .await
        {
            return broker;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "RabbitMQ failed to accept connections");
    }
    unreachable!()
}

/// JSON message as the relay's publisher would send it.
fn outbound<E: Envelope>(envelope: &E) -> OutboundMessage {
    let mut properties =
        TransportProperties::json(envelope.message_id().as_str(), envelope.meta().timestamp);
    properties.headers.insert(
        headers::MESSAGE_TYPE.to_string(),
        HeaderValue::from(envelope.message_type().to_string()),
    );
    OutboundMessage {
        properties,
        body: codec::encode(envelope).expect("encode"),
    }
}

async fn body_ids(broker: &AmqpBroker, queue: &str) -> Vec<String> {
    let mut ids = Vec::new();
    while let Some(delivery) = broker.get(queue, AckMode::Auto).await.expect("get") {
        let message: AnyMessage = codec::decode_any(&delivery.body).expect("decode");
        ids.push(message.message_id().to_string());
    }
    ids
}

#[tokio::test]
#[ignore]
async fn test_declare_topology_is_idempotent() {
    let (_container, uri) = start_rabbitmq().await;
    let broker = connect(&uri, RequeuePlacement::Tail).await;

    let first = broker
        .declare_topology(&Topology::default())
        .await
        .expect("declare");
    assert_eq!(
        first.declared,
        [
            "travel.bookings.dlq",
            "travel.bookings",
            "travel.admin.dlq",
            "travel.admin"
        ]
    );
    assert!(first.existing.is_empty());

    let second = broker
        .declare_topology(&Topology::default())
        .await
        .expect("redeclare");
    assert!(second.declared.is_empty());
    assert_eq!(second.existing.len(), 4);

    broker.close().await.expect("close");
}

#[tokio::test]
#[ignore]
async fn test_publish_and_get_round_trip() {
    let (_container, uri) = start_rabbitmq().await;
    let broker = connect(&uri, RequeuePlacement::Tail).await;
    broker
        .declare_topology(&Topology::default())
        .await
        .expect("declare");

    let booking = fixtures::booking(1);
    let mut message = outbound(&booking);
    message.properties.correlation_id = Some("corr-1".to_string());
    broker
        .publish("travel.bookings", &message)
        .await
        .expect("publish");

    let delivery = broker
        .get("travel.bookings", AckMode::Manual)
        .await
        .expect("get")
        .expect("message present");

    assert_eq!(delivery.body, message.body);
    assert_eq!(delivery.properties.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(
        delivery.properties.headers.get(headers::MESSAGE_TYPE),
        Some(&HeaderValue::from("BookingConfirmation"))
    );
    broker.ack(delivery.tag).await.expect("ack");

    let stats = broker.queue_stats("travel.bookings").await.expect("stats");
    assert_eq!(stats.messages, 0);

    broker.close().await.expect("close");
}

#[tokio::test]
#[ignore]
async fn test_nack_with_requeue_goes_to_the_tail() {
    let (_container, uri) = start_rabbitmq().await;
    let broker = connect(&uri, RequeuePlacement::Tail).await;
    broker
        .declare_topology(&Topology::default())
        .await
        .expect("declare");

    for id in 1..=3 {
        let message = outbound(&fixtures::booking(id));
        broker
            .publish("travel.bookings.dlq", &message)
            .await
            .expect("publish");
    }

    let first = broker
        .get("travel.bookings.dlq", AckMode::Manual)
        .await
        .expect("get")
        .expect("message present");
    broker.nack(first.tag, true).await.expect("nack");

    assert_eq!(
        body_ids(&broker, "travel.bookings.dlq").await,
        ["booking-2", "booking-3", "booking-1"]
    );

    broker.close().await.expect("close");
}

#[tokio::test]
#[ignore]
async fn test_requeue_run_moves_valid_messages_and_keeps_garbage() {
    let (_container, uri) = start_rabbitmq().await;
    let broker = Arc::new(connect(&uri, RequeuePlacement::Tail).await);
    broker
        .declare_topology(&Topology::default())
        .await
        .expect("declare");

    for id in 1..=3 {
        let message = outbound(&fixtures::booking(id));
        broker
            .publish("travel.bookings.dlq", &message)
            .await
            .expect("publish");
    }
    let garbage = OutboundMessage {
        properties: TransportProperties::default(),
        body: fixtures::malformed_payload(),
    };
    broker
        .publish("travel.bookings.dlq", &garbage)
        .await
        .expect("publish garbage");

    let coordinator = RequeueCoordinator::new(broker.clone(), &RelayConfig::default())
        .with_timeout(Duration::from_secs(2));
    let report = coordinator
        .requeue_from_dlq("travel.bookings.dlq", "travel.bookings", 100)
        .await
        .expect("requeue");

    assert_eq!(report.requeued, 3);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.stop, StopReason::WrappedAround);

    let dlq = broker
        .queue_stats("travel.bookings.dlq")
        .await
        .expect("stats");
    assert_eq!(dlq.messages, 1);

    let mut retry_counts = Vec::new();
    while let Some(delivery) = broker
        .get("travel.bookings", AckMode::Auto)
        .await
        .expect("get")
    {
        assert!(delivery.properties.headers.contains_key(headers::REQUEUED_AT));
        retry_counts.push(headers::retry_count(&delivery.properties.headers));
    }
    assert_eq!(retry_counts, [Some(1), Some(1), Some(1)]);

    broker.close().await.expect("close");
}

#[tokio::test]
#[ignore]
async fn test_channel_recovers_after_missing_queue() {
    let (_container, uri) = start_rabbitmq().await;
    let broker = connect(&uri, RequeuePlacement::Tail).await;
    broker
        .declare_topology(&Topology::default())
        .await
        .expect("declare");

    let missing = broker.queue_stats("travel.nowhere").await;
    assert_eq!(
        missing,
        Err(BrokerError::QueueNotFound("travel.nowhere".to_string()))
    );

    let stats = broker.queue_stats("travel.bookings").await;
    assert!(stats.is_ok(), "channel not recovered: {stats:?}");
    assert!(broker.is_open());

    broker.close().await.expect("close");
    assert!(!broker.is_open());
}
