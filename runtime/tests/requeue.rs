//! Integration tests for draining dead-letter queues
//!
//! Runs the requeue coordinator against the in-memory broker, with paused
//! time so poll windows elapse instantly.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use travel_messaging_core::codec;
use travel_messaging_core::environment::Clock;
use travel_messaging_core::headers::{self, HeaderValue};
use travel_messaging_core::message::{AnyMessage, BookingMessage, Envelope};
use travel_messaging_core::transport::{OutboundMessage, TransportProperties};
use travel_messaging_core::{BrokerError, RelayError};
use travel_messaging_runtime::{
    CancellationToken, PoisonPolicy, RelayConfig, RequeueCoordinator, StopReason,
};
use travel_messaging_testing::{InMemoryBroker, Operation, SequentialIds, fixtures, test_clock};

// ============================================================================
// Test Fixtures
// ============================================================================

const DLQ: &str = "travel.bookings.dlq";
const TARGET: &str = "travel.bookings";
const TIMEOUT: Duration = Duration::from_millis(200);

fn setup() -> (InMemoryBroker, RequeueCoordinator) {
    let broker = InMemoryBroker::new().with_queue(DLQ).with_queue(TARGET);
    let config = RelayConfig::default().with_requeue_timeout(TIMEOUT);
    let coordinator = RequeueCoordinator::new(Arc::new(broker.clone()), &config)
        .with_clock(Arc::new(test_clock()))
        .with_ids(Arc::new(SequentialIds::new("hop")));
    (broker, coordinator)
}

fn decoded(message: &OutboundMessage) -> BookingMessage {
    codec::decode(&message.body).unwrap()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn malformed_delivery_stays_while_valid_ones_move() {
    let (broker, coordinator) = setup();
    broker.seed_envelope(DLQ, &fixtures::booking(1));
    broker.seed(DLQ, fixtures::malformed_payload());
    broker.seed_envelope(DLQ, &fixtures::booking(2));
    broker.seed_envelope(DLQ, &fixtures::booking(3));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap();

    assert_eq!(report.requeued, 3);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.stop, StopReason::WrappedAround);
    assert_eq!(broker.depth(DLQ), 1);
    assert_eq!(broker.messages(DLQ)[0].body, fixtures::malformed_payload());
    assert_eq!(broker.unacked(), 0);

    let ids: Vec<i64> = broker
        .published_to(TARGET)
        .iter()
        .map(|message| decoded(message).booking_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn empty_dlq_returns_within_one_timeout() {
    let (broker, coordinator) = setup();

    let started = Instant::now();
    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 100).await.unwrap();

    assert_eq!(report.requeued, 0);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stop, StopReason::QueueDrained);
    assert!(started.elapsed() <= TIMEOUT);
    assert!(broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stops_at_the_message_limit() {
    let (broker, coordinator) = setup();
    for id in 1..=5 {
        broker.seed_envelope(DLQ, &fixtures::booking(id));
    }

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 3).await.unwrap();

    assert_eq!(report.requeued, 3);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.stop, StopReason::LimitReached);
    assert_eq!(broker.depth(DLQ), 2);
    assert_eq!(broker.depth(TARGET), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_limit_touches_nothing() {
    let (broker, coordinator) = setup();
    broker.seed_envelope(DLQ, &fixtures::booking(1));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 0).await.unwrap();

    assert_eq!(report.attempts, 0);
    assert_eq!(broker.get_calls(), 0);
    assert_eq!(broker.depth(DLQ), 1);
}

// ============================================================================
// Hop lineage
// ============================================================================

#[tokio::test(start_paused = true)]
async fn hop_gets_new_identity_and_provenance_headers() {
    let (broker, coordinator) = setup();
    let mut original = fixtures::booking(42);
    original.meta.retry_count = 2;

    let mut properties = TransportProperties::json("booking-42", test_clock().now());
    properties.correlation_id = Some("checkout-77".to_string());
    properties
        .headers
        .insert("x-origin".to_string(), HeaderValue::from("checkout"));
    broker.seed_message(
        DLQ,
        OutboundMessage {
            properties,
            body: codec::encode(&original).unwrap(),
        },
    );

    coordinator.requeue_from_dlq(DLQ, TARGET, 1).await.unwrap();

    let sent = broker.published_to(TARGET);
    assert_eq!(sent.len(), 1);
    let hop = decoded(&sent[0]);
    assert_eq!(hop.meta.message_id.as_str(), "hop-0001");
    assert_eq!(hop.meta.retry_count, 3);
    assert_eq!(hop.meta.timestamp, test_clock().now());
    assert_eq!(hop.booking_id, 42);
    assert_eq!(hop.destinations, original.destinations);

    let sent_properties = &sent[0].properties;
    assert_eq!(sent_properties.message_id.as_deref(), Some("hop-0001"));
    assert_eq!(sent_properties.correlation_id.as_deref(), Some("checkout-77"));
    assert_eq!(headers::retry_count(&sent_properties.headers), Some(3));
    assert_eq!(
        sent_properties.headers.get(headers::REQUEUED_AT),
        Some(&HeaderValue::iso8601(test_clock().now()))
    );
    assert_eq!(
        sent_properties.headers.get(headers::REQUEUED_FROM),
        Some(&HeaderValue::from(DLQ))
    );
    assert_eq!(
        sent_properties.headers.get("x-origin"),
        Some(&HeaderValue::from("checkout"))
    );
}

#[tokio::test(start_paused = true)]
async fn legacy_payloads_are_requeued_in_canonical_form() {
    let (broker, coordinator) = setup();
    broker.seed(DLQ, fixtures::pascal_case_booking_payload(9));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 5).await.unwrap();
    assert_eq!(report.requeued, 1);

    let body = &broker.published_to(TARGET)[0].body;
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(json["bookingId"], 9);
    assert_eq!(json["retryCount"], 2);
    assert_eq!(json["type"], "BookingConfirmation");
}

#[tokio::test(start_paused = true)]
async fn every_family_can_be_requeued() {
    let (broker, coordinator) = setup();
    broker.seed_envelope(DLQ, &fixtures::cancellation_request(5, 42));
    broker.seed_envelope(DLQ, &fixtures::admin_notification(42));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 5).await.unwrap();
    assert_eq!(report.requeued, 2);

    let kinds: Vec<_> = broker
        .published_to(TARGET)
        .iter()
        .map(|message| codec::decode_any(&message.body).unwrap())
        .map(|message| (message.message_type(), message.retry_count()))
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.iter().all(|(_, retry)| *retry == 1));
    assert!(matches!(
        codec::decode_any(&broker.published_to(TARGET)[1].body).unwrap(),
        AnyMessage::AdminNotification(_)
    ));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn refused_publishes_return_deliveries_to_the_dlq() {
    let (broker, coordinator) = setup();
    broker.reject_publishes_to(TARGET, "NOT_FOUND - no queue");
    broker.seed_envelope(DLQ, &fixtures::booking(1));
    broker.seed_envelope(DLQ, &fixtures::booking(2));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap();

    assert_eq!(report.requeued, 0);
    assert_eq!(report.publish_failures, 2);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.stop, StopReason::WrappedAround);
    assert_eq!(broker.depth(DLQ), 2);
    assert_eq!(broker.unacked(), 0);
}

#[tokio::test(start_paused = true)]
async fn identical_malformed_deliveries_do_not_end_the_run() {
    let (broker, coordinator) = setup();
    broker.seed(DLQ, fixtures::malformed_payload());
    broker.seed(DLQ, fixtures::malformed_payload());
    broker.seed_envelope(DLQ, &fixtures::booking(1));
    broker.seed_envelope(DLQ, &fixtures::booking(2));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap();

    assert_eq!(report.requeued, 2);
    assert_eq!(report.malformed, 2);
    assert_eq!(report.attempts, 5);
    assert_eq!(report.stop, StopReason::WrappedAround);
    assert_eq!(broker.depth(DLQ), 2);
    assert_eq!(broker.depth(TARGET), 2);
    assert_eq!(broker.unacked(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_dlq_aborts_before_any_fetch() {
    let broker = InMemoryBroker::new().with_queue(TARGET);
    let coordinator = RequeueCoordinator::new(Arc::new(broker.clone()), &RelayConfig::default());

    let error = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap_err();

    assert_eq!(
        error,
        RelayError::BatchAborted {
            completed: 0,
            source: BrokerError::QueueNotFound(DLQ.to_string()),
        }
    );
    assert_eq!(broker.get_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn broker_failure_aborts_with_partial_count() {
    let (broker, coordinator) = setup();
    broker.seed_envelope(DLQ, &fixtures::booking(1));
    broker.seed_envelope(DLQ, &fixtures::booking(2));
    broker.seed(DLQ, fixtures::malformed_payload());
    broker.fail_next(
        Operation::Nack,
        BrokerError::ChannelClosed("connection reset".to_string()),
    );

    let error = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap_err();

    assert_eq!(
        error,
        RelayError::BatchAborted {
            completed: 2,
            source: BrokerError::ChannelClosed("connection reset".to_string()),
        }
    );
    assert_eq!(broker.depth(TARGET), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_aborts_before_any_progress() {
    let (broker, coordinator) = setup();
    broker.seed_envelope(DLQ, &fixtures::booking(1));
    broker.fail_next(Operation::Get, BrokerError::Transport("frame error".to_string()));

    let error = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap_err();

    assert!(matches!(error, RelayError::BatchAborted { completed: 0, .. }));
    assert_eq!(broker.depth(DLQ), 1);
}

#[tokio::test]
async fn closed_broker_fails_fast() {
    let (broker, coordinator) = setup();
    broker.close_channel();

    let error = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap_err();

    assert!(matches!(error, RelayError::Transport(BrokerError::ChannelClosed(_))));
    assert_eq!(broker.get_calls(), 0);
}

#[tokio::test]
async fn blank_queue_names_are_rejected() {
    let (broker, coordinator) = setup();

    let error = coordinator.requeue_from_dlq(" ", "", 10).await.unwrap_err();

    assert_eq!(error.invalid_fields(), ["dlq", "target"]);
    assert_eq!(broker.get_calls(), 0);
}

// ============================================================================
// Poison policy and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn envelopes_at_the_ceiling_are_parked() {
    let (broker, coordinator) = setup();
    let coordinator = coordinator.with_poison_policy(PoisonPolicy::Park {
        max_retries: 3,
        queue: "travel.parking".to_string(),
    });
    let mut worn = fixtures::booking(1);
    worn.meta.retry_count = 3;
    broker.seed_envelope(DLQ, &worn);
    broker.seed_envelope(DLQ, &fixtures::booking(2));

    let report = coordinator.requeue_from_dlq(DLQ, TARGET, 10).await.unwrap();

    assert_eq!(report.parked, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(report.completed(), 2);

    let parked = broker.published_to("travel.parking");
    assert_eq!(parked.len(), 1);
    assert_eq!(decoded(&parked[0]).booking_id, 1);
    assert_eq!(decoded(&parked[0]).meta.retry_count, 4);
    assert_eq!(
        parked[0].properties.headers.get(headers::PARKED_FROM),
        Some(&HeaderValue::from(DLQ))
    );
    assert!(parked[0].properties.headers.contains_key(headers::PARKED_REASON));
    assert!(!parked[0].properties.headers.contains_key(headers::REQUEUED_AT));
    assert_eq!(decoded(&broker.published_to(TARGET)[0]).booking_id, 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_a_waiting_run() {
    let (_broker, coordinator) = setup();
    let coordinator = coordinator.with_timeout(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = coordinator
        .requeue_until(DLQ, TARGET, 10, &cancel)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(30));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn runs_are_bounded_and_lose_nothing(
        layout in prop::collection::vec(any::<bool>(), 0..12),
        max in 0u32..16,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let (broker, coordinator) = setup();
            for (index, valid) in layout.iter().enumerate() {
                let id = i64::try_from(index).unwrap() + 1;
                if *valid {
                    broker.seed_envelope(DLQ, &fixtures::booking(id));
                } else {
                    broker.seed(DLQ, fixtures::malformed_payload());
                }
            }
            let valid = layout.iter().filter(|valid| **valid).count();

            let report = coordinator.requeue_from_dlq(DLQ, TARGET, max).await.unwrap();
            let published = broker.published_to(TARGET).len();

            prop_assert!(report.attempts <= max);
            prop_assert!(report.requeued <= max);
            prop_assert_eq!(published, report.requeued as usize);
            prop_assert_eq!(broker.depth(DLQ) + published, layout.len());
            prop_assert_eq!(broker.unacked(), 0);
            if report.stop != StopReason::LimitReached {
                prop_assert_eq!(published, valid);
            }
            Ok(())
        })?;
    }
}
