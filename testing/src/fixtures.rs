//! Ready-made envelopes and payloads.
//!
//! Every fixture is stamped with [`test_clock`](crate::test_clock) time and
//! `retryCount` 0 so assertions on hop metadata start from a known baseline.

use crate::mocks::test_clock;
use proptest::prelude::*;
use travel_messaging_core::environment::Clock;
use travel_messaging_core::message::{
    AdminNotificationMessage, BookingMessage, CancellationMessage, MessageId, MessageMeta,
    MessageType,
};

/// A confirmed booking to Lisbon and Porto.
#[must_use]
pub fn booking(booking_id: i64) -> BookingMessage {
    let now = test_clock().now();
    BookingMessage {
        meta: MessageMeta::new(
            MessageId::new(format!("booking-{booking_id}")),
            MessageType::BookingConfirmation,
            now,
        ),
        booking_id,
        user_id: 7,
        user_name: "Ada Lovelace".to_string(),
        user_email: "ada@example.com".to_string(),
        destinations: vec!["Lisbon".to_string(), "Porto".to_string()],
        total_price: 1_280.0,
        guests: 2,
        nights: 5,
        start_date: Some(now + chrono::Duration::days(30)),
        confirmed: true,
        reminder_sent: false,
        cancellation_status: 0,
        created_at: Some(now),
    }
}

/// A pending cancellation request for `booking_id`.
#[must_use]
pub fn cancellation_request(cancellation_id: i64, booking_id: i64) -> CancellationMessage {
    let now = test_clock().now();
    CancellationMessage {
        meta: MessageMeta::new(
            MessageId::new(format!("cancellation-{cancellation_id}")),
            MessageType::CancellationRequested,
            now,
        ),
        cancellation_id,
        booking_id,
        user_id: 7,
        user_name: "Ada Lovelace".to_string(),
        user_email: "ada@example.com".to_string(),
        email: None,
        reason: Some("Change of plans".to_string()),
        requested_at: Some(now),
        reviewed_at: None,
        status: 0,
        admin_comment: None,
        admin_email: None,
        destination: Some("Lisbon, Porto".to_string()),
        trip_start_date: Some(now + chrono::Duration::days(30)),
        nights: Some(5),
        approved: None,
    }
}

/// An admin notification about `booking_id`.
#[must_use]
pub fn admin_notification(booking_id: i64) -> AdminNotificationMessage {
    AdminNotificationMessage {
        meta: MessageMeta::new(
            MessageId::new(format!("admin-{booking_id}")),
            MessageType::AdminNotification,
            test_clock().now(),
        ),
        admin_email: "ops@example.com".to_string(),
        subject: format!("Cancellation requested for booking {booking_id}"),
        body: "Please review the request.".to_string(),
        booking_id: Some(booking_id),
        user_id: Some(7),
        user_name: Some("Ada Lovelace".to_string()),
        user_email: Some("ada@example.com".to_string()),
        metadata: None,
    }
}

/// A payload no decoder accepts.
#[must_use]
pub fn malformed_payload() -> Vec<u8> {
    br#"{"messageId": "broken", "type": "BookingConfirmation", "bookingId": "not-a-number""#.to_vec()
}

/// A booking payload the way a PascalCase producer writes it.
#[must_use]
pub fn pascal_case_booking_payload(booking_id: i64) -> Vec<u8> {
    serde_json::json!({
        "MessageId": format!("legacy-{booking_id}"),
        "Type": 0,
        "Timestamp": "2025-01-01T00:00:00",
        "RetryCount": 1,
        "BookingId": booking_id,
        "UserId": 7,
        "UserName": "Ada Lovelace",
        "UserEmail": "ada@example.com",
        "Destinations": ["Lisbon"],
        "TotalPrice": 640.0,
    })
    .to_string()
    .into_bytes()
}

/// Arbitrary booking envelopes with valid domain fields.
pub fn arb_booking() -> impl Strategy<Value = BookingMessage> {
    (
        1_i64..1_000_000,
        1_i64..1_000_000,
        "[A-Za-z][A-Za-z ]{0,23}",
        "[a-z]{1,12}@[a-z]{1,8}\\.com",
        proptest::collection::vec("[A-Z][a-z]{2,11}", 1..4),
        0_u32..50,
        0_u32..10,
    )
        .prop_map(
            |(booking_id, user_id, user_name, user_email, destinations, retry_count, guests)| {
                let mut message = booking(booking_id);
                message.user_id = user_id;
                message.user_name = user_name;
                message.user_email = user_email;
                message.destinations = destinations;
                message.guests = guests;
                message.meta.retry_count = retry_count;
                message
            },
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use travel_messaging_core::codec;
    use travel_messaging_core::message::{AnyMessage, Envelope};

    #[test]
    fn fixtures_encode_and_decode() {
        let bytes = codec::encode(&booking(42)).unwrap();
        assert_eq!(codec::decode::<BookingMessage>(&bytes).unwrap(), booking(42));

        let bytes = codec::encode(&cancellation_request(3, 42)).unwrap();
        assert!(matches!(codec::decode_any(&bytes).unwrap(), AnyMessage::Cancellation(_)));
    }

    #[test]
    fn legacy_payload_decodes() {
        let message = codec::decode_any(&pascal_case_booking_payload(9)).unwrap();
        assert_eq!(message.retry_count(), 1);
        assert_eq!(message.message_id().as_str(), "legacy-9");
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(codec::decode_any(&malformed_payload()).is_err());
    }
}
