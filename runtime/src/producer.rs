//! Domain-facing producers.
//!
//! The booking platform hands over plain domain snapshots; [`BookingProducer`]
//! wraps them in envelopes (fresh `messageId`, timestamp now, `retryCount` 0)
//! and routes them by convention:
//!
//! | operation | type | queue |
//! | --- | --- | --- |
//! | `publish_booking_confirmation` | `BookingConfirmation` | bookings |
//! | `publish_booking_cancelled` | `BookingCancelled` | bookings |
//! | `publish_cancellation_requested` | `CancellationRequested` | bookings |
//! | `publish_cancellation_decision` | `CancellationDecision` | bookings |
//! | `publish_admin_notification` | `AdminNotification` | admin |

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use travel_messaging_core::broker::Broker;
use travel_messaging_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use travel_messaging_core::error::Result;
use travel_messaging_core::message::{
    AdminNotificationMessage, BookingMessage, CancellationMessage, MessageMeta, MessageType,
};
use travel_messaging_core::validation::Violations;

use crate::config::QueueNames;
use crate::publisher::{PublishReceipt, Publisher};

/// A booking as the platform stores it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookingSnapshot {
    /// Booking id
    pub booking_id: i64,
    /// Traveller account
    pub user_id: i64,
    /// Traveller display name
    pub user_name: String,
    /// Traveller email address
    pub user_email: String,
    /// Destination names, in itinerary order
    pub destinations: Vec<String>,
    /// Total price
    pub total_price: f64,
    /// Number of guests
    pub guests: u32,
    /// Number of nights
    pub nights: u32,
    /// First day of the trip
    pub start_date: Option<DateTime<Utc>>,
    /// Whether the booking is confirmed
    pub confirmed: bool,
    /// Whether the pre-trip reminder went out
    pub reminder_sent: bool,
    /// Cancellation state code
    pub cancellation_status: i32,
    /// When the booking was made
    pub created_at: Option<DateTime<Utc>>,
}

/// A cancellation request and, once reviewed, its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancellationDetails {
    /// Cancellation request id
    pub cancellation_id: i64,
    /// Booking being cancelled
    pub booking_id: i64,
    /// Traveller account
    pub user_id: i64,
    /// Traveller display name
    pub user_name: String,
    /// Traveller email address
    pub user_email: String,
    /// Destination names of the booking
    pub destinations: Vec<String>,
    /// Traveller's reason
    pub reason: Option<String>,
    /// When the request was filed
    pub requested_at: Option<DateTime<Utc>>,
    /// When an admin reviewed it
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Request state code
    pub status: i32,
    /// Reviewer's comment
    pub admin_comment: Option<String>,
    /// Reviewer's address
    pub admin_email: Option<String>,
    /// First day of the trip
    pub trip_start_date: Option<DateTime<Utc>>,
    /// Number of nights
    pub nights: Option<u32>,
}

/// Something the admin inbox should hear about.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdminNotice {
    /// Recipient
    pub admin_email: String,
    /// Subject line
    pub subject: String,
    /// Body text
    pub body: String,
    /// Related booking
    pub booking_id: Option<i64>,
    /// Related traveller account
    pub user_id: Option<i64>,
    /// Related traveller name
    pub user_name: Option<String>,
    /// Related traveller email
    pub user_email: Option<String>,
    /// Free-form extra data
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl AdminNotice {
    fn validate(&self) -> Result<()> {
        let mut violations = Violations::new();
        violations
            .require("adminEmail", self.admin_email.contains('@'))
            .require(
                "subject",
                !self.subject.trim().is_empty()
                    && self.subject.chars().count() <= AdminNotificationMessage::MAX_SUBJECT_LEN,
            )
            .require_non_blank("body", &self.body);
        violations.into_result()
    }
}

/// Publishes platform events with conventional routing.
#[derive(Clone)]
pub struct BookingProducer {
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    queues: QueueNames,
}

impl BookingProducer {
    /// Producer on `broker` routing to `queues`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, queues: QueueNames) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            publisher: Publisher::new(broker).with_clock(Arc::clone(&clock)),
            clock,
            ids: Arc::new(UuidGenerator),
            queues,
        }
    }

    /// Use `clock` for timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.publisher = self.publisher.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Use `ids` for message ids.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn meta(&self, message_type: MessageType) -> MessageMeta {
        MessageMeta::new(self.ids.next_id(), message_type, self.clock.now())
    }

    /// Announce a confirmed booking.
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`](travel_messaging_core::RelayError::Validation)
    /// for a non-positive `bookingId` or a blank `userEmail`, otherwise any
    /// publish error.
    pub async fn publish_booking_confirmation(&self, booking: &BookingSnapshot) -> Result<PublishReceipt> {
        self.publish_booking(MessageType::BookingConfirmation, booking)
            .await
    }

    /// Announce a cancelled booking.
    ///
    /// # Errors
    ///
    /// Same as [`Self::publish_booking_confirmation`].
    pub async fn publish_booking_cancelled(&self, booking: &BookingSnapshot) -> Result<PublishReceipt> {
        self.publish_booking(MessageType::BookingCancelled, booking)
            .await
    }

    async fn publish_booking(
        &self,
        message_type: MessageType,
        booking: &BookingSnapshot,
    ) -> Result<PublishReceipt> {
        let mut violations = Violations::new();
        violations
            .require_positive("bookingId", booking.booking_id)
            .require_non_blank("userEmail", &booking.user_email);
        violations.into_result()?;

        let message = BookingMessage {
            meta: self.meta(message_type),
            booking_id: booking.booking_id,
            user_id: booking.user_id,
            user_name: booking.user_name.clone(),
            user_email: booking.user_email.clone(),
            destinations: booking.destinations.clone(),
            total_price: booking.total_price,
            guests: booking.guests,
            nights: booking.nights,
            start_date: booking.start_date,
            confirmed: booking.confirmed,
            reminder_sent: booking.reminder_sent,
            cancellation_status: booking.cancellation_status,
            created_at: booking.created_at,
        };
        self.publisher.publish(&self.queues.bookings, &message).await
    }

    /// Announce a new cancellation request.
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`](travel_messaging_core::RelayError::Validation)
    /// for a non-positive `cancellationId` or `bookingId`, otherwise any
    /// publish error.
    pub async fn publish_cancellation_requested(
        &self,
        details: &CancellationDetails,
    ) -> Result<PublishReceipt> {
        self.publish_cancellation(MessageType::CancellationRequested, details, None)
            .await
    }

    /// Announce an admin's decision on a cancellation request.
    ///
    /// # Errors
    ///
    /// Same as [`Self::publish_cancellation_requested`].
    pub async fn publish_cancellation_decision(
        &self,
        details: &CancellationDetails,
        approved: bool,
    ) -> Result<PublishReceipt> {
        self.publish_cancellation(MessageType::CancellationDecision, details, Some(approved))
            .await
    }

    async fn publish_cancellation(
        &self,
        message_type: MessageType,
        details: &CancellationDetails,
        approved: Option<bool>,
    ) -> Result<PublishReceipt> {
        let mut violations = Violations::new();
        violations
            .require_positive("cancellationId", details.cancellation_id)
            .require_positive("bookingId", details.booking_id);
        violations.into_result()?;

        let destination = (!details.destinations.is_empty()).then(|| details.destinations.join(", "));

        let message = CancellationMessage {
            meta: self.meta(message_type),
            cancellation_id: details.cancellation_id,
            booking_id: details.booking_id,
            user_id: details.user_id,
            user_name: details.user_name.clone(),
            user_email: details.user_email.clone(),
            email: None,
            reason: details.reason.clone(),
            requested_at: details.requested_at,
            reviewed_at: details.reviewed_at,
            status: details.status,
            admin_comment: details.admin_comment.clone(),
            admin_email: details.admin_email.clone(),
            destination,
            trip_start_date: details.trip_start_date,
            nights: details.nights,
            approved,
        };
        self.publisher.publish(&self.queues.bookings, &message).await
    }

    /// Send a notification to the admin inbox.
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`](travel_messaging_core::RelayError::Validation)
    /// if `adminEmail` has no `@`, the subject is blank or longer than
    /// [`AdminNotificationMessage::MAX_SUBJECT_LEN`] characters, or the body
    /// is blank; otherwise any publish error.
    pub async fn publish_admin_notification(&self, notice: &AdminNotice) -> Result<PublishReceipt> {
        notice.validate()?;

        let message = AdminNotificationMessage {
            meta: self.meta(MessageType::AdminNotification),
            admin_email: notice.admin_email.clone(),
            subject: notice.subject.clone(),
            body: notice.body.clone(),
            booking_id: notice.booking_id,
            user_id: notice.user_id,
            user_name: notice.user_name.clone(),
            user_email: notice.user_email.clone(),
            metadata: notice.metadata.clone(),
        };
        self.publisher.publish(&self.queues.admin, &message).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn notice() -> AdminNotice {
        AdminNotice {
            admin_email: "admin@example.com".to_string(),
            subject: "New Trip Cancellation Request - Booking #42".to_string(),
            body: "Please review.".to_string(),
            ..AdminNotice::default()
        }
    }

    #[test]
    fn admin_notice_accepts_a_complete_notice() {
        assert!(notice().validate().is_ok());
    }

    #[test]
    fn admin_notice_rejects_every_bad_field() {
        let bad = AdminNotice {
            admin_email: "admin.example.com".to_string(),
            subject: " ".to_string(),
            body: String::new(),
            ..AdminNotice::default()
        };
        assert_eq!(
            bad.validate().unwrap_err().invalid_fields(),
            ["adminEmail", "subject", "body"]
        );
    }

    #[test]
    fn subject_limit_counts_characters() {
        let at_limit = AdminNotice {
            subject: "é".repeat(AdminNotificationMessage::MAX_SUBJECT_LEN),
            ..notice()
        };
        assert!(at_limit.validate().is_ok());

        let over = AdminNotice {
            subject: "x".repeat(AdminNotificationMessage::MAX_SUBJECT_LEN + 1),
            ..notice()
        };
        assert_eq!(over.validate().unwrap_err().invalid_fields(), ["subject"]);
    }
}
