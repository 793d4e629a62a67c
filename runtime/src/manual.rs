//! Operator-triggered publish and resend.
//!
//! [`ManualPublisher::publish_manual`] builds a fresh booking confirmation
//! from a handful of operator-supplied fields. [`ManualPublisher::resend`]
//! sends the next hop of any envelope the operator already holds, for
//! instance one copied out of a peek.

use std::sync::Arc;
use travel_messaging_core::broker::Broker;
use travel_messaging_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use travel_messaging_core::error::Result;
use travel_messaging_core::headers::{self, HeaderValue};
use travel_messaging_core::message::{BookingMessage, Envelope, MessageMeta, MessageType};
use travel_messaging_core::queues;
use travel_messaging_core::validation::{Violations, require_queue_name};

use crate::publisher::{PublishOptions, Publisher};

/// Fields an operator supplies to publish a booking by hand.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct ManualBookingRequest {
    /// Booking id, must be positive
    pub booking_id: i64,
    /// Traveller account
    pub user_id: i64,
    /// Traveller display name
    pub user_name: String,
    /// Traveller email address
    pub user_email: String,
    /// Comma-separated destination names
    pub destination: String,
    /// Total price
    pub total_price: f64,
    /// Number of guests
    pub guests: u32,
    /// Number of nights
    pub nights: u32,
    /// Destination queue
    pub queue: String,
}

impl ManualBookingRequest {
    /// Request with the required fields; everything else defaults to zero
    /// and the queue to `travel.bookings`.
    pub fn new(
        booking_id: i64,
        user_name: impl Into<String>,
        user_email: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            booking_id,
            user_id: 0,
            user_name: user_name.into(),
            user_email: user_email.into(),
            destination: destination.into(),
            total_price: 0.0,
            guests: 0,
            nights: 0,
            queue: queues::BOOKINGS.to_string(),
        }
    }

    /// Set the traveller account.
    pub const fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set the total price.
    pub const fn with_price(mut self, total_price: f64) -> Self {
        self.total_price = total_price;
        self
    }

    /// Set the guest count.
    pub const fn with_guests(mut self, guests: u32) -> Self {
        self.guests = guests;
        self
    }

    /// Set the night count.
    pub const fn with_nights(mut self, nights: u32) -> Self {
        self.nights = nights;
        self
    }

    /// Publish to `queue` instead of `travel.bookings`.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Every violated rule, reported together.
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`](travel_messaging_core::RelayError::Validation)
    /// naming each offending field.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Violations::new();
        violations
            .require_positive("bookingId", self.booking_id)
            .require_non_blank("userName", &self.user_name)
            .require_non_blank("userEmail", &self.user_email)
            .require("destination", !self.destinations().is_empty());
        violations.into_result()
    }

    /// Destination names from the comma-separated `destination`, trimmed,
    /// blanks dropped.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.destination
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Publishes operator-built and resent envelopes.
#[derive(Clone)]
pub struct ManualPublisher {
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ManualPublisher {
    /// Manual publisher on `broker` using the wall clock and UUID ids.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            publisher: Publisher::new(broker).with_clock(Arc::clone(&clock)),
            clock,
            ids: Arc::new(UuidGenerator),
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

    /// Build a booking confirmation from `request` and publish it.
    ///
    /// Validation happens before anything touches the broker.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`](travel_messaging_core::RelayError::Validation) listing every invalid field
    /// - [`RelayError::Transport`](travel_messaging_core::RelayError::Transport) if the publish fails
    #[tracing::instrument(skip(self, request), fields(booking_id = request.booking_id, queue = %request.queue))]
    pub async fn publish_manual(&self, request: &ManualBookingRequest) -> Result<BookingMessage> {
        request.validate()?;
        require_queue_name("queue", &request.queue)?;

        let now = self.clock.now();
        let message = BookingMessage {
            meta: MessageMeta::new(self.ids.next_id(), MessageType::BookingConfirmation, now),
            booking_id: request.booking_id,
            user_id: request.user_id,
            user_name: request.user_name.trim().to_string(),
            user_email: request.user_email.trim().to_string(),
            destinations: request.destinations(),
            total_price: request.total_price,
            guests: request.guests,
            nights: request.nights,
            start_date: Some(now),
            confirmed: false,
            reminder_sent: false,
            cancellation_status: 0,
            created_at: Some(now),
        };

        self.publisher.publish(&request.queue, &message).await?;
        tracing::info!(message_id = %message.message_id(), "Manual booking published");
        Ok(message)
    }

    /// Publish the next hop of `original` to `target`.
    ///
    /// The copy keeps every domain field, gets a new `messageId`, a fresh
    /// timestamp and `retryCount + 1`, and carries an `x-resent-from` header.
    /// `original` is untouched.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`](travel_messaging_core::RelayError::Validation) for an empty queue name
    /// - [`RelayError::Transport`](travel_messaging_core::RelayError::Transport) if the publish fails
    #[tracing::instrument(
        skip(self, original),
        fields(original_message_id = %original.message_id(), message_type = %original.message_type())
    )]
    pub async fn resend<E: Envelope>(&self, original: &E, target: &str) -> Result<E> {
        let now = self.clock.now();
        let copy = original.next_hop(self.ids.next_id(), now);

        let options =
            PublishOptions::new().with_header(headers::RESENT_AT, HeaderValue::iso8601(now));
        self.publisher.publish_with(target, &copy, options).await?;

        tracing::info!(
            message_id = %copy.message_id(),
            retry_count = copy.retry_count(),
            target = %target,
            "Message resent"
        );
        Ok(copy)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let request = ManualBookingRequest::new(5, "Ada", "ada@example.com", "Lisbon");
        assert_eq!(request.queue, "travel.bookings");
        assert_eq!(request.guests, 0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validation_lists_every_field() {
        let request = ManualBookingRequest::new(0, "", " ", "");
        let error = request.validate().unwrap_err();
        assert_eq!(
            error.invalid_fields(),
            ["bookingId", "userName", "userEmail", "destination"]
        );
    }

    #[test]
    fn destinations_drop_blank_names() {
        let request = ManualBookingRequest::new(5, "Ada", "ada@example.com", " Lisbon ,, Porto,");
        assert_eq!(request.destinations(), ["Lisbon", "Porto"]);
        assert!(ManualBookingRequest::new(5, "Ada", "ada@example.com", " , ")
            .destinations()
            .is_empty());
    }

    #[test]
    fn builders_set_optional_fields() {
        let request = ManualBookingRequest::new(5, "Ada", "ada@example.com", "Lisbon")
            .with_user_id(9)
            .with_price(99.5)
            .with_guests(3)
            .with_nights(4)
            .with_queue("travel.bookings.replay");
        assert_eq!(request.user_id, 9);
        assert!((request.total_price - 99.5).abs() < f64::EPSILON);
        assert_eq!(request.guests, 3);
        assert_eq!(request.nights, 4);
        assert_eq!(request.queue, "travel.bookings.replay");
    }
}
