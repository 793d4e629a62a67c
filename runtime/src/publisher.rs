//! Envelope publishing.
//!
//! [`Publisher`] is the only path from an envelope to the broker. It encodes
//! the envelope as canonical JSON and attaches transport metadata:
//!
//! - content type `application/json` (or the caller's override)
//! - persistent delivery
//! - transport message id = the envelope's `messageId`
//! - headers `message-type` and `retry-count`, plus caller-supplied headers
//!
//! Each call sends exactly once. Transport failures are returned, never
//! retried here.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use travel_messaging_core::broker::Broker;
use travel_messaging_core::codec;
use travel_messaging_core::environment::{Clock, SystemClock};
use travel_messaging_core::error::Result;
use travel_messaging_core::headers::{self, HeaderValue, Headers};
use travel_messaging_core::message::{Envelope, MessageId, MessageType};
use travel_messaging_core::transport::{OutboundMessage, TransportProperties};
use travel_messaging_core::validation::require_queue_name;

use crate::metrics::RelayMetrics;

/// Extra transport metadata for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Headers sent next to the stamped ones. `message-type` and
    /// `retry-count` are always taken from the envelope.
    pub headers: Headers,
    /// Correlation id to carry.
    pub correlation_id: Option<String>,
    /// Content type override.
    pub content_type: Option<String>,
}

impl PublishOptions {
    /// No extra metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Start from an existing header map.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Carry a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Override the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// What was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Destination queue
    pub queue: String,
    /// Transport identity of the published envelope
    pub message_id: MessageId,
    /// Type tag
    pub message_type: MessageType,
    /// Retry counter of the published envelope
    pub retry_count: u32,
    /// Publish time stamped on the transport properties
    pub published_at: DateTime<Utc>,
}

/// Publishes envelopes to named queues.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    /// Publisher on `broker` using the wall clock.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the transport timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying broker handle.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Publish `envelope` to `queue` with the standard metadata.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`](travel_messaging_core::RelayError::Validation) for an empty queue name
    /// - [`RelayError::Serialization`](travel_messaging_core::RelayError::Serialization) if the envelope cannot be encoded
    /// - [`RelayError::Transport`](travel_messaging_core::RelayError::Transport) if the broker refuses or is unreachable
    pub async fn publish<E: Envelope>(&self, queue: &str, envelope: &E) -> Result<PublishReceipt> {
        self.publish_with(queue, envelope, PublishOptions::default())
            .await
    }

    /// Publish `envelope` to `queue` with extra metadata.
    ///
    /// # Errors
    ///
    /// Same as [`Self::publish`].
    #[tracing::instrument(
        skip(self, envelope, options),
        fields(message_id = %envelope.message_id(), message_type = %envelope.message_type()),
        name = "publish"
    )]
    pub async fn publish_with<E: Envelope>(
        &self,
        queue: &str,
        envelope: &E,
        options: PublishOptions,
    ) -> Result<PublishReceipt> {
        require_queue_name("queue", queue)?;

        let body = codec::encode(envelope)?;
        let published_at = self.clock.now();
        let message = outbound(envelope, body, options, published_at);

        if let Err(e) = self.broker.publish(queue, &message).await {
            RelayMetrics::record_publish_failure(queue);
            tracing::warn!(queue = %queue, error = %e, "Publish failed");
            return Err(e.into());
        }

        RelayMetrics::record_publish(queue);
        tracing::info!(
            queue = %queue,
            retry_count = envelope.retry_count(),
            bytes = message.body.len(),
            "Message published"
        );

        Ok(PublishReceipt {
            queue: queue.to_string(),
            message_id: envelope.message_id().clone(),
            message_type: envelope.message_type(),
            retry_count: envelope.retry_count(),
            published_at,
        })
    }
}

fn outbound<E: Envelope>(
    envelope: &E,
    body: Vec<u8>,
    options: PublishOptions,
    published_at: DateTime<Utc>,
) -> OutboundMessage {
    let mut properties = TransportProperties::json(envelope.message_id().as_str(), published_at);
    if let Some(content_type) = options.content_type {
        properties.content_type = Some(content_type);
    }
    properties.correlation_id = options.correlation_id;

    properties.headers = options.headers;
    properties.headers.insert(
        headers::MESSAGE_TYPE.to_string(),
        HeaderValue::from(envelope.message_type().as_str()),
    );
    properties.headers.insert(
        headers::RETRY_COUNT.to_string(),
        HeaderValue::from(envelope.retry_count()),
    );

    OutboundMessage { properties, body }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use travel_messaging_core::{BrokerError, RelayError};
    use travel_messaging_testing::{InMemoryBroker, fixtures, test_clock};

    fn publisher(broker: &InMemoryBroker) -> Publisher {
        Publisher::new(Arc::new(broker.clone())).with_clock(Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn stamps_transport_metadata() {
        let broker = InMemoryBroker::new();
        let mut envelope = fixtures::booking(42);
        envelope.meta.retry_count = 2;

        let receipt = publisher(&broker)
            .publish_with(
                "travel.bookings",
                &envelope,
                PublishOptions::new()
                    .with_header("x-origin", "ops")
                    .with_header(headers::RETRY_COUNT, 99_i64)
                    .with_correlation_id(Some("corr-1".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(receipt.message_id.as_str(), "booking-42");
        assert_eq!(receipt.retry_count, 2);

        let sent = broker.published_to("travel.bookings");
        assert_eq!(sent.len(), 1);
        let properties = &sent[0].properties;
        assert!(properties.persistent);
        assert_eq!(properties.content_type.as_deref(), Some("application/json"));
        assert_eq!(properties.message_id.as_deref(), Some("booking-42"));
        assert_eq!(properties.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(properties.timestamp, Some(test_clock().now()));
        assert_eq!(
            properties.headers.get(headers::MESSAGE_TYPE),
            Some(&HeaderValue::from("BookingConfirmation"))
        );
        assert_eq!(headers::retry_count(&properties.headers), Some(2));
        assert_eq!(properties.headers.get("x-origin"), Some(&HeaderValue::from("ops")));
    }

    #[tokio::test]
    async fn body_is_canonical_json() {
        let broker = InMemoryBroker::new();
        publisher(&broker)
            .publish("travel.bookings", &fixtures::booking(7))
            .await
            .unwrap();

        let body = &broker.published_to("travel.bookings")[0].body;
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["bookingId"], 7);
        assert_eq!(json["type"], "BookingConfirmation");
    }

    #[tokio::test]
    async fn empty_queue_name_is_rejected_before_sending() {
        let broker = InMemoryBroker::new();
        let error = publisher(&broker)
            .publish("  ", &fixtures::booking(1))
            .await
            .unwrap_err();

        assert_eq!(error.invalid_fields(), ["queue"]);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn broker_refusal_is_a_transport_error() {
        let broker = InMemoryBroker::new();
        broker.reject_publishes_to("travel.bookings", "unroutable");

        let error = publisher(&broker)
            .publish("travel.bookings", &fixtures::booking(1))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::Transport(BrokerError::PublishRejected { .. })
        ));
    }
}
