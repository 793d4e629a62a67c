//! Transport-level types shared by every broker adapter.

use crate::headers::Headers;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Content type every envelope is published with.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker-assigned handle for acknowledging one delivery.
///
/// Only meaningful on the channel that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a fetched delivery is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The caller must ack or nack the delivery.
    #[default]
    Manual,
    /// The delivery counts as acknowledged once handed out.
    Auto,
}

/// Delivery metadata that travels next to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProperties {
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Whether the broker should persist the message.
    pub persistent: bool,
    /// Transport id, normally the envelope's `messageId`.
    pub message_id: Option<String>,
    /// Correlation id, if the producer set one.
    pub correlation_id: Option<String>,
    /// Publish time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Header map.
    pub headers: Headers,
}

impl TransportProperties {
    /// Persistent JSON properties for a message with the given id.
    #[must_use]
    pub fn json(message_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            persistent: true,
            message_id: Some(message_id.into()),
            correlation_id: None,
            timestamp: Some(timestamp),
            headers: Headers::new(),
        }
    }
}

impl Default for TransportProperties {
    fn default() -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            persistent: true,
            message_id: None,
            correlation_id: None,
            timestamp: None,
            headers: Headers::new(),
        }
    }
}

/// A message ready to hand to a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Delivery metadata.
    pub properties: TransportProperties,
    /// Encoded payload.
    pub body: Vec<u8>,
}

/// A message fetched from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle for ack / nack.
    pub tag: DeliveryTag,
    /// Queue it was fetched from.
    pub queue: String,
    /// Whether the broker has handed this message out before.
    pub redelivered: bool,
    /// Delivery metadata as published.
    pub properties: TransportProperties,
    /// Raw payload.
    pub body: Vec<u8>,
}

impl Delivery {
    /// Content identity of the delivery, independent of its tag.
    ///
    /// Two fetches of the same message, before and after a redelivery,
    /// produce the same fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.properties.message_id.hash(&mut hasher);
        self.body.hash(&mut hasher);
        hasher.finish()
    }

    /// The delivery's payload and properties as a message to publish again.
    #[must_use]
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            properties: self.properties.clone(),
            body: self.body.clone(),
        }
    }
}

/// Depth and consumer count of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Queue name.
    pub queue: String,
    /// Messages ready for delivery.
    pub messages: u32,
    /// Active consumers.
    pub consumers: u32,
}
