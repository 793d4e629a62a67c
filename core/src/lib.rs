//! # Travel Messaging Core
//!
//! Core types and traits for the travel booking message relay.
//!
//! The booking platform relays booking, cancellation and admin events through a
//! message broker. Messages that downstream consumers reject end up in a
//! dead-letter queue (DLQ); the runtime crate drains those queues back into
//! circulation. This crate holds everything those operations agree on:
//!
//! - **Envelopes**: typed messages with transport identity (`messageId`),
//!   a closed type tag, a creation timestamp, and a retry counter
//! - **Codec**: canonical lowerCamelCase JSON encoding and a tolerant decoder
//! - **Headers**: provenance metadata with a closed set of value kinds
//! - **Broker**: the seam every broker adapter implements
//! - **Errors**: the transport / serialization / validation taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   publish    ┌──────────────┐
//! │  Producers   │─────────────▶│ travel.*     │
//! └──────────────┘              └──────┬───────┘
//!                                      │ rejected downstream
//!                                      ▼
//! ┌──────────────┐   poll/ack   ┌──────────────┐
//! │   Requeue    │◀────────────▶│ travel.*.dlq │
//! │ Coordinator  │              └──────────────┘
//! └──────┬───────┘
//!        │ republish (new messageId, retryCount + 1)
//!        ▼
//!   target queue
//! ```
//!
//! ## Example
//!
//! ```
//! use travel_messaging_core::codec;
//! use travel_messaging_core::message::{AnyMessage, Envelope, MessageType};
//!
//! let payload = br#"{
//!     "MessageId": "6f1c",
//!     "type": 0,
//!     "timestamp": "2025-03-01T10:00:00",
//!     "bookingId": 42,
//!     "userId": 7,
//!     "userName": "Ada",
//!     "userEmail": "ada@example.com",
//!     "destinations": ["Lisbon"]
//! }"#;
//!
//! let message = codec::decode_any(payload).unwrap();
//! assert_eq!(message.message_type(), MessageType::BookingConfirmation);
//! assert!(matches!(message, AnyMessage::Booking(ref b) if b.booking_id == 42));
//! ```

pub mod broker;
pub mod codec;
pub mod environment;
pub mod error;
pub mod headers;
pub mod message;
pub mod queues;
pub mod transport;
pub mod validation;
mod wire_time;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, BrokerFuture};
pub use chrono::{DateTime, Utc};
pub use error::{RelayError, Result};
pub use headers::{HeaderValue, Headers};
pub use message::{
    AdminNotificationMessage, AnyMessage, BookingMessage, CancellationMessage, Envelope,
    MessageId, MessageMeta, MessageType,
};
pub use transport::{AckMode, Delivery, DeliveryTag, OutboundMessage, QueueStats, TransportProperties};
