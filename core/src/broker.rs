//! Broker abstraction for queue-based messaging.
//!
//! This module provides the [`Broker`] trait: the handful of queue operations
//! the relay needs from a message broker. Every operation is point-to-point on a
//! named queue; there are no subscriptions. Consumption is pull-based
//! ([`Broker::get`]) so callers control exactly how many messages leave a queue.
//!
//! # Delivery Contract
//!
//! - **At-least-once**: a delivery fetched in [`AckMode::Manual`] stays owned by
//!   the caller until it is acked or nacked.
//! - **Ack removes**: an acknowledged delivery is never redelivered from that queue.
//! - **Nack with requeue goes to the tail**: a delivery nacked with `requeue = true`
//!   becomes ready again *behind* every message that was ready at the time. A
//!   caller draining a queue therefore sees every other message before it sees a
//!   rejected one again.
//! - **Nack without requeue drops**: the broker discards (or dead-letters) it.
//!
//! # Implementations
//!
//! - `InMemoryBroker` (travel-messaging-testing) - For testing, with fault injection
//! - `AmqpBroker` (travel-messaging-amqp) - For production (RabbitMQ via AMQP 0-9-1)
//!
//! # Example
//!
//! ```rust,ignore
//! use travel_messaging_core::{AckMode, Broker};
//!
//! async fn drain_one(broker: &dyn Broker) -> Result<(), BrokerError> {
//!     if let Some(delivery) = broker.get("travel.bookings.dlq", AckMode::Manual).await? {
//!         broker.ack(delivery.tag).await?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::transport::{AckMode, Delivery, DeliveryTag, OutboundMessage, QueueStats};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to reach the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The channel is closed, or was never opened
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The named queue does not exist
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// The broker refused the message (nack, unroutable, ...)
    #[error("Publish rejected for queue '{queue}': {reason}")]
    PublishRejected {
        /// The destination queue
        queue: String,
        /// The reason given by the broker
        reason: String,
    },

    /// Ack / nack for a tag this channel does not own
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(DeliveryTag),

    /// Any other protocol or I/O failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Whether the handle itself is unusable, as opposed to one operation failing.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ChannelClosed(_))
    }
}

/// Boxed future returned by every [`Broker`] operation.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Trait for broker implementations.
///
/// One handle wraps one connection and one channel. Handles are shared as
/// `Arc<dyn Broker>`; implementations must serialize channel access
/// internally so concurrent callers are safe.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as a trait object (`Arc<dyn Broker>`).
pub trait Broker: Send + Sync {
    /// Publish one message to a queue through the default exchange.
    ///
    /// Resolves once the broker has confirmed the message.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::QueueNotFound`] / [`BrokerError::PublishRejected`] if the
    ///   broker cannot route or refuses the message
    /// - [`BrokerError::ChannelClosed`] if the handle is closed
    fn publish<'a>(&'a self, queue: &'a str, message: &'a OutboundMessage) -> BrokerFuture<'a, ()>;

    /// Fetch the next ready message without waiting.
    ///
    /// Returns `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::QueueNotFound`] if the queue does not exist
    /// - [`BrokerError::ChannelClosed`] if the handle is closed
    fn get<'a>(&'a self, queue: &'a str, mode: AckMode) -> BrokerFuture<'a, Option<Delivery>>;

    /// Acknowledge a delivery fetched in [`AckMode::Manual`].
    ///
    /// # Errors
    ///
    /// - [`BrokerError::UnknownDeliveryTag`] if the tag is not outstanding
    /// - [`BrokerError::ChannelClosed`] if the handle is closed
    fn ack(&self, tag: DeliveryTag) -> BrokerFuture<'_, ()>;

    /// Reject a delivery fetched in [`AckMode::Manual`].
    ///
    /// With `requeue` the message returns to the tail of its queue.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::UnknownDeliveryTag`] if the tag is not outstanding
    /// - [`BrokerError::ChannelClosed`] if the handle is closed
    fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerFuture<'_, ()>;

    /// Depth and consumer count of a queue.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::QueueNotFound`] if the queue does not exist
    fn queue_stats<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, QueueStats>;

    /// Drop every ready message in a queue, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::QueueNotFound`] if the queue does not exist
    fn purge<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, u32>;

    /// Whether the connection and channel are usable.
    fn is_open(&self) -> bool;

    /// Close the channel and connection.
    ///
    /// Outstanding manual deliveries are returned to their queues by the
    /// broker. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] if the close handshake fails.
    fn close(&self) -> BrokerFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_classified() {
        assert!(BrokerError::Connection("refused".into()).is_connection_failure());
        assert!(BrokerError::ChannelClosed("closed by peer".into()).is_connection_failure());
        assert!(!BrokerError::QueueNotFound("travel.bookings".into()).is_connection_failure());
        assert!(!BrokerError::UnknownDeliveryTag(DeliveryTag(4)).is_connection_failure());
    }

    #[test]
    fn display_names_the_queue() {
        let error = BrokerError::PublishRejected {
            queue: "travel.bookings".into(),
            reason: "unroutable".into(),
        };
        assert_eq!(
            error.to_string(),
            "Publish rejected for queue 'travel.bookings': unroutable"
        );
    }
}
