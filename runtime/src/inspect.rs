//! Read-only view of dead-letter queues.
//!
//! Two ways to look at a DLQ:
//!
//! - [`PeekMode::Browse`] fetches with manual ack and holds every delivery
//!   until the read is over, then returns them all with redelivery. Depth is
//!   unchanged afterwards, but the browsed messages now sit behind anything
//!   that arrived during the read.
//! - [`PeekMode::Drain`] fetches with auto ack. Every message read is gone
//!   from the queue, malformed ones included.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use travel_messaging_core::broker::{Broker, BrokerError};
use travel_messaging_core::codec;
use travel_messaging_core::error::{RelayError, Result};
use travel_messaging_core::message::{AnyMessage, Envelope};
use travel_messaging_core::transport::{AckMode, DeliveryTag};
use travel_messaging_core::validation::require_queue_name;

use crate::config::RelayConfig;
use crate::poller::{PollOutcome, Poller};

/// How a peek treats what it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeekMode {
    /// Return every delivery to the queue after reading.
    #[default]
    Browse,
    /// Remove what is read.
    Drain,
}

impl PeekMode {
    const fn ack_mode(self) -> AckMode {
        match self {
            Self::Browse => AckMode::Manual,
            Self::Drain => AckMode::Auto,
        }
    }
}

impl fmt::Display for PeekMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Browse => "browse",
            Self::Drain => "drain",
        })
    }
}

/// A string that names no [`PeekMode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown peek mode: {0} (expected 'browse' or 'drain')")]
pub struct UnknownPeekMode(pub String);

impl FromStr for PeekMode {
    type Err = UnknownPeekMode;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "browse" => Ok(Self::Browse),
            "drain" => Ok(Self::Drain),
            _ => Err(UnknownPeekMode(raw.to_string())),
        }
    }
}

/// Reads decoded envelopes from a queue.
#[derive(Clone)]
pub struct Inspector {
    broker: Arc<dyn Broker>,
    poller: Poller,
    timeout: Duration,
}

impl Inspector {
    /// Inspector on `broker` with the peek timeout and poll interval from
    /// `config`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: &RelayConfig) -> Self {
        Self {
            poller: Poller::new(Arc::clone(&broker)).with_interval(config.poll_interval),
            broker,
            timeout: config.peek.timeout,
        }
    }

    /// Wait up to `timeout` per poll.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Up to `max_messages` decoded envelopes from `queue`, in delivery order.
    ///
    /// Deliveries that fail to decode are logged and skipped; they do not
    /// count toward `max_messages`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`] for an empty queue name
    /// - [`RelayError::Transport`] if the broker handle is closed or a fetch fails
    pub async fn peek(&self, queue: &str, max_messages: u32, mode: PeekMode) -> Result<Vec<AnyMessage>> {
        self.peek_until(queue, max_messages, mode, &CancellationToken::new())
            .await
    }

    /// [`Self::peek`], stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Same as [`Self::peek`].
    #[tracing::instrument(skip(self, cancel), name = "peek")]
    pub async fn peek_until(
        &self,
        queue: &str,
        max_messages: u32,
        mode: PeekMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnyMessage>> {
        require_queue_name("queue", queue)?;
        if !self.broker.is_open() {
            return Err(RelayError::Transport(BrokerError::ChannelClosed(
                "broker handle is not open".to_string(),
            )));
        }

        let mut held = Vec::new();
        let read = self
            .read(queue, max_messages, mode, cancel, &mut held)
            .await;
        let released = self.release(&held).await;

        let messages = read?;
        released?;

        tracing::info!(
            queue = %queue,
            mode = %mode,
            returned = messages.len(),
            "Peek finished"
        );
        Ok(messages)
    }

    async fn read(
        &self,
        queue: &str,
        max_messages: u32,
        mode: PeekMode,
        cancel: &CancellationToken,
        held: &mut Vec<DeliveryTag>,
    ) -> std::result::Result<Vec<AnyMessage>, BrokerError> {
        let limit = usize::try_from(max_messages).unwrap_or(usize::MAX);
        let mut messages = Vec::new();

        while messages.len() < limit {
            let delivery = match self
                .poller
                .poll(queue, self.timeout, mode.ack_mode(), cancel)
                .await?
            {
                PollOutcome::Delivered(delivery) => delivery,
                PollOutcome::Empty | PollOutcome::Cancelled => break,
            };

            if mode == PeekMode::Browse {
                held.push(delivery.tag);
            }

            match codec::decode_any(&delivery.body) {
                Ok(message) => {
                    tracing::debug!(
                        message_id = %message.message_id(),
                        message_type = %message.message_type(),
                        "Peeked"
                    );
                    messages.push(message);
                }
                Err(e) => tracing::warn!(
                    queue = %queue,
                    tag = %delivery.tag,
                    error = %e,
                    "Skipping undecodable delivery"
                ),
            }
        }

        Ok(messages)
    }

    /// Nack every held delivery with redelivery, in fetch order.
    ///
    /// Keeps going past failures so one bad tag does not strand the rest;
    /// reports the first failure.
    async fn release(&self, held: &[DeliveryTag]) -> std::result::Result<(), BrokerError> {
        let mut first_error = None;
        for tag in held {
            if let Err(e) = self.broker.nack(*tag, true).await {
                tracing::warn!(tag = %tag, error = %e, "Failed to return browsed delivery");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
