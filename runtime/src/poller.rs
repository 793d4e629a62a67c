//! Bounded, cancellable polling.
//!
//! Brokers offer a non-blocking "get next message" call. [`Poller::poll`]
//! turns that into a bounded wait: it fetches, and while the queue is empty
//! sleeps a short interval (clamped to what is left of the window) and
//! fetches again, until a delivery arrives, the window closes, or the
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use travel_messaging_core::broker::{Broker, BrokerError};
use travel_messaging_core::transport::{AckMode, Delivery};

use crate::metrics::RelayMetrics;

/// Default sleep between empty fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A delivery arrived.
    Delivered(Delivery),
    /// The window closed with the queue empty.
    Empty,
    /// The cancellation token fired first.
    Cancelled,
}

/// Bounded wait for the next delivery on a queue.
#[derive(Clone)]
pub struct Poller {
    broker: Arc<dyn Broker>,
    interval: Duration,
}

impl Poller {
    /// Poller with the default interval.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sleep `interval` between empty fetches.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait up to `timeout` for a delivery on `queue`.
    ///
    /// At least one fetch is made, even with a zero timeout. An empty queue
    /// is [`PollOutcome::Empty`], not an error.
    ///
    /// # Errors
    ///
    /// Returns the broker's error if a fetch fails.
    pub async fn poll(
        &self,
        queue: &str,
        timeout: Duration,
        mode: AckMode,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Ok(PollOutcome::Cancelled);
            }

            if let Some(delivery) = self.broker.get(queue, mode).await? {
                tracing::trace!(queue = %queue, tag = %delivery.tag, "Delivery fetched");
                return Ok(PollOutcome::Delivered(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                RelayMetrics::record_poll_empty();
                tracing::debug!(queue = %queue, timeout_ms = timeout.as_millis(), "Poll window elapsed");
                return Ok(PollOutcome::Empty);
            }

            let nap = self.interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                () = sleep(nap) => {}
            }
        }
    }
}
