//! Queue purge and status listing.

use serde::Serialize;
use std::sync::Arc;
use travel_messaging_core::broker::{Broker, BrokerError};
use travel_messaging_core::error::Result;
use travel_messaging_core::validation::require_queue_name;

use crate::metrics::RelayMetrics;

/// Status of one queue in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueStatus {
    /// The queue exists.
    Found {
        /// Queue name
        queue: String,
        /// Messages ready for delivery
        messages: u32,
        /// Active consumers
        consumers: u32,
    },
    /// The broker has no such queue.
    NotFound {
        /// Queue name
        queue: String,
    },
}

impl QueueStatus {
    /// Queue name.
    #[must_use]
    pub fn queue(&self) -> &str {
        match self {
            Self::Found { queue, .. } | Self::NotFound { queue } => queue,
        }
    }
}

/// Administrative queue operations.
#[derive(Clone)]
pub struct Maintenance {
    broker: Arc<dyn Broker>,
}

impl Maintenance {
    /// Maintenance on `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Drop every ready message in `queue`.
    ///
    /// Unacknowledged deliveries are not affected.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`](travel_messaging_core::RelayError::Validation) for an empty queue name
    /// - [`RelayError::Transport`](travel_messaging_core::RelayError::Transport) if the queue is missing or the broker fails
    pub async fn purge(&self, queue: &str) -> Result<u32> {
        require_queue_name("queue", queue)?;
        let purged = self.broker.purge(queue).await?;
        RelayMetrics::record_purge(queue, purged);
        tracing::warn!(queue = %queue, purged, "Queue purged");
        Ok(purged)
    }

    /// Status of each of `queues`, in the order given.
    ///
    /// A missing queue is reported as [`QueueStatus::NotFound`] and does not
    /// fail the listing.
    ///
    /// # Errors
    ///
    /// [`RelayError::Transport`](travel_messaging_core::RelayError::Transport)
    /// for any broker failure other than a missing queue.
    pub async fn list_queues<S: AsRef<str>>(&self, queues: &[S]) -> Result<Vec<QueueStatus>> {
        let mut statuses = Vec::with_capacity(queues.len());
        for queue in queues {
            let queue = queue.as_ref();
            let status = match self.broker.queue_stats(queue).await {
                Ok(stats) => QueueStatus::Found {
                    queue: stats.queue,
                    messages: stats.messages,
                    consumers: stats.consumers,
                },
                Err(BrokerError::QueueNotFound(_)) => {
                    tracing::debug!(queue = %queue, "Queue not found");
                    QueueStatus::NotFound {
                        queue: queue.to_string(),
                    }
                }
                Err(e) => return Err(e.into()),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }
}
