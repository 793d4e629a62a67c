//! Dead-letter requeue.
//!
//! [`RequeueCoordinator`] moves envelopes out of a dead-letter queue and back
//! into circulation, one delivery at a time:
//!
//! ```text
//! poll DLQ ──▶ decode ──▶ next hop ──▶ publish target ──▶ ack
//!                │                          │
//!                └── malformed ──▶ nack ◀───┘ refused
//! ```
//!
//! Each hop gets a new `messageId`, a fresh timestamp and `retryCount + 1`.
//! The source headers are copied and stamped with `x-requeued` and
//! `x-requeued-from`; the source content type and correlation id carry over.
//!
//! A delivery the run cannot process is nacked with redelivery, which puts it
//! behind every message still waiting. The run records the DLQ depth when it
//! starts; once that many deliveries have been fetched, a delivery whose
//! [`Delivery::fingerprint`] matches one rejected earlier in the run means the
//! queue has been cycled, and the run stops. Byte-identical dead letters within
//! the starting depth are each processed on their own.
//!
//! Under head placement a rejected delivery comes straight back, so it is
//! retried until the starting depth is used up.
//!
//! Per-message failures never abort a run. A broker failure while fetching,
//! acking or nacking does, with [`RelayError::BatchAborted`] carrying the
//! progress made so far.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use travel_messaging_core::broker::{Broker, BrokerError};
use travel_messaging_core::codec;
use travel_messaging_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use travel_messaging_core::error::{RelayError, Result};
use travel_messaging_core::headers::{self, HeaderValue, Headers};
use travel_messaging_core::message::{AnyMessage, Envelope};
use travel_messaging_core::transport::{AckMode, Delivery};
use travel_messaging_core::validation::Violations;

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::poller::{PollOutcome, Poller};
use crate::publisher::{PublishOptions, Publisher};

/// What to do with envelopes that keep coming back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PoisonPolicy {
    /// Requeue regardless of `retryCount`.
    #[default]
    Unbounded,
    /// Move envelopes whose `retryCount` has reached `max_retries` to
    /// `queue` instead of the target.
    Park {
        /// Retry ceiling
        max_retries: u32,
        /// Parking queue
        queue: String,
    },
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `max_messages` polls were made.
    #[default]
    LimitReached,
    /// A poll came back empty.
    QueueDrained,
    /// Past the starting depth, a delivery this run already rejected came back.
    WrappedAround,
    /// The cancellation token fired.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LimitReached => "limit reached",
            Self::QueueDrained => "queue drained",
            Self::WrappedAround => "wrapped around",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Outcome of one requeue run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[must_use]
pub struct RequeueReport {
    /// Envelopes republished to the target and acked
    pub requeued: u32,
    /// Envelopes moved to the parking queue and acked
    pub parked: u32,
    /// Deliveries that failed to decode (returned to the DLQ)
    pub malformed: u32,
    /// Envelopes the broker refused (returned to the DLQ)
    pub publish_failures: u32,
    /// Polls made
    pub attempts: u32,
    /// Why the run ended
    pub stop: StopReason,
}

impl RequeueReport {
    /// Deliveries that left the DLQ.
    #[must_use]
    pub const fn completed(&self) -> u32 {
        self.requeued + self.parked
    }

    /// Deliveries returned to the DLQ.
    #[must_use]
    pub const fn returned(&self) -> u32 {
        self.malformed + self.publish_failures
    }
}

enum Disposition {
    Requeued,
    Parked,
    Malformed,
    Refused,
}

/// Drains dead-letter queues back into circulation.
pub struct RequeueCoordinator {
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    poller: Poller,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    timeout: Duration,
    poison: PoisonPolicy,
}

impl RequeueCoordinator {
    /// Coordinator on `broker` with the timeout, poll interval and poison
    /// policy from `config`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: &RelayConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            publisher: Publisher::new(Arc::clone(&broker)).with_clock(Arc::clone(&clock)),
            poller: Poller::new(Arc::clone(&broker)).with_interval(config.poll_interval),
            broker,
            clock,
            ids: Arc::new(UuidGenerator),
            timeout: config.requeue.timeout,
            poison: config.poison.clone(),
        }
    }

    /// Use `clock` for hop timestamps and `x-requeued`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.publisher = self.publisher.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Use `ids` for hop message ids.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Wait up to `timeout` per poll.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the poison policy.
    #[must_use]
    pub fn with_poison_policy(mut self, policy: PoisonPolicy) -> Self {
        self.poison = policy;
        self
    }

    /// Move up to `max_messages` envelopes from `dlq` to `target`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Validation`] if a queue name is empty
    /// - [`RelayError::Transport`] if the broker handle is not open
    /// - [`RelayError::BatchAborted`] if reading the DLQ depth, fetching, acking
    ///   or nacking fails
    pub async fn requeue_from_dlq(
        &self,
        dlq: &str,
        target: &str,
        max_messages: u32,
    ) -> Result<RequeueReport> {
        self.requeue_until(dlq, target, max_messages, &CancellationToken::new())
            .await
    }

    /// [`Self::requeue_from_dlq`], stopping early when `cancel` fires.
    ///
    /// Cancellation is observed between deliveries and during poll waits;
    /// a delivery being processed is always settled first.
    ///
    /// # Errors
    ///
    /// Same as [`Self::requeue_from_dlq`].
    #[tracing::instrument(skip(self, cancel), name = "requeue")]
    pub async fn requeue_until(
        &self,
        dlq: &str,
        target: &str,
        max_messages: u32,
        cancel: &CancellationToken,
    ) -> Result<RequeueReport> {
        let mut violations = Violations::new();
        violations
            .require_non_blank("dlq", dlq)
            .require_non_blank("target", target);
        violations.into_result()?;

        if !self.broker.is_open() {
            tracing::error!("Broker handle is not open");
            return Err(RelayError::Transport(BrokerError::ChannelClosed(
                "broker handle is not open".to_string(),
            )));
        }

        let started = Instant::now();
        let mut report = RequeueReport::default();
        let mut rejected = HashSet::new();

        let initial_depth = if max_messages == 0 {
            0
        } else {
            self.broker
                .queue_stats(dlq)
                .await
                .map_err(|e| abort(&report, e))?
                .messages
        };

        tracing::info!(
            timeout_ms = self.timeout.as_millis(),
            initial_depth,
            "Requeue started"
        );

        report.stop = loop {
            if report.attempts >= max_messages {
                break StopReason::LimitReached;
            }
            report.attempts += 1;

            let delivery = match self
                .poller
                .poll(dlq, self.timeout, AckMode::Manual, cancel)
                .await
            {
                Ok(PollOutcome::Delivered(delivery)) => delivery,
                Ok(PollOutcome::Empty) => break StopReason::QueueDrained,
                Ok(PollOutcome::Cancelled) => break StopReason::Cancelled,
                Err(e) => return Err(abort(&report, e)),
            };

            let fingerprint = delivery.fingerprint();
            if report.attempts > initial_depth && rejected.contains(&fingerprint) {
                tracing::debug!(tag = %delivery.tag, "Rejected delivery came back around");
                self.settle(&delivery, false, &report).await?;
                break StopReason::WrappedAround;
            }

            match self.process(&delivery, dlq, target).await {
                Disposition::Requeued => {
                    self.settle(&delivery, true, &report).await?;
                    report.requeued += 1;
                    RelayMetrics::record_requeued();
                }
                Disposition::Parked => {
                    self.settle(&delivery, true, &report).await?;
                    report.parked += 1;
                    RelayMetrics::record_parked();
                }
                Disposition::Malformed => {
                    self.settle(&delivery, false, &report).await?;
                    rejected.insert(fingerprint);
                    report.malformed += 1;
                    RelayMetrics::record_malformed();
                }
                Disposition::Refused => {
                    self.settle(&delivery, false, &report).await?;
                    rejected.insert(fingerprint);
                    report.publish_failures += 1;
                }
            }
        };

        RelayMetrics::record_requeue_run(started.elapsed());
        tracing::info!(
            requeued = report.requeued,
            parked = report.parked,
            malformed = report.malformed,
            publish_failures = report.publish_failures,
            attempts = report.attempts,
            stop = %report.stop,
            "Requeue finished"
        );
        Ok(report)
    }

    async fn process(&self, delivery: &Delivery, dlq: &str, target: &str) -> Disposition {
        let envelope = match codec::decode_any(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    tag = %delivery.tag,
                    transport_id = delivery.properties.message_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Malformed dead letter returned to queue"
                );
                return Disposition::Malformed;
            }
        };

        let now = self.clock.now();
        let next = envelope.next_hop(self.ids.next_id(), now);
        let mut stamped: Headers = delivery.properties.headers.clone();

        let (destination, disposition) = match &self.poison {
            PoisonPolicy::Park { max_retries, queue } if envelope.retry_count() >= *max_retries => {
                stamped.insert(headers::PARKED_FROM.to_string(), HeaderValue::from(dlq));
                stamped.insert(
                    headers::PARKED_REASON.to_string(),
                    HeaderValue::Text(format!(
                        "retryCount {} reached limit {max_retries}",
                        envelope.retry_count()
                    )),
                );
                (queue.as_str(), Disposition::Parked)
            }
            _ => {
                stamped.insert(headers::REQUEUED_AT.to_string(), HeaderValue::iso8601(now));
                stamped.insert(headers::REQUEUED_FROM.to_string(), HeaderValue::from(dlq));
                (target, Disposition::Requeued)
            }
        };

        let options = PublishOptions::new()
            .with_headers(stamped)
            .with_correlation_id(delivery.properties.correlation_id.clone())
            .with_content_type(delivery.properties.content_type.clone());

        match self.publisher.publish_with(destination, &next, options).await {
            Ok(_) => {
                log_hop(&envelope, &next, destination, &disposition);
                disposition
            }
            Err(e) => {
                tracing::warn!(
                    original_message_id = %envelope.message_id(),
                    destination = %destination,
                    error = %e,
                    "Republish failed, dead letter returned to queue"
                );
                Disposition::Refused
            }
        }
    }

    async fn settle(&self, delivery: &Delivery, ack: bool, report: &RequeueReport) -> Result<()> {
        let settled = if ack {
            self.broker.ack(delivery.tag).await
        } else {
            self.broker.nack(delivery.tag, true).await
        };
        settled.map_err(|e| {
            if ack {
                tracing::error!(
                    tag = %delivery.tag,
                    "Ack failed after republish; the dead letter will be delivered again"
                );
            }
            abort(report, e)
        })
    }
}

fn log_hop(original: &AnyMessage, next: &AnyMessage, destination: &str, disposition: &Disposition) {
    match disposition {
        Disposition::Parked => tracing::warn!(
            original_message_id = %original.message_id(),
            message_id = %next.message_id(),
            retry_count = next.retry_count(),
            destination = %destination,
            "Dead letter parked"
        ),
        _ => tracing::info!(
            original_message_id = %original.message_id(),
            message_id = %next.message_id(),
            retry_count = next.retry_count(),
            destination = %destination,
            "Dead letter requeued"
        ),
    }
}

fn abort(report: &RequeueReport, source: BrokerError) -> RelayError {
    tracing::error!(
        completed = report.completed(),
        error = %source,
        "Requeue aborted"
    );
    RelayError::BatchAborted {
        completed: report.completed(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_totals() {
        let report = RequeueReport {
            requeued: 3,
            parked: 1,
            malformed: 2,
            publish_failures: 1,
            attempts: 8,
            stop: StopReason::WrappedAround,
        };
        assert_eq!(report.completed(), 4);
        assert_eq!(report.returned(), 3);
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StopReason::QueueDrained).ok();
        assert_eq!(json.as_deref(), Some("\"queue_drained\""));
    }
}
