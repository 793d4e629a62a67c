//! # Travel Messaging Runtime
//!
//! Operations of the travel booking message relay.
//!
//! Every component takes the broker as an injected `Arc<dyn Broker>`; the
//! caller owns the connection and closes it on shutdown.
//!
//! ## Core Components
//!
//! - **Publisher**: encodes an envelope and sends it with transport metadata
//! - **Poller**: bounded, cancellable wait for the next delivery on a queue
//! - **Requeue Coordinator**: drains a dead-letter queue back into circulation
//! - **Inspector**: reads DLQ contents for diagnosis
//! - **Manual Publisher**: operator-built bookings and resends
//! - **Producers**: domain-facing publish helpers with conventional routing
//! - **Maintenance**: purge and queue status listing
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use travel_messaging_runtime::{RelayConfig, RequeueCoordinator};
//!
//! let config = RelayConfig::from_env()?;
//! let broker: Arc<dyn Broker> = Arc::new(connect(&config).await?);
//!
//! let coordinator = RequeueCoordinator::new(Arc::clone(&broker), &config);
//! let report = coordinator
//!     .requeue_from_dlq(&config.queues.bookings_dlq, &config.queues.bookings, 100)
//!     .await?;
//! tracing::info!(requeued = report.requeued, "done");
//!
//! broker.close().await?;
//! ```

/// Environment-driven configuration
pub mod config;

/// Read-only view of dead-letter queues
pub mod inspect;

/// Queue purge and status listing
pub mod maintenance;

/// Operator-triggered publish and resend
pub mod manual;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded, cancellable polling
pub mod poller;

/// Domain-facing producers
pub mod producer;

/// Envelope publishing
pub mod publisher;

/// Dead-letter requeue
pub mod requeue;

/// Retry logic with exponential backoff
pub mod retry;

pub use config::{ConfigError, RelayConfig};
pub use inspect::{Inspector, PeekMode};
pub use maintenance::{Maintenance, QueueStatus};
pub use manual::{ManualBookingRequest, ManualPublisher};
pub use poller::{PollOutcome, Poller};
pub use producer::{AdminNotice, BookingProducer, BookingSnapshot, CancellationDetails};
pub use publisher::{PublishOptions, PublishReceipt, Publisher};
pub use requeue::{PoisonPolicy, RequeueCoordinator, RequeueReport, StopReason};
pub use tokio_util::sync::CancellationToken;
