//! # Travel Messaging Testing
//!
//! Testing utilities for the travel booking message relay.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a [`Broker`](travel_messaging_core::Broker) with fault injection
//! - Deterministic environment mocks ([`FixedClock`], [`SequentialIds`])
//! - Envelope fixtures and proptest strategies
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use travel_messaging_testing::{fixtures, test_clock, InMemoryBroker, SequentialIds};
//!
//! #[tokio::test]
//! async fn requeues_dead_letters() {
//!     let broker = InMemoryBroker::new().with_queue("travel.bookings.dlq");
//!     broker.seed_envelope("travel.bookings.dlq", &fixtures::booking(42));
//!
//!     let coordinator = RequeueCoordinator::new(Arc::new(broker.clone()), config)
//!         .with_clock(Arc::new(test_clock()))
//!         .with_ids(Arc::new(SequentialIds::new("hop")));
//!     let report = coordinator.requeue_from_dlq("travel.bookings.dlq", "travel.bookings", 10).await?;
//!     assert_eq!(report.requeued, 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use travel_messaging_core::environment::{Clock, IdGenerator};
use travel_messaging_core::message::MessageId;

pub mod broker;
pub mod fixtures;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, MessageId, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use travel_messaging_testing::mocks::FixedClock;
    /// use travel_messaging_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable ids: `<prefix>-0001`, `<prefix>-0002`, ...
    ///
    /// ```
    /// use travel_messaging_core::environment::IdGenerator;
    /// use travel_messaging_testing::SequentialIds;
    ///
    /// let ids = SequentialIds::new("hop");
    /// assert_eq!(ids.next_id().as_str(), "hop-0001");
    /// assert_eq!(ids.next_id().as_str(), "hop-0002");
    /// ```
    #[derive(Debug)]
    pub struct SequentialIds {
        prefix: String,
        counter: AtomicU64,
    }

    impl SequentialIds {
        /// Start a sequence at 1.
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: AtomicU64::new(0),
            }
        }

        /// How many ids have been handed out.
        #[must_use]
        pub fn issued(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> MessageId {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            MessageId::new(format!("{}-{n:04}", self.prefix))
        }
    }
}

/// Install a test-writer tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, Operation};
pub use mocks::{FixedClock, SequentialIds, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new("m");
        let first = ids.next_id();
        let second = ids.next_id();
        assert_ne!(first, second);
        assert_eq!(second.as_str(), "m-0002");
        assert_eq!(ids.issued(), 2);
    }
}
