//! Injected dependencies for time and identity.
//!
//! Every operation that stamps a timestamp or mints a `messageId` takes these
//! through trait objects so tests can pin them down.

use crate::message::MessageId;
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use travel_messaging_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = chrono::Utc::now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of transport identities.
///
/// Implementations must never hand out the same id twice within a process.
pub trait IdGenerator: Send + Sync {
    /// Mint a fresh message id.
    fn next_id(&self) -> MessageId;
}

/// Random UUID v4 ids, rendered in hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> MessageId {
        MessageId::new(uuid::Uuid::new_v4().to_string())
    }
}
