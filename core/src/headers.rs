//! Transport headers.
//!
//! Headers carry provenance (`x-requeued-from`, `x-resent-from`, ...) next to
//! the payload. Values are restricted to the three kinds every broker adapter
//! can round-trip. Iteration order is sorted by key.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Message type name of the payload.
pub const MESSAGE_TYPE: &str = "message-type";
/// Retry counter of the payload.
pub const RETRY_COUNT: &str = "retry-count";
/// When the message was requeued out of a DLQ.
pub const REQUEUED_AT: &str = "x-requeued";
/// DLQ the message was requeued out of.
pub const REQUEUED_FROM: &str = "x-requeued-from";
/// When the message was manually resent.
pub const RESENT_AT: &str = "x-resent-from";
/// Queue a parked message came from.
pub const PARKED_FROM: &str = "x-parked-from";
/// Why a message was parked.
pub const PARKED_REASON: &str = "x-parked-reason";

/// Header map with deterministic iteration order.
pub type Headers = BTreeMap<String, HeaderValue>;

/// A single header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Point in time.
    Timestamp(DateTime<Utc>),
}

impl HeaderValue {
    /// Text view, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer view.
    ///
    /// Producers in other stacks stamp counters as strings, so numeric text
    /// is accepted too.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Timestamp(_) => None,
        }
    }

    /// Timestamp view.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(value) => Some(*value),
            Self::Text(text) => crate::wire_time::parse(text),
            Self::Integer(_) => None,
        }
    }

    /// ISO-8601 text header for `at`.
    #[must_use]
    pub fn iso8601(at: DateTime<Utc>) -> Self {
        Self::Text(crate::wire_time::format(&at))
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Timestamp(value) => f.write_str(&crate::wire_time::format(value)),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<DateTime<Utc>> for HeaderValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Retry counter carried in `headers`, if present and numeric.
#[must_use]
pub fn retry_count(headers: &Headers) -> Option<u32> {
    headers
        .get(RETRY_COUNT)
        .and_then(HeaderValue::as_integer)
        .and_then(|value| u32::try_from(value).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integer_view_accepts_numeric_text() {
        assert_eq!(HeaderValue::from("3").as_integer(), Some(3));
        assert_eq!(HeaderValue::from(4_u32).as_integer(), Some(4));
        assert_eq!(HeaderValue::from("three").as_integer(), None);
    }

    #[test]
    fn retry_count_rejects_negative() {
        let mut headers = Headers::new();
        headers.insert(RETRY_COUNT.into(), HeaderValue::Integer(-1));
        assert_eq!(retry_count(&headers), None);
        headers.insert(RETRY_COUNT.into(), HeaderValue::Integer(2));
        assert_eq!(retry_count(&headers), Some(2));
    }

    #[test]
    fn iso8601_header_is_text() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let value = HeaderValue::iso8601(at);
        assert_eq!(value.as_text(), Some("2025-03-01T10:00:00Z"));
        assert_eq!(value.as_timestamp(), Some(at));
    }

    #[test]
    fn iteration_is_sorted() {
        let mut headers = Headers::new();
        headers.insert(REQUEUED_FROM.into(), "travel.bookings.dlq".into());
        headers.insert(MESSAGE_TYPE.into(), "BookingConfirmation".into());
        headers.insert(RETRY_COUNT.into(), 1_u32.into());
        let keys: Vec<_> = headers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![MESSAGE_TYPE, RETRY_COUNT, REQUEUED_FROM]);
    }
}
