//! Mapping between the relay's transport types and lapin's.
//!
//! Header values the relay cannot represent (arrays, nested tables, floats,
//! decimals, byte arrays, void) are dropped on the way in, with a debug log.

use chrono::{DateTime, Utc};
use lapin::BasicProperties;
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use travel_messaging_core::broker::BrokerError;
use travel_messaging_core::headers::{HeaderValue, Headers};
use travel_messaging_core::transport::TransportProperties;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Relay headers as an AMQP field table.
///
/// Timestamps before 1970 have no AMQP form and go out as ISO-8601 text.
pub(crate) fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers {
        let value = match value {
            HeaderValue::Text(text) => AMQPValue::LongString(LongString::from(text.clone())),
            HeaderValue::Integer(number) => AMQPValue::LongLongInt(*number),
            HeaderValue::Timestamp(at) => u64::try_from(at.timestamp()).map_or_else(
                |_| AMQPValue::LongString(LongString::from(value.to_string())),
                AMQPValue::Timestamp,
            ),
        };
        table.insert(ShortString::from(name.clone()), value);
    }
    table
}

/// AMQP field table as relay headers.
pub(crate) fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .filter_map(|(name, value)| {
            let converted = header_value(value);
            if converted.is_none() {
                tracing::debug!(header = %name.as_str(), "Dropping header of unsupported kind");
            }
            converted.map(|value| (name.as_str().to_string(), value))
        })
        .collect()
}

fn header_value(value: &AMQPValue) -> Option<HeaderValue> {
    Some(match value {
        AMQPValue::LongString(text) => {
            HeaderValue::Text(String::from_utf8_lossy(text.as_bytes()).into_owned())
        }
        AMQPValue::ShortString(text) => HeaderValue::Text(text.as_str().to_string()),
        AMQPValue::Boolean(flag) => HeaderValue::Text(flag.to_string()),
        AMQPValue::LongLongInt(n) => HeaderValue::Integer(*n),
        AMQPValue::LongInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::ShortInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::ShortShortInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::LongUInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::ShortUInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => HeaderValue::Integer(i64::from(*n)),
        AMQPValue::Timestamp(seconds) => HeaderValue::Timestamp(timestamp(*seconds)?),
        _ => return None,
    })
}

fn timestamp(seconds: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(seconds).ok()?, 0)
}

/// Relay transport properties as AMQP basic properties.
///
/// AMQP timestamps have second precision; sub-second parts are dropped.
pub(crate) fn to_basic_properties(properties: &TransportProperties) -> BasicProperties {
    let mut basic = BasicProperties::default().with_headers(to_field_table(&properties.headers));
    if let Some(content_type) = &properties.content_type {
        basic = basic.with_content_type(ShortString::from(content_type.clone()));
    }
    if properties.persistent {
        basic = basic.with_delivery_mode(PERSISTENT);
    }
    if let Some(message_id) = &properties.message_id {
        basic = basic.with_message_id(ShortString::from(message_id.clone()));
    }
    if let Some(correlation_id) = &properties.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(at) = properties.timestamp {
        if let Ok(seconds) = u64::try_from(at.timestamp()) {
            basic = basic.with_timestamp(seconds);
        }
    }
    basic
}

/// AMQP basic properties as relay transport properties.
pub(crate) fn from_basic_properties(basic: &BasicProperties) -> TransportProperties {
    TransportProperties {
        content_type: basic.content_type().as_ref().map(|s| s.as_str().to_string()),
        persistent: *basic.delivery_mode() == Some(PERSISTENT),
        message_id: basic.message_id().as_ref().map(|s| s.as_str().to_string()),
        correlation_id: basic
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        timestamp: (*basic.timestamp()).and_then(timestamp),
        headers: basic
            .headers()
            .as_ref()
            .map(from_field_table)
            .unwrap_or_default(),
    }
}

/// Classify a lapin error for an operation on `queue`.
pub(crate) fn broker_error(error: &lapin::Error, queue: &str) -> BrokerError {
    match error {
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND)) =>
        {
            BrokerError::QueueNotFound(queue.to_string())
        }
        lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed(error.to_string()),
        lapin::Error::InvalidConnectionState(_) | lapin::Error::IOError(_) => {
            BrokerError::Connection(error.to_string())
        }
        _ => BrokerError::Transport(error.to_string()),
    }
}

/// Whether the server closed the channel with this error.
///
/// Soft protocol errors (`NOT_FOUND`, `PRECONDITION_FAILED`, ...) end the
/// channel but leave the connection usable.
pub(crate) fn closes_channel(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::ProtocolError(amqp) if matches!(amqp.kind(), AMQPErrorKind::Soft(_))
    ) || matches!(error, lapin::Error::InvalidChannelState(_))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn headers_survive_a_round_trip() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut headers = Headers::new();
        headers.insert("message-type".into(), HeaderValue::from("BookingConfirmation"));
        headers.insert("retry-count".into(), HeaderValue::from(2_u32));
        headers.insert("x-requeued".into(), HeaderValue::iso8601(at));
        headers.insert("x-first-seen".into(), HeaderValue::Timestamp(at));

        let back = from_field_table(&to_field_table(&headers));

        assert_eq!(back, headers);
    }

    #[test]
    fn pre_epoch_timestamps_travel_as_text() {
        let at = Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 0).unwrap();
        let mut headers = Headers::new();
        headers.insert("x-first-seen".into(), HeaderValue::Timestamp(at));

        let table = to_field_table(&headers);
        assert!(matches!(
            table.inner().get(&ShortString::from("x-first-seen")),
            Some(AMQPValue::LongString(_))
        ));

        let back = from_field_table(&table);
        let value = back.get("x-first-seen").unwrap();
        assert_eq!(value.as_timestamp(), Some(at));
        assert_ne!(value.as_timestamp(), DateTime::from_timestamp(0, 0));
    }

    #[test]
    fn unsupported_kinds_are_dropped_and_narrow_ints_widen() {
        let mut table = FieldTable::default();
        table.insert("x-death".into(), AMQPValue::FieldArray(Vec::new().into()));
        table.insert("x-ratio".into(), AMQPValue::Double(0.5));
        table.insert("x-count".into(), AMQPValue::LongInt(3));
        table.insert("x-flag".into(), AMQPValue::Boolean(true));

        let headers = from_field_table(&table);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-count"), Some(&HeaderValue::Integer(3)));
        assert_eq!(headers.get("x-flag"), Some(&HeaderValue::from("true")));
    }

    #[test]
    fn properties_survive_a_round_trip_at_second_precision() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut properties = TransportProperties::json("m-1", at);
        properties.correlation_id = Some("corr-9".to_string());
        properties
            .headers
            .insert("retry-count".into(), HeaderValue::Integer(1));

        let back = from_basic_properties(&to_basic_properties(&properties));

        assert_eq!(back, properties);
    }
}
