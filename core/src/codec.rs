//! Wire codec for envelopes.
//!
//! Encoding is canonical: lowerCamelCase keys, `type` as the variant name,
//! RFC 3339 timestamps.
//!
//! Decoding is tolerant, because the platform's producers are not uniform:
//!
//! - top-level keys match case-insensitively and ignoring `_` / `-`
//!   (`MessageId`, `message_id` and `messageId` are the same field); an exact
//!   key wins over a folded one
//! - `type` may be the variant name in any casing, the `CancellationRequest`
//!   alias, or the legacy integer code
//! - timestamps may omit the offset (read as UTC) or carry only a date
//! - unknown keys are ignored

use crate::message::{
    AdminNotificationMessage, AnyMessage, BookingMessage, CancellationMessage, Envelope,
    MessageKind, MessageMeta, MessageType, WireMessage,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The envelope could not be serialized
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// The payload is not JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The payload is JSON but not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// The payload does not describe a valid message
    #[error("Invalid {kind} message: {reason}")]
    Decode {
        /// The family the decoder expected
        kind: String,
        /// What was wrong
        reason: String,
    },
}

/// Encode an envelope as canonical JSON.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<E: Envelope>(envelope: &E) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a payload as a specific message family.
///
/// # Errors
///
/// - [`CodecError::InvalidJson`] / [`CodecError::NotAnObject`] for malformed payloads
/// - [`CodecError::Decode`] if fields are missing or invalid, or if `type`
///   belongs to a different family
pub fn decode<M: WireMessage>(bytes: &[u8]) -> Result<M, CodecError> {
    decode_object(parse_object(bytes)?)
}

/// Decode a payload of any family, dispatching on its `type` field.
///
/// # Errors
///
/// - [`CodecError::InvalidJson`] / [`CodecError::NotAnObject`] for malformed payloads
/// - [`CodecError::Decode`] if `type` is missing or unknown, or the fields do
///   not fit the family it names
pub fn decode_any(bytes: &[u8]) -> Result<AnyMessage, CodecError> {
    let object = parse_object(bytes)?;
    let message_type = peek_type(&object)?;

    match message_type.kind() {
        MessageKind::Booking => decode_object::<BookingMessage>(object).map(AnyMessage::Booking),
        MessageKind::Cancellation => {
            decode_object::<CancellationMessage>(object).map(AnyMessage::Cancellation)
        }
        MessageKind::AdminNotification => {
            decode_object::<AdminNotificationMessage>(object).map(AnyMessage::AdminNotification)
        }
    }
}

fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(CodecError::NotAnObject),
        Err(e) => Err(CodecError::InvalidJson(e.to_string())),
    }
}

fn peek_type(object: &Map<String, Value>) -> Result<MessageType, CodecError> {
    let raw = object
        .get("type")
        .or_else(|| {
            object
                .iter()
                .find(|(key, _)| fold(key) == "type")
                .map(|(_, value)| value)
        })
        .ok_or_else(|| CodecError::Decode {
            kind: "envelope".to_string(),
            reason: "missing field `type`".to_string(),
        })?;

    MessageType::deserialize(raw).map_err(|e| CodecError::Decode {
        kind: "envelope".to_string(),
        reason: e.to_string(),
    })
}

fn decode_object<M: WireMessage>(object: Map<String, Value>) -> Result<M, CodecError> {
    let normalized = normalize_keys(object, MessageMeta::WIRE_FIELDS, M::DOMAIN_FIELDS);
    let message: M = serde_json::from_value(Value::Object(normalized)).map_err(|e| CodecError::Decode {
        kind: M::KIND.to_string(),
        reason: e.to_string(),
    })?;

    let message_type = message.message_type();
    if message_type.kind() != M::KIND {
        return Err(CodecError::Decode {
            kind: M::KIND.to_string(),
            reason: format!("type {message_type} belongs to {} messages", message_type.kind()),
        });
    }
    Ok(message)
}

/// Rename keys to their canonical spelling.
///
/// Exact canonical keys are taken first; a folded key is only used when the
/// canonical key is still free. Keys that match nothing pass through.
fn normalize_keys(
    object: Map<String, Value>,
    meta_fields: &[&'static str],
    domain_fields: &[&'static str],
) -> Map<String, Value> {
    let canonical: HashMap<String, &'static str> = meta_fields
        .iter()
        .chain(domain_fields)
        .map(|field| (fold(field), *field))
        .collect();

    let mut normalized = Map::with_capacity(object.len());
    let mut folded = Vec::new();

    for (key, value) in object {
        if canonical.values().any(|field| *field == key) {
            normalized.insert(key, value);
        } else {
            folded.push((key, value));
        }
    }

    for (key, value) in folded {
        let target = canonical
            .get(&fold(&key))
            .map_or(key, |field| (*field).to_string());
        if !normalized.contains_key(&target) {
            normalized.insert(target, value);
        }
    }

    normalized
}

fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
