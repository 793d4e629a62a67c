//! Message envelopes relayed between the booking platform's services.
//!
//! Every message carries the same transport metadata ([`MessageMeta`]):
//! a `messageId` identifying one transport attempt, a closed [`MessageType`]
//! tag, a creation timestamp and a retry counter. The domain payload differs
//! per family:
//!
//! | type | struct |
//! | --- | --- |
//! | `BookingConfirmation`, `BookingCancelled` | [`BookingMessage`] |
//! | `CancellationRequested`, `CancellationDecision` | [`CancellationMessage`] |
//! | `AdminNotification` | [`AdminNotificationMessage`] |
//!
//! Domain identity (`bookingId`, `cancellationId`, ...) is stable across
//! hops. Transport identity is not: each resend or requeue produces a copy
//! via [`Envelope::next_hop`].

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Transport identity of one message attempt.
///
/// Opaque on the wire. Locally minted ids are UUID v4 text, but ids decoded
/// from other producers are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of message types.
///
/// Encoded as the variant name. Decoding also accepts the legacy integer
/// codes `0..=4`, any letter casing, and the `CancellationRequest` alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    /// A booking was confirmed.
    BookingConfirmation,
    /// A booking was cancelled.
    BookingCancelled,
    /// A traveller asked to cancel a trip.
    CancellationRequested,
    /// An admin approved or rejected a cancellation request.
    CancellationDecision,
    /// Free-form notification for the admin inbox.
    AdminNotification,
}

impl MessageType {
    /// Every variant, in legacy code order.
    pub const ALL: [Self; 5] = [
        Self::BookingConfirmation,
        Self::BookingCancelled,
        Self::CancellationRequested,
        Self::CancellationDecision,
        Self::AdminNotification,
    ];

    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingConfirmation => "BookingConfirmation",
            Self::BookingCancelled => "BookingCancelled",
            Self::CancellationRequested => "CancellationRequested",
            Self::CancellationDecision => "CancellationDecision",
            Self::AdminNotification => "AdminNotification",
        }
    }

    /// Legacy integer code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::BookingConfirmation => 0,
            Self::BookingCancelled => 1,
            Self::CancellationRequested => 2,
            Self::CancellationDecision => 3,
            Self::AdminNotification => 4,
        }
    }

    /// Resolve a legacy integer code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::BookingConfirmation),
            1 => Some(Self::BookingCancelled),
            2 => Some(Self::CancellationRequested),
            3 => Some(Self::CancellationDecision),
            4 => Some(Self::AdminNotification),
            _ => None,
        }
    }

    /// Which payload family carries this type.
    #[must_use]
    pub const fn kind(self) -> MessageKind {
        match self {
            Self::BookingConfirmation | Self::BookingCancelled => MessageKind::Booking,
            Self::CancellationRequested | Self::CancellationDecision => MessageKind::Cancellation,
            Self::AdminNotification => MessageKind::AdminNotification,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string that names no [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return Self::from_code(code).ok_or_else(|| UnknownMessageType(raw.to_string()));
        }
        if trimmed.eq_ignore_ascii_case("CancellationRequest") {
            return Ok(Self::CancellationRequested);
        }
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownMessageType(raw.to_string()))
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Self::from_code(code)
                .ok_or_else(|| de::Error::custom(format!("unknown message type code {code}"))),
            Raw::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

/// Payload family of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`BookingMessage`]
    Booking,
    /// [`CancellationMessage`]
    Cancellation,
    /// [`AdminNotificationMessage`]
    AdminNotification,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Booking => "booking",
            Self::Cancellation => "cancellation",
            Self::AdminNotification => "admin notification",
        })
    }
}

/// Transport metadata shared by every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// Identity of this transport attempt.
    pub message_id: MessageId,
    /// Type tag.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Creation time of this attempt.
    #[serde(with = "crate::wire_time")]
    pub timestamp: DateTime<Utc>,
    /// Number of resend / requeue hops so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl MessageMeta {
    /// Canonical wire names of the metadata fields.
    pub const WIRE_FIELDS: &'static [&'static str] =
        &["messageId", "type", "timestamp", "retryCount"];

    /// Metadata for a first attempt (`retryCount` 0).
    #[must_use]
    pub const fn new(message_id: MessageId, message_type: MessageType, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id,
            message_type,
            timestamp,
            retry_count: 0,
        }
    }
}

/// Anything that can be published as a message.
pub trait Envelope: Serialize + Clone + Send + Sync + 'static {
    /// Transport metadata.
    fn meta(&self) -> &MessageMeta;

    /// Mutable transport metadata.
    fn meta_mut(&mut self) -> &mut MessageMeta;

    /// Type tag.
    fn message_type(&self) -> MessageType {
        self.meta().message_type
    }

    /// Transport identity.
    fn message_id(&self) -> &MessageId {
        &self.meta().message_id
    }

    /// Hops so far.
    fn retry_count(&self) -> u32 {
        self.meta().retry_count
    }

    /// Copy of this envelope for the next transport attempt.
    ///
    /// The copy has the given id, a timestamp of `now` and a retry count one
    /// higher than `self`. Domain fields are untouched and `self` is never
    /// modified.
    #[must_use]
    fn next_hop(&self, message_id: MessageId, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        let meta = next.meta_mut();
        meta.message_id = message_id;
        meta.timestamp = now;
        meta.retry_count = meta.retry_count.saturating_add(1);
        next
    }
}

/// An envelope with a concrete wire shape the codec can decode.
pub trait WireMessage: Envelope + DeserializeOwned {
    /// Payload family.
    const KIND: MessageKind;

    /// Wire names of the type-specific fields, aliases included.
    const DOMAIN_FIELDS: &'static [&'static str];
}

/// Booking confirmed / cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingMessage {
    /// Transport metadata.
    #[serde(flatten)]
    pub meta: MessageMeta,
    /// Booking this message is about.
    pub booking_id: i64,
    /// Traveller account.
    pub user_id: i64,
    /// Traveller display name.
    pub user_name: String,
    /// Traveller email address.
    pub user_email: String,
    /// Destination names, in itinerary order.
    #[serde(alias = "destination", deserialize_with = "destinations::deserialize")]
    pub destinations: Vec<String>,
    /// Total price of the trip.
    #[serde(default)]
    pub total_price: f64,
    /// Number of guests.
    #[serde(default)]
    pub guests: u32,
    /// Number of nights.
    #[serde(default)]
    pub nights: u32,
    /// First day of the trip.
    #[serde(default, with = "crate::wire_time::option")]
    pub start_date: Option<DateTime<Utc>>,
    /// Whether the booking is confirmed.
    #[serde(default)]
    pub confirmed: bool,
    /// Whether the pre-trip reminder went out.
    #[serde(default)]
    pub reminder_sent: bool,
    /// Cancellation state code of the booking.
    #[serde(default)]
    pub cancellation_status: i32,
    /// When the booking was created.
    #[serde(default, with = "crate::wire_time::option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Cancellation requested / decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationMessage {
    /// Transport metadata.
    #[serde(flatten)]
    pub meta: MessageMeta,
    /// Cancellation request id.
    pub cancellation_id: i64,
    /// Booking being cancelled.
    pub booking_id: i64,
    /// Traveller account.
    pub user_id: i64,
    /// Traveller display name.
    pub user_name: String,
    /// Traveller email address.
    pub user_email: String,
    /// Contact address given with the request, when it differs.
    #[serde(default)]
    pub email: Option<String>,
    /// Traveller's reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// When the request was filed.
    #[serde(default, with = "crate::wire_time::option")]
    pub requested_at: Option<DateTime<Utc>>,
    /// When an admin reviewed it.
    #[serde(default, with = "crate::wire_time::option")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Request state code.
    #[serde(default)]
    pub status: i32,
    /// Reviewer's comment.
    #[serde(default)]
    pub admin_comment: Option<String>,
    /// Reviewer's address.
    #[serde(default)]
    pub admin_email: Option<String>,
    /// Destinations, joined with `", "`.
    #[serde(default)]
    pub destination: Option<String>,
    /// First day of the trip.
    #[serde(default, with = "crate::wire_time::option")]
    pub trip_start_date: Option<DateTime<Utc>>,
    /// Number of nights.
    #[serde(default)]
    pub nights: Option<u32>,
    /// Decision outcome, once decided.
    #[serde(default)]
    pub approved: Option<bool>,
}

/// Notification for the admin inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationMessage {
    /// Transport metadata.
    #[serde(flatten)]
    pub meta: MessageMeta,
    /// Recipient.
    pub admin_email: String,
    /// Subject line, at most [`Self::MAX_SUBJECT_LEN`] characters.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Related booking.
    #[serde(default)]
    pub booking_id: Option<i64>,
    /// Related traveller account.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Related traveller name.
    #[serde(default)]
    pub user_name: Option<String>,
    /// Related traveller email.
    #[serde(default)]
    pub user_email: Option<String>,
    /// Free-form extra data.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl AdminNotificationMessage {
    /// Longest subject the admin inbox accepts, in characters.
    pub const MAX_SUBJECT_LEN: usize = 150;
}

macro_rules! impl_envelope {
    ($ty:ty, $kind:expr, [$($field:literal),* $(,)?]) => {
        impl Envelope for $ty {
            fn meta(&self) -> &MessageMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut MessageMeta {
                &mut self.meta
            }
        }

        impl WireMessage for $ty {
            const KIND: MessageKind = $kind;
            const DOMAIN_FIELDS: &'static [&'static str] = &[$($field),*];
        }
    };
}

impl_envelope!(
    BookingMessage,
    MessageKind::Booking,
    [
        "bookingId",
        "userId",
        "userName",
        "userEmail",
        "destinations",
        "destination",
        "totalPrice",
        "guests",
        "nights",
        "startDate",
        "confirmed",
        "reminderSent",
        "cancellationStatus",
        "createdAt",
    ]
);

impl_envelope!(
    CancellationMessage,
    MessageKind::Cancellation,
    [
        "cancellationId",
        "bookingId",
        "userId",
        "userName",
        "userEmail",
        "email",
        "reason",
        "requestedAt",
        "reviewedAt",
        "status",
        "adminComment",
        "adminEmail",
        "destination",
        "tripStartDate",
        "nights",
        "approved",
    ]
);

impl_envelope!(
    AdminNotificationMessage,
    MessageKind::AdminNotification,
    [
        "adminEmail",
        "subject",
        "body",
        "bookingId",
        "userId",
        "userName",
        "userEmail",
        "metadata",
    ]
);

/// A decoded message of any family.
///
/// Produced by [`crate::codec::decode_any`], which dispatches on `type`.
/// Serializes as the inner message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnyMessage {
    /// Booking confirmed / cancelled.
    Booking(BookingMessage),
    /// Cancellation requested / decided.
    Cancellation(CancellationMessage),
    /// Admin notification.
    AdminNotification(AdminNotificationMessage),
}

impl AnyMessage {
    /// Payload family.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Booking(_) => MessageKind::Booking,
            Self::Cancellation(_) => MessageKind::Cancellation,
            Self::AdminNotification(_) => MessageKind::AdminNotification,
        }
    }
}

impl Envelope for AnyMessage {
    fn meta(&self) -> &MessageMeta {
        match self {
            Self::Booking(message) => &message.meta,
            Self::Cancellation(message) => &message.meta,
            Self::AdminNotification(message) => &message.meta,
        }
    }

    fn meta_mut(&mut self) -> &mut MessageMeta {
        match self {
            Self::Booking(message) => &mut message.meta,
            Self::Cancellation(message) => &mut message.meta,
            Self::AdminNotification(message) => &mut message.meta,
        }
    }
}

impl From<BookingMessage> for AnyMessage {
    fn from(message: BookingMessage) -> Self {
        Self::Booking(message)
    }
}

impl From<CancellationMessage> for AnyMessage {
    fn from(message: CancellationMessage) -> Self {
        Self::Cancellation(message)
    }
}

impl From<AdminNotificationMessage> for AnyMessage {
    fn from(message: AdminNotificationMessage) -> Self {
        Self::AdminNotification(message)
    }
}

/// `destinations` arrives either as a list or as one comma-separated string.
mod destinations {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = match Raw::deserialize(deserializer)? {
            Raw::List(names) => names,
            Raw::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };
        Ok(names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }
}
