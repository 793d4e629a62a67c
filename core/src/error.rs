//! Error taxonomy for relay operations.

use crate::broker::BrokerError;
use crate::codec::CodecError;
use thiserror::Error;

/// Errors surfaced by publish, requeue, peek and the producers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// The broker, connection or channel failed
    #[error("Transport error: {0}")]
    Transport(#[from] BrokerError),

    /// An envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller input is invalid; nothing was sent
    #[error("Required fields missing: {}", fields.join(", "))]
    Validation {
        /// Every offending field, by wire name
        fields: Vec<String>,
    },

    /// A batch stopped on a broker failure after partial progress
    #[error("Batch aborted after {completed} messages: {source}")]
    BatchAborted {
        /// Messages fully processed before the failure
        completed: u32,
        /// The broker failure
        source: BrokerError,
    },
}

impl RelayError {
    /// Validation error for a single field.
    #[must_use]
    pub fn invalid(field: impl Into<String>) -> Self {
        Self::Validation {
            fields: vec![field.into()],
        }
    }

    /// Offending fields, if this is a validation error.
    #[must_use]
    pub fn invalid_fields(&self) -> &[String] {
        match self {
            Self::Validation { fields } => fields,
            _ => &[],
        }
    }
}

impl From<CodecError> for RelayError {
    fn from(error: CodecError) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_field() {
        let error = RelayError::Validation {
            fields: vec!["bookingId".into(), "userName".into()],
        };
        assert_eq!(error.to_string(), "Required fields missing: bookingId, userName");
        assert_eq!(error.invalid_fields(), ["bookingId", "userName"]);
    }

    #[test]
    fn broker_errors_convert_to_transport() {
        let error: RelayError = BrokerError::ChannelClosed("gone".into()).into();
        assert!(matches!(error, RelayError::Transport(BrokerError::ChannelClosed(_))));
        assert!(error.invalid_fields().is_empty());
    }

    #[test]
    fn aborted_batch_reports_progress() {
        let error = RelayError::BatchAborted {
            completed: 2,
            source: BrokerError::Connection("reset".into()),
        };
        assert_eq!(
            error.to_string(),
            "Batch aborted after 2 messages: Connection failed: reset"
        );
    }
}
