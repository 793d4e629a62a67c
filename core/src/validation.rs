//! Input validation that reports every violation at once.

use crate::error::{RelayError, Result};

/// Collects offending field names, then converts to a single error.
///
/// # Example
///
/// ```
/// use travel_messaging_core::validation::Violations;
///
/// let mut violations = Violations::new();
/// violations.require_positive("bookingId", 0);
/// violations.require_non_blank("userName", "  ");
/// violations.require_non_blank("userEmail", "ada@example.com");
///
/// let error = violations.into_result().unwrap_err();
/// assert_eq!(error.invalid_fields(), ["bookingId", "userName"]);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Violations {
    fields: Vec<String>,
}

impl Violations {
    /// Empty collector.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Record `field` unless `check` holds.
    pub fn require(&mut self, field: &str, check: bool) -> &mut Self {
        if !check {
            self.fields.push(field.to_string());
        }
        self
    }

    /// Record `field` unless `value > 0`.
    pub fn require_positive(&mut self, field: &str, value: i64) -> &mut Self {
        self.require(field, value > 0)
    }

    /// Record `field` if `value` is empty or whitespace.
    pub fn require_non_blank(&mut self, field: &str, value: &str) -> &mut Self {
        self.require(field, !value.trim().is_empty())
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Ok` if nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] naming every recorded field, in
    /// the order they were checked.
    pub fn into_result(self) -> Result<()> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Validation {
                fields: self.fields,
            })
        }
    }
}

/// Reject an empty or whitespace queue name.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] naming `field`.
pub fn require_queue_name(field: &str, queue: &str) -> Result<()> {
    let mut violations = Violations::new();
    violations.require_non_blank(field, queue);
    violations.into_result()
}
