//! Domain error types.
//!
//! Library operations return [`HubResult`]. Adapter failures
//! ([`HubError::AdapterTimeout`], [`HubError::AdapterError`]) are caught by
//! the fusion coordinator and reported in the response's source-status map;
//! they only reach a caller when an adapter is invoked directly.

use thiserror::Error;

/// Errors raised by the knowledge hub and its components.
#[derive(Error, Debug)]
pub enum HubError {
    /// No record of the given kind exists under this identifier.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (`session`, `entry`, ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A source adapter did not answer before the fan-out deadline.
    #[error("source `{source_name}` timed out after {budget_ms}ms")]
    AdapterTimeout { source_name: String, budget_ms: u64 },

    /// A source adapter raised an internal fault.
    #[error("source `{source_name}` failed: {message}")]
    AdapterError {
        source_name: String,
        message: String,
    },

    /// The request was malformed (empty query, rating out of range, ...).
    #[error("invalid request: {0}")]
    Validation(String),

    /// An operation would break a data-model invariant.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        HubError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        HubError::Validation(message.into())
    }

    /// True for errors caused by the caller's input rather than an internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, HubError::NotFound { .. } | HubError::Validation(_))
    }
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        HubError::Storage(err.to_string())
    }
}

pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(HubError::not_found("session", "s1").is_client_error());
        assert!(HubError::validation("empty query").is_client_error());
        assert!(!HubError::Storage("disk full".into()).is_client_error());
        assert!(!HubError::InvariantViolation("negative".into()).is_client_error());
    }

    #[test]
    fn test_display_messages() {
        let err = HubError::AdapterTimeout {
            source_name: "documentation".into(),
            budget_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "source `documentation` timed out after 250ms"
        );
        assert_eq!(
            HubError::not_found("entry", "abc").to_string(),
            "entry not found: abc"
        );
    }
}
