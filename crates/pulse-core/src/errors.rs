//! Shared error types.
//!
//! Expected steady-state conditions (pool full, cache miss, empty queue)
//! are expressed as `bool`/`Option` returns at call sites, never as errors.
//! `CoreError` covers genuine failures only.

use thiserror::Error;

/// Errors raised by the core wire-format layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A frame violated the wire contract in a way serde cannot express.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with the frame.
        reason: String,
    },
}

/// Convenience result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_error_wraps_serde() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[test]
    fn invalid_frame_displays_reason() {
        let err = CoreError::InvalidFrame {
            reason: "missing type".into(),
        };
        assert_eq!(err.to_string(), "invalid frame: missing type");
    }
}
