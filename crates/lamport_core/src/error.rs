//! Core error types.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid peer address
    InvalidAddress {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Parse error
    ParseError {
        /// Error message
        message: String,
    },

    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Why it failed
        reason: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress { input, reason } => {
                write!(f, "Invalid address {:?}: {}", input, reason)
            }
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidAddress {
            input: "nohost".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(format!("{}", err), "Invalid address \"nohost\": missing port");

        let err = CoreError::Validation {
            field: "port".to_string(),
            reason: "must not be zero".to_string(),
        };
        assert_eq!(format!("{}", err), "Validation failed for port: must not be zero");
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::ParseError { message: "x".to_string() };
        let err2 = CoreError::ParseError { message: "x".to_string() };
        assert_eq!(err1, err2);
    }
}
