//! Error types for the GoE toolkit

use thiserror::Error;

/// GoE error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error (bad input data, dimensions, configuration)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error (numerical breakdown that cannot be recovered)
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::Validation("sigma must be > 0".to_string());
        assert_eq!(e.to_string(), "Validation error: sigma must be > 0");

        let e = Error::Computation("non-finite energy".to_string());
        assert!(e.to_string().starts_with("Computation error"));
    }

    #[test]
    fn test_json_error_converts() {
        let r: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let e: Error = r.unwrap_err().into();
        assert!(matches!(e, Error::Json(_)));
    }
}
