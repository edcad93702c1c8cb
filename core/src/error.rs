//! Error types for NEARPAY

use std::io;
use thiserror::Error;

/// Main error type for NEARPAY
#[derive(Error, Debug)]
pub enum PaymentError {
    // ============ Listener Errors ============
    #[error("Cannot acquire listening resource: {0}")]
    ResourceAcquisition(#[source] io::Error),

    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("Resource release failed: {0}")]
    Release(#[source] io::Error),

    // ============ Protocol Errors ============
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ============ General Errors ============
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaymentError::Malformed("unexpected end of payload".into());
        assert_eq!(err.to_string(), "Malformed message: unexpected end of payload");

        let err = PaymentError::Release(io::Error::new(io::ErrorKind::Other, "busy"));
        assert_eq!(err.to_string(), "Resource release failed: busy");
    }
}
