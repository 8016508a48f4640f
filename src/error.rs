//! Custom error types for the gateway.
//!
//! `GatewayError` consolidates the failure modes of the protocol client and
//! the acquisition loop. Using the `thiserror` crate keeps the mapping from
//! each failure to its message in one place and lets lower layers convert
//! `std::io::Error` and configuration errors with `?`.
//!
//! The instrument service has two in-band signalling conventions that shape
//! this taxonomy: it reports failure as the literal response `"0"`
//! ([`GatewayError::CommandFailed`]), and it signals "still working" by not
//! answering within the socket timeout — which is deliberately *not* an error
//! (the session maps it to an empty response instead).

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Failure modes of the protocol client and the acquisition loop.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session '{0}' is not connected")]
    NotConnected(String),

    #[error("Instrument service rejected command: {command}")]
    CommandFailed { command: String },

    #[error("No experiment file is open")]
    NoFileOpen,

    #[error("Legend not available after {0} attempts")]
    LegendUnavailable(u32),

    #[error("No stopped status observed within {0:?}")]
    MonitorTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::CommandFailed {
            command: "-xGo -Odt".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instrument service rejected command: -xGo -Odt"
        );
    }

    #[test]
    fn test_not_connected_names_session() {
        let err = GatewayError::NotConnected("data".to_string());
        assert!(err.to_string().contains("data"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer closed");
        let err = GatewayError::from(io);
        assert!(matches!(err, GatewayError::Io(_)));
    }
}
