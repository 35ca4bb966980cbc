//! Error types for the acquisition pipeline.
//!
//! All errors implement the `std::error::Error` trait and carry enough context
//! to be shown to the user directly.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: invalid serial options, missing parser source,
//!   protocol change while collecting, unreadable config files
//! - **State Errors**: an intent that the connection state machine does not allow
//! - **Connection Errors**: the port could not be opened or was lost
//! - **Stream Errors**: read or write failures on the serial stream
//! - **Protocol Errors**: Aresplot request timeouts, non-OK ACKs, MCU error reports
//! - **User Parser Errors**: the sandboxed parser failed to compile or probe
//!
//! Framing corruption is never an error: codecs surface it as
//! [`Frame::Unidentified`](crate::Frame::Unidentified) and the session continues.
//! Cancellation is not an error either.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use aresplot::AresplotError;
//!
//! let error = AresplotError::connection_failed("port busy");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{AckStatus, CommandId, ConnectionState};

/// Result type alias for pipeline operations.
pub type Result<T, E = AresplotError> = std::result::Result<T, E>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AresplotError {
    #[error("Invalid serial options: {reason}")]
    InvalidSerialOptions { reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Config file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("Failed to open serial port: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection lost (external)")]
    ConnectionLost,

    #[error("Stream error during {context}")]
    Stream {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("User parser rejected: {reason}")]
    UserParser { reason: String },

    #[error("Frame build error: {details}")]
    FrameBuild { details: String },

    #[error("Too many subscriptions: {count} (maximum {max})")]
    TooManySubscriptions { count: usize, max: usize },

    #[error("{command} timed out after {duration:?}")]
    RequestTimeout { command: CommandId, duration: Duration },

    #[error("{command} rejected by MCU: {status}")]
    RequestRejected { command: CommandId, status: AckStatus },

    #[error("CSV error")]
    Csv(#[from] csv::Error),

    #[error("Invalid CSV at line {line}: {reason}")]
    InvalidCsv { line: u64, reason: String },

    #[error("Worker faulted: {reason}")]
    WorkerFaulted { reason: String },

    #[error("Coordinator is no longer running")]
    CoordinatorClosed,
}

impl AresplotError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AresplotError::Connection { .. } => true,
            AresplotError::ConnectionLost => true,
            AresplotError::Stream { .. } => true,
            AresplotError::RequestTimeout { .. } => true,
            AresplotError::RequestRejected { status, .. } => {
                matches!(status, AckStatus::ErrChecksum | AckStatus::ErrMcuBusy)
            }
            AresplotError::InvalidState { .. } => true,
            AresplotError::InvalidSerialOptions { .. } => false,
            AresplotError::Config { .. } => false,
            AresplotError::ConfigFile { .. } => false,
            AresplotError::ConfigParse(_) => false,
            AresplotError::UserParser { .. } => false,
            AresplotError::FrameBuild { .. } => false,
            AresplotError::TooManySubscriptions { .. } => false,
            AresplotError::Csv(_) => false,
            AresplotError::InvalidCsv { .. } => false,
            AresplotError::WorkerFaulted { .. } => false,
            AresplotError::CoordinatorClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            AresplotError::InvalidSerialOptions { .. } => vec![
                "Use a positive baud rate",
                "Use 7 or 8 data bits and 1 or 2 stop bits",
            ],
            AresplotError::Config { .. } | AresplotError::ConfigParse(_) => vec![
                "Check the configuration values",
                "Provide a parser source when selecting the custom protocol",
            ],
            AresplotError::ConfigFile { .. } => {
                vec!["Check the config file exists and is readable", "Check file permissions"]
            }
            AresplotError::InvalidState { .. } => vec![
                "Stop collection before changing the protocol",
                "Connect before starting a serial session",
            ],
            AresplotError::Connection { .. } => vec![
                "Check the device is plugged in",
                "Close other programs using the port",
                "Verify the port path",
            ],
            AresplotError::ConnectionLost => {
                vec!["Reconnect the device", "Check the cable and USB hub"]
            }
            AresplotError::Stream { .. } => {
                vec!["Restart collection", "Check the baud rate matches the device"]
            }
            AresplotError::UserParser { .. } => vec![
                "Define `fn parse(bytes)` returning #{ values: [...], frameByteLength: n }",
                "Test the parser against the input \"1,2\\n\"",
            ],
            AresplotError::FrameBuild { .. } => vec!["Reduce the payload size"],
            AresplotError::TooManySubscriptions { .. } => {
                vec!["Monitor at most 10 variables at a time"]
            }
            AresplotError::RequestTimeout { .. } => vec![
                "Check the MCU runs the Aresplot service tick",
                "Verify the Aresplot protocol is selected",
            ],
            AresplotError::RequestRejected { .. } => vec![
                "Check variable addresses and types",
                "Retry the request",
            ],
            AresplotError::Csv(_) | AresplotError::InvalidCsv { .. } => {
                vec!["Check the CSV header and cell format"]
            }
            AresplotError::WorkerFaulted { .. } => vec!["Recreate the coordinator"],
            AresplotError::CoordinatorClosed => vec!["Recreate the coordinator"],
        }
    }

    /// Helper constructor for invalid serial option errors.
    pub fn invalid_serial_options(reason: impl Into<String>) -> Self {
        AresplotError::InvalidSerialOptions { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        AresplotError::Config { reason: reason.into() }
    }

    /// Helper constructor for config file errors with path context.
    pub fn config_file(path: PathBuf, source: std::io::Error) -> Self {
        AresplotError::ConfigFile { path, source }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        AresplotError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        AresplotError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for stream I/O errors.
    pub fn stream(context: impl Into<String>, source: std::io::Error) -> Self {
        AresplotError::Stream { context: context.into(), source }
    }

    /// Helper constructor for user parser errors.
    pub fn user_parser(reason: impl Into<String>) -> Self {
        AresplotError::UserParser { reason: reason.into() }
    }

    /// Helper constructor for frame build errors.
    pub fn frame_build(details: impl Into<String>) -> Self {
        AresplotError::FrameBuild { details: details.into() }
    }

    /// Helper constructor for intents the state machine refuses.
    pub fn invalid_state(operation: &'static str, state: ConnectionState) -> Self {
        AresplotError::InvalidState { operation, state }
    }
}

impl From<std::io::Error> for AresplotError {
    fn from(err: std::io::Error) -> Self {
        AresplotError::Stream { context: "<unknown>".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            count in 11usize..300usize,
            status_byte in any::<u8>(),
            timeout_ms in 1u64..60000u64
          ) {
            let config_error = AresplotError::config(reason.clone());
            let connection_error = AresplotError::connection_failed(reason.clone());
            let subs_error = AresplotError::TooManySubscriptions { count, max: 10 };
            let rejected = AresplotError::RequestRejected {
              command: CommandId::StartMonitor,
              status: AckStatus::from_u8(status_byte),
            };
            let timeout = AresplotError::RequestTimeout {
              command: CommandId::SetVariable,
              duration: Duration::from_millis(timeout_ms),
            };

            prop_assert!(config_error.to_string().contains(&reason));
            prop_assert!(connection_error.to_string().contains(&reason));
            prop_assert!(subs_error.to_string().contains(&count.to_string()));
            prop_assert!(rejected.to_string().contains("START_MONITOR"));
            prop_assert!(timeout.to_string().contains("SET_VARIABLE"));
          }

          #[test]
          fn io_errors_keep_their_message(reason in ".*") {
            let io_err = std::io::Error::other(reason.clone());
            let converted: AresplotError = io_err.into();
            match converted {
              AresplotError::Stream { source, .. } => {
                prop_assert_eq!(source.to_string(), reason);
              }
              _ => prop_assert!(false, "Expected Stream error from io::Error conversion"),
            }
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: errors cross task boundaries
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<AresplotError>();

        let error = AresplotError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn source_chain_is_preserved() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "EACCES");
        let error = AresplotError::connection_failed_with_source("open /dev/ttyACM0", Box::new(inner));
        let source = std::error::Error::source(&error).expect("source present");
        assert!(source.to_string().contains("EACCES"));
    }

    #[test]
    fn recovery_methods_work() {
        let lost = AresplotError::ConnectionLost;
        let invalid = AresplotError::invalid_serial_options("baud rate must be greater than 0");
        let busy = AresplotError::RequestRejected {
            command: CommandId::StartMonitor,
            status: AckStatus::ErrMcuBusy,
        };
        let bad_addr = AresplotError::RequestRejected {
            command: CommandId::SetVariable,
            status: AckStatus::ErrAddrInvalid,
        };

        assert!(lost.is_retryable());
        assert!(!invalid.is_retryable());
        assert!(busy.is_retryable());
        assert!(!bad_addr.is_retryable());

        for error in [lost, invalid, busy, bad_addr] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn invalid_state_names_operation_and_state() {
        let error = AresplotError::invalid_state("change protocol", ConnectionState::Collecting);
        assert_eq!(error.to_string(), "Cannot change protocol while Collecting");
    }
}
