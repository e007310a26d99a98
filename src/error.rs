//! Core error types and result handling
//!
//! All fallible operations in the crate return [`ModbusResult`]. The error
//! variants map one-to-one onto the failure classes a Modbus runtime has to
//! distinguish: truncated frames, checksum failures, unknown function codes,
//! range and value violations, timeouts, fatal transport faults and slave
//! exception responses.
//!
//! Fatal I/O errors (`is_fatal() == true`) mark the connection as broken; the
//! next transaction re-opens it before sending.

use thiserror::Error;

use crate::protocol::ModbusException;

/// Result type used throughout the crate.
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Error type covering the full Modbus runtime surface.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// A frame ended before all declared bytes arrived.
    #[error("truncated frame: {message}")]
    Truncated { message: String },

    /// CRC (RTU) or LRC (ASCII) verification failed.
    #[error("checksum mismatch: {message}")]
    Checksum { message: String },

    /// Function code is not supported by this implementation.
    #[error("invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Address or address+count falls outside the addressed bank.
    #[error("illegal data address: {message}")]
    IllegalAddress { message: String },

    /// A count or value field violates the protocol constraints.
    #[error("illegal data value: {message}")]
    IllegalValue { message: String },

    /// A blocking operation did not complete within its deadline.
    #[error("timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Transport level I/O failure. `fatal` connections are closed and
    /// re-opened on the next use.
    #[error("I/O error: {message}")]
    Io { message: String, fatal: bool },

    /// Connect or bind failure. Always fatal.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Response did not correlate with the outstanding request
    /// (unexpected transaction id or function code).
    #[error("protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    /// Generic protocol violation in an otherwise well-framed message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The slave answered with an exception response.
    #[error("modbus exception for function 0x{function:02X}: {exception}")]
    Exception {
        function: u8,
        exception: ModbusException,
    },

    /// Invalid configuration (address strings, serial parameters, ...).
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Truncated frame error.
    pub fn truncated<S: Into<String>>(message: S) -> Self {
        ModbusError::Truncated {
            message: message.into(),
        }
    }

    /// Checksum (CRC/LRC) error.
    pub fn checksum<S: Into<String>>(message: S) -> Self {
        ModbusError::Checksum {
            message: message.into(),
        }
    }

    /// Unknown or unsupported function code.
    pub fn invalid_function(code: u8) -> Self {
        ModbusError::InvalidFunction { code }
    }

    /// Out-of-range address error.
    pub fn illegal_address<S: Into<String>>(message: S) -> Self {
        ModbusError::IllegalAddress {
            message: message.into(),
        }
    }

    /// Constraint violation on a count or value field.
    pub fn illegal_value<S: Into<String>>(message: S) -> Self {
        ModbusError::IllegalValue {
            message: message.into(),
        }
    }

    /// Alias kept for call-site readability when a request carries bad data.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::illegal_value(message)
    }

    /// Timeout error with the operation that was in flight.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        ModbusError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Non-fatal I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        ModbusError::Io {
            message: message.into(),
            fatal: false,
        }
    }

    /// Fatal I/O error (EOF, reset). Triggers reconnect on next use.
    pub fn fatal_io<S: Into<String>>(message: S) -> Self {
        ModbusError::Io {
            message: message.into(),
            fatal: true,
        }
    }

    /// Connection establishment failure.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        ModbusError::Connection {
            message: message.into(),
        }
    }

    /// Transaction/function correlation failure.
    pub fn mismatch<S: Into<String>>(message: S) -> Self {
        ModbusError::ProtocolMismatch {
            message: message.into(),
        }
    }

    /// Generic protocol violation.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    /// Configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    /// Slave exception response surfaced as an error.
    pub fn exception(function: u8, exception: ModbusException) -> Self {
        ModbusError::Exception {
            function,
            exception,
        }
    }

    /// Whether this error invalidates the underlying connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ModbusError::Connection { .. } | ModbusError::Io { fatal: true, .. }
        )
    }

    /// Whether the master transaction engine may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout { .. }
                | ModbusError::ProtocolMismatch { .. }
                | ModbusError::Checksum { .. }
                | ModbusError::Io { fatal: false, .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => ModbusError::fatal_io(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                ModbusError::timeout(err.to_string(), 0)
            }
            _ => ModbusError::io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ModbusError::fatal_io("reset").is_fatal());
        assert!(ModbusError::connection("refused").is_fatal());
        assert!(!ModbusError::io("partial write").is_fatal());
        assert!(!ModbusError::timeout("read", 3000).is_fatal());
    }

    #[test]
    fn test_retry_classification() {
        assert!(ModbusError::timeout("read", 1000).is_retryable());
        assert!(ModbusError::mismatch("stale txid").is_retryable());
        assert!(ModbusError::checksum("crc").is_retryable());
        assert!(!ModbusError::invalid_function(0x63).is_retryable());
        assert!(!ModbusError::exception(0x03, ModbusException::IllegalDataAddress).is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(ModbusError::from(eof).is_fatal());

        let interrupted = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr");
        assert!(!ModbusError::from(interrupted).is_fatal());
    }

    #[test]
    fn test_display_contains_context() {
        let err = ModbusError::timeout("read response", 200);
        let text = err.to_string();
        assert!(text.contains("read response"));
        assert!(text.contains("200"));
    }
}
