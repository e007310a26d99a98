//! Logging facilities
//!
//! Everything in the crate logs through `tracing`. On top of that,
//! [`CallbackLogger`] offers request/response logging that applications can
//! redirect into their own sink (a UI console, a capture file) without
//! touching the global subscriber.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::wire::to_hex;

/// Severity attached to callback log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Where [`CallbackLogger`] lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Drop everything.
    Disabled,
    /// Forward to the `tracing` subscriber (default).
    #[default]
    Tracing,
    /// Invoke the registered callback.
    Callback,
}

/// Callback receiving formatted log lines.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Request/response logger attachable to masters.
#[derive(Clone, Default)]
pub struct CallbackLogger {
    mode: LoggingMode,
    callback: Option<LogCallback>,
}

impl CallbackLogger {
    /// Logger forwarding into `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger invoking `callback` for every line.
    pub fn with_callback(callback: LogCallback) -> Self {
        Self {
            mode: LoggingMode::Callback,
            callback: Some(callback),
        }
    }

    /// Logger that drops everything.
    pub fn disabled() -> Self {
        Self {
            mode: LoggingMode::Disabled,
            callback: None,
        }
    }

    fn emit(&self, level: LogLevel, line: &str) {
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => debug!("{}", line),
            LoggingMode::Callback => {
                if let Some(ref callback) = self.callback {
                    callback(level, line);
                }
            }
        }
    }

    /// Log an outgoing request PDU.
    pub fn log_request(&self, unit_id: u8, function: u8, pdu: &[u8]) {
        self.emit(
            LogLevel::Debug,
            &format!(
                "request unit={} fc=0x{:02X} pdu=[{}]",
                unit_id,
                function,
                to_hex(pdu)
            ),
        );
    }

    /// Log an incoming response PDU.
    pub fn log_response(&self, unit_id: u8, function: u8, pdu: &[u8]) {
        self.emit(
            LogLevel::Debug,
            &format!(
                "response unit={} fc=0x{:02X} pdu=[{}]",
                unit_id,
                function,
                to_hex(pdu)
            ),
        );
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Hex-dump one raw frame with its direction, for transport-level debugging.
pub fn log_packet(direction: &str, data: &[u8], protocol: &str, unit_id: Option<u8>) {
    match unit_id {
        Some(unit) => debug!("[{}] {} unit={} {}", protocol, direction, unit, to_hex(data)),
        None => debug!("[{}] {} {}", protocol, direction, to_hex(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_callback_receives_lines() {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let logger = CallbackLogger::with_callback(Arc::new(move |level, line| {
            sink.lock().unwrap().push(format!("{} {}", level, line));
        }));

        logger.log_request(1, 0x03, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        logger.log_response(1, 0x03, &[0x03, 0x02, 0x00, 0x2A]);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("fc=0x03"));
        assert!(lines[0].contains("03 00 00 00 01"));
        assert!(lines[1].contains("response"));
    }

    #[test]
    fn test_disabled_logger_stays_silent() {
        let logger = CallbackLogger::disabled();
        logger.log_request(1, 0x03, &[0x03]);
        logger.log_response(1, 0x03, &[0x03, 0x00]);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
