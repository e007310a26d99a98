//! # Relay Modbus - Industrial Modbus Protocol Runtime
//!
//! A complete Modbus master/slave runtime in pure Rust: the message codec for
//! every supported function code, the framing state machines for each
//! transport flavor, a retrying transaction engine on the master side, and a
//! pooled listener with an in-memory process image on the slave side.
//!
//! ## Features
//!
//! - **All framing flavors**: Modbus/TCP (MBAP), Modbus/RTU (CRC-16, silence
//!   framed), Modbus/ASCII (LRC, ':'/CRLF framed), Modbus/UDP and RTU-over-TCP
//! - **Async throughout**: built on Tokio; serial support via tokio-serial
//!   behind the `rtu` feature
//! - **Transaction supervision**: id matching with stale-frame skip, retries
//!   with per-call timeout, reconnect on fatal I/O
//! - **Slave runtime**: bounded worker pool with accept back-pressure, idle
//!   watchdog, per-unit process image with change observers
//! - **Bit-exact codec**: symmetric encode/decode for every PDU, checked by
//!   round-trip tests
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x14 | Read File Record | ✅ | ✅ |
//! | 0x15 | Write File Record | ✅ | ✅ |
//! | 0x16 | Mask Write Register | ✅ | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ | ✅ |
//! | 0x18 | Read FIFO Queue | ✅ | ✅ |
//! | 0x2B | Read Device Identification | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ### Master
//!
//! ```rust,no_run
//! use relay_modbus::{ModbusClient, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> relay_modbus::ModbusResult<()> {
//!     let mut client = ModbusTcpClient::connect("127.0.0.1:502", Duration::from_secs(3)).await?;
//!
//!     let registers = client.read_03(1, 0, 10).await?;
//!     println!("registers: {:?}", registers);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Slave
//!
//! ```rust,no_run
//! use relay_modbus::{
//!     ModbusHandler, ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ProcessImage,
//!     UnitImage,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> relay_modbus::ModbusResult<()> {
//!     let mut image = ProcessImage::new();
//!     image.add_unit(1, UnitImage::new(128, 128, 64, 64));
//!
//!     let handler = Arc::new(ModbusHandler::new(Arc::new(image)));
//!     let config = ModbusTcpServerConfig {
//!         bind_address: "0.0.0.0:502".parse().unwrap(),
//!         ..Default::default()
//!     };
//!     let mut server = ModbusTcpServer::new(config, handler);
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     server.stop().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Wire primitives: byte cursor, CRC-16, LRC, hex helpers
pub mod wire;

/// Packed bit storage for coils and discrete inputs
pub mod bits;

/// Modbus protocol definitions and message codec
pub mod protocol;

/// Byte-level framing for MBAP, RTU and ASCII
pub mod framing;

/// Network and serial transport layer
pub mod transport;

/// Master-side transaction engine
pub mod transaction;

/// Modbus master implementations
pub mod client;

/// In-memory process image
pub mod image;

/// Slave-side request dispatcher
pub mod handler;

/// Modbus slave (server) implementations
pub mod server;

/// Logging facilities
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use relay_modbus::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core protocol types ===
pub use bits::BitVector;
pub use protocol::{
    DeviceIdObject, FileRecord, FileSubRequest, ModbusException, ModbusFunction, ModbusRequest,
    ModbusResponse, UnitId,
};

// === Master API ===
pub use client::{
    GenericModbusClient, ModbusClient, ModbusTcpClient, ModbusUdpClient,
};
pub use transaction::ModbusTransaction;
pub use transport::{AduFrame, ModbusTransport, TcpTransport, TransportStats, UdpTransport};

// === Slave API ===
pub use handler::{DeviceIdentity, ModbusHandler};
pub use image::{ImageObserver, ProcessImage, UnitImage};
pub use server::{
    ListenerState, ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ModbusUdpServer,
    ServerStats,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Serial masters (require the `rtu` feature) ===
#[cfg(feature = "rtu")]
pub use client::{ModbusAsciiClient, ModbusRtuClient};

#[cfg(feature = "rtu")]
pub use transport::{AsciiTransport, RtuTransport, SerialSettings};

/// Default timeout for blocking operations (3 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = constants::DEFAULT_TIMEOUT_MS;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Relay Modbus v{} - industrial Modbus master/slave runtime", VERSION)
}
