//! High-level Modbus master (client) implementations
//!
//! The application layer is implemented once in [`GenericModbusClient`] and
//! reused for every transport; TCP and serial masters differ only in framing,
//! which the transport owns. Each call builds a
//! [`ModbusTransaction`](crate::transaction::ModbusTransaction), so every
//! operation gets transaction-id matching, timeout supervision and retries.
//!
//! # API Naming Convention
//!
//! The client provides a dual-track API:
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//! | 0x14 | `read_file_14()` | `read_file_record()` |
//! | 0x15 | `write_file_15()` | `write_file_record()` |
//! | 0x16 | `mask_write_16()` | `mask_write_register()` |
//! | 0x17 | `read_write_17()` | `read_write_multiple_registers()` |
//! | 0x18 | `read_fifo_18()` | `read_fifo_queue()` |
//! | 0x2B | `read_device_id_2b()` | `read_device_identification()` |
//!
//! # Quick Start
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

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{
    DeviceIdObject, FileRecord, FileSubRequest, ModbusRequest, ModbusResponse, UnitId,
};
use crate::transaction::ModbusTransaction;
use crate::transport::{ModbusTransport, TcpTransport, TransportStats, UdpTransport};

#[cfg(feature = "rtu")]
use crate::transport::{AsciiTransport, RtuTransport, SerialSettings};

/// Trait defining the interface for Modbus master operations.
///
/// Implemented by [`GenericModbusClient`] for any transport; the concrete
/// masters ([`ModbusTcpClient`], [`ModbusUdpClient`], [`ModbusRtuClient`],
/// [`ModbusAsciiClient`]) are aliases over it.
pub trait ModbusClient: Send {
    /// Read coils (function code 0x01). Quantity 1..=2000.
    fn read_01(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read discrete inputs (function code 0x02). Quantity 1..=2000.
    fn read_02(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read holding registers (function code 0x03). Quantity 1..=125.
    fn read_03(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read input registers (function code 0x04). Quantity 1..=125.
    fn read_04(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05).
    fn write_05(
        &mut self,
        unit_id: UnitId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write single register (function code 0x06).
    fn write_06(
        &mut self,
        unit_id: UnitId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (function code 0x0F). 1..=1968 coils.
    fn write_0f(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write multiple registers (function code 0x10). 1..=123 registers.
    fn write_10(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Read file records (function code 0x14).
    fn read_file_14(
        &mut self,
        unit_id: UnitId,
        requests: &[FileSubRequest],
    ) -> impl Future<Output = ModbusResult<Vec<Vec<u16>>>> + Send;

    /// Write file records (function code 0x15).
    fn write_file_15(
        &mut self,
        unit_id: UnitId,
        records: &[FileRecord],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Mask write register (function code 0x16):
    /// `new = (current & and_mask) | (or_mask & !and_mask)`.
    fn mask_write_16(
        &mut self,
        unit_id: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Read/write multiple registers (function code 0x17). The write is
    /// applied by the slave before the read.
    fn read_write_17(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read FIFO queue (function code 0x18).
    fn read_fifo_18(
        &mut self,
        unit_id: UnitId,
        address: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read device identification (function code 0x2B / MEI 14).
    fn read_device_id_2b(
        &mut self,
        unit_id: UnitId,
        device_id_code: u8,
        object_id: u8,
    ) -> impl Future<Output = ModbusResult<Vec<DeviceIdObject>>> + Send;

    /// Whether the underlying transport is connected.
    fn is_connected(&self) -> bool;

    /// Close the underlying transport.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Transport statistics.
    fn get_stats(&self) -> TransportStats;

    // ===== Semantic name aliases (for readability) =====

    /// Alias for `read_01` - Read coils
    #[inline]
    fn read_coils(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(unit_id, address, quantity)
    }

    /// Alias for `read_02` - Read discrete inputs
    #[inline]
    fn read_discrete_inputs(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(unit_id, address, quantity)
    }

    /// Alias for `read_03` - Read holding registers
    #[inline]
    fn read_holding_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(unit_id, address, quantity)
    }

    /// Alias for `read_04` - Read input registers
    #[inline]
    fn read_input_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(unit_id, address, quantity)
    }

    /// Alias for `write_05` - Write single coil
    #[inline]
    fn write_single_coil(
        &mut self,
        unit_id: UnitId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_05(unit_id, address, value)
    }

    /// Alias for `write_06` - Write single register
    #[inline]
    fn write_single_register(
        &mut self,
        unit_id: UnitId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_06(unit_id, address, value)
    }

    /// Alias for `write_0f` - Write multiple coils
    #[inline]
    fn write_multiple_coils(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_0f(unit_id, address, values)
    }

    /// Alias for `write_10` - Write multiple registers
    #[inline]
    fn write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_10(unit_id, address, values)
    }

    /// Alias for `read_file_14` - Read file records
    #[inline]
    fn read_file_record(
        &mut self,
        unit_id: UnitId,
        requests: &[FileSubRequest],
    ) -> impl Future<Output = ModbusResult<Vec<Vec<u16>>>> + Send {
        self.read_file_14(unit_id, requests)
    }

    /// Alias for `write_file_15` - Write file records
    #[inline]
    fn write_file_record(
        &mut self,
        unit_id: UnitId,
        records: &[FileRecord],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_file_15(unit_id, records)
    }

    /// Alias for `mask_write_16` - Mask write register
    #[inline]
    fn mask_write_register(
        &mut self,
        unit_id: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.mask_write_16(unit_id, address, and_mask, or_mask)
    }

    /// Alias for `read_write_17` - Read/write multiple registers
    #[inline]
    fn read_write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_write_17(unit_id, read_address, read_quantity, write_address, values)
    }

    /// Alias for `read_fifo_18` - Read FIFO queue
    #[inline]
    fn read_fifo_queue(
        &mut self,
        unit_id: UnitId,
        address: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_fifo_18(unit_id, address)
    }

    /// Alias for `read_device_id_2b` - Read device identification
    #[inline]
    fn read_device_identification(
        &mut self,
        unit_id: UnitId,
        device_id_code: u8,
        object_id: u8,
    ) -> impl Future<Output = ModbusResult<Vec<DeviceIdObject>>> + Send {
        self.read_device_id_2b(unit_id, device_id_code, object_id)
    }
}

/// Generic Modbus master that works with any transport.
///
/// Implements the application layer once (request construction, response
/// classification) and delegates framing and I/O to the transport.
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    timeout: Duration,
    retries: u32,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a client with the default timeout and retry policy.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            logger: None,
        }
    }

    /// Create a client with packet/request logging.
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            logger: Some(logger),
            ..Self::new(transport)
        }
    }

    /// Override the per-attempt response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Override the retry count.
    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute a raw request and return the raw response.
    ///
    /// Exception responses are returned as
    /// [`ModbusResponse::Exception`], not as errors; the typed operations
    /// below convert them.
    pub async fn execute_request(
        &mut self,
        unit_id: UnitId,
        request: ModbusRequest,
    ) -> ModbusResult<ModbusResponse> {
        if let Some(ref logger) = self.logger {
            logger.log_request(unit_id, request.function().to_u8(), &request.to_pdu_bytes());
        }

        let mut transaction = ModbusTransaction::new(unit_id, request)
            .with_timeout(self.timeout)
            .with_retries(self.retries);
        let response = transaction.execute(&mut self.transport).await?;

        if let Some(ref logger) = self.logger {
            logger.log_response(unit_id, response.function_byte(), &response.to_pdu_bytes());
        }
        Ok(response)
    }

    /// Execute a request, converting exception responses into errors.
    async fn expect_success(
        &mut self,
        unit_id: UnitId,
        request: ModbusRequest,
    ) -> ModbusResult<ModbusResponse> {
        let function = request.function().to_u8();
        match self.execute_request(unit_id, request).await? {
            ModbusResponse::Exception { exception, .. } => {
                Err(ModbusError::exception(function, exception))
            }
            response => Ok(response),
        }
    }
}

fn unexpected_variant(response: &ModbusResponse) -> ModbusError {
    ModbusError::mismatch(format!(
        "unexpected response variant for function 0x{:02X}",
        response.function_byte()
    ))
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn read_01(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        if quantity == 0 || quantity as usize > MAX_READ_COILS {
            return Err(ModbusError::invalid_data("invalid coil quantity"));
        }
        let request = ModbusRequest::ReadCoils { address, quantity };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadCoils { bits } => {
                Ok(bits.to_bools().into_iter().take(quantity as usize).collect())
            }
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn read_02(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        if quantity == 0 || quantity as usize > MAX_READ_COILS {
            return Err(ModbusError::invalid_data("invalid input quantity"));
        }
        let request = ModbusRequest::ReadDiscreteInputs { address, quantity };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadDiscreteInputs { bits } => {
                Ok(bits.to_bools().into_iter().take(quantity as usize).collect())
            }
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn read_03(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data("invalid register quantity"));
        }
        let request = ModbusRequest::ReadHoldingRegisters { address, quantity };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadHoldingRegisters { values } => Ok(values),
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn read_04(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data("invalid register quantity"));
        }
        let request = ModbusRequest::ReadInputRegisters { address, quantity };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadInputRegisters { values } => Ok(values),
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn write_05(
        &mut self,
        unit_id: UnitId,
        address: u16,
        value: bool,
    ) -> ModbusResult<()> {
        let request = ModbusRequest::WriteSingleCoil { address, value };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn write_06(&mut self, unit_id: UnitId, address: u16, value: u16) -> ModbusResult<()> {
        let request = ModbusRequest::WriteSingleRegister { address, value };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn write_0f(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        if values.is_empty() || values.len() > MAX_WRITE_COILS {
            return Err(ModbusError::invalid_data("invalid coil quantity"));
        }
        let request = ModbusRequest::WriteMultipleCoils {
            address,
            coils: values.to_vec(),
        };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn write_10(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(ModbusError::invalid_data("invalid register quantity"));
        }
        let request = ModbusRequest::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn read_file_14(
        &mut self,
        unit_id: UnitId,
        requests: &[FileSubRequest],
    ) -> ModbusResult<Vec<Vec<u16>>> {
        if requests.is_empty() || requests.len() * 7 > MAX_FILE_RECORD_BYTES {
            return Err(ModbusError::invalid_data("invalid file sub-request count"));
        }
        let request = ModbusRequest::ReadFileRecord {
            requests: requests.to_vec(),
        };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadFileRecord { records } => Ok(records),
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn write_file_15(
        &mut self,
        unit_id: UnitId,
        records: &[FileRecord],
    ) -> ModbusResult<()> {
        let byte_count: usize = records.iter().map(|r| 7 + r.values.len() * 2).sum();
        if records.is_empty() || byte_count > MAX_FILE_RECORD_BYTES {
            return Err(ModbusError::invalid_data("invalid file record payload"));
        }
        let request = ModbusRequest::WriteFileRecord {
            records: records.to_vec(),
        };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn mask_write_16(
        &mut self,
        unit_id: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        let request = ModbusRequest::MaskWriteRegister {
            address,
            and_mask,
            or_mask,
        };
        self.expect_success(unit_id, request).await?;
        Ok(())
    }

    async fn read_write_17(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<Vec<u16>> {
        if read_quantity == 0 || read_quantity as usize > MAX_RW_READ_REGISTERS {
            return Err(ModbusError::invalid_data("invalid read quantity"));
        }
        if values.is_empty() || values.len() > MAX_RW_WRITE_REGISTERS {
            return Err(ModbusError::invalid_data("invalid write quantity"));
        }
        let request = ModbusRequest::ReadWriteMultipleRegisters {
            read_address,
            read_quantity,
            write_address,
            values: values.to_vec(),
        };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadWriteMultipleRegisters { values } => Ok(values),
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn read_fifo_18(&mut self, unit_id: UnitId, address: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::ReadFifoQueue { address };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadFifoQueue { values } => Ok(values),
            other => Err(unexpected_variant(&other)),
        }
    }

    async fn read_device_id_2b(
        &mut self,
        unit_id: UnitId,
        device_id_code: u8,
        object_id: u8,
    ) -> ModbusResult<Vec<DeviceIdObject>> {
        if !(1..=4).contains(&device_id_code) {
            return Err(ModbusError::invalid_data("device id read code must be 1..=4"));
        }
        let request = ModbusRequest::ReadDeviceId {
            device_id_code,
            object_id,
        };
        match self.expect_success(unit_id, request).await? {
            ModbusResponse::ReadDeviceId { objects, .. } => Ok(objects),
            other => Err(unexpected_variant(&other)),
        }
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

// ============================================================================
// Concrete masters
// ============================================================================

/// Modbus TCP master (MBAP framing).
pub type ModbusTcpClient = GenericModbusClient<TcpTransport>;

/// Modbus UDP master (MBAP framing over datagrams).
pub type ModbusUdpClient = GenericModbusClient<UdpTransport>;

/// Modbus RTU master over a serial line.
#[cfg(feature = "rtu")]
pub type ModbusRtuClient = GenericModbusClient<RtuTransport>;

/// Modbus ASCII master over a serial line.
#[cfg(feature = "rtu")]
pub type ModbusAsciiClient = GenericModbusClient<AsciiTransport>;

impl ModbusTcpClient {
    /// Connect a TCP master to `addr` (host:port).
    pub async fn connect(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ModbusError::configuration(format!("invalid address: {}", e)))?;
        Ok(Self::new(TcpTransport::new(addr, timeout).await?))
    }

    /// Connect an RTU-over-TCP master: RTU frames on a stream socket, no MBAP
    /// envelope.
    pub async fn connect_rtu_over_tcp(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ModbusError::configuration(format!("invalid address: {}", e)))?;
        Ok(Self::new(TcpTransport::new_rtu_over_tcp(addr, timeout).await?))
    }

    /// Enable or disable hex packet logging on the transport.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport_mut().set_packet_logging(enabled);
    }
}

impl ModbusUdpClient {
    /// Create a UDP master pinned to `addr` (host:port).
    pub async fn connect(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ModbusError::configuration(format!("invalid address: {}", e)))?;
        Ok(Self::new(UdpTransport::new(addr, timeout).await?))
    }
}

#[cfg(feature = "rtu")]
impl ModbusRtuClient {
    /// Open an RTU master with default 8N1 settings.
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Ok(Self::new(RtuTransport::new(port, baud_rate)?))
    }

    /// Open an RTU master with explicit serial settings.
    pub fn open_with_settings(
        port: &str,
        settings: SerialSettings,
        timeout: Duration,
    ) -> ModbusResult<Self> {
        Ok(Self::new(RtuTransport::new_with_settings(
            port, settings, timeout,
        )?))
    }
}

#[cfg(feature = "rtu")]
impl ModbusAsciiClient {
    /// Open an ASCII master with default 7E1 settings.
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Ok(Self::new(AsciiTransport::new(port, baud_rate)?))
    }

    /// Open an ASCII master with explicit serial settings.
    pub fn open_with_settings(
        port: &str,
        settings: SerialSettings,
        timeout: Duration,
    ) -> ModbusResult<Self> {
        Ok(Self::new(AsciiTransport::new_with_settings(
            port, settings, timeout,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AduFrame;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Mock transport replaying canned reply PDUs.
    struct MockTransport {
        replies: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        transaction_id: u16,
        connected: bool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                replies: VecDeque::new(),
                sent: Vec::new(),
                transaction_id: 0,
                connected: true,
            }
        }

        fn push_pdu(&mut self, pdu: &[u8]) {
            self.replies.push_back(pdu.to_vec());
        }
    }

    #[async_trait]
    impl ModbusTransport for MockTransport {
        async fn connect(&mut self) -> ModbusResult<()> {
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn next_transaction_id(&mut self) -> u16 {
            self.transaction_id += 1;
            self.transaction_id
        }

        async fn send_frame(
            &mut self,
            _transaction_id: u16,
            _unit_id: UnitId,
            pdu: &[u8],
        ) -> ModbusResult<()> {
            self.sent.push(pdu.to_vec());
            Ok(())
        }

        async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame> {
            match self.replies.pop_front() {
                Some(pdu) => Ok(AduFrame {
                    transaction_id: self.transaction_id,
                    unit_id: 1,
                    pdu,
                }),
                None => Err(ModbusError::timeout(
                    "read response",
                    deadline.as_millis() as u64,
                )),
            }
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.connected = false;
            Ok(())
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[tokio::test]
    async fn test_read_01_unpacks_bits() {
        let mut mock = MockTransport::new();
        // 10 coils in two bytes; only the first ten bits are meaningful.
        mock.push_pdu(&[0x01, 0x02, 0b0000_1101, 0b0000_0010]);

        let mut client = GenericModbusClient::new(mock);
        let coils = client.read_01(1, 0, 10).await.unwrap();
        assert_eq!(coils.len(), 10);
        assert_eq!(
            coils,
            vec![true, false, true, true, false, false, false, false, false, true]
        );
    }

    #[tokio::test]
    async fn test_read_03_parses_registers() {
        let mut mock = MockTransport::new();
        mock.push_pdu(&[0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C]);

        let mut client = GenericModbusClient::new(mock);
        let values = client.read_03(1, 0, 3).await.unwrap();
        assert_eq!(values, vec![0x000A, 0x000B, 0x000C]);

        // Request went out as FC03 address 0 quantity 3.
        assert_eq!(
            client.transport().sent[0],
            vec![0x03, 0x00, 0x00, 0x00, 0x03]
        );
    }

    #[tokio::test]
    async fn test_quantity_validation_rejects_before_send() {
        let mut client = GenericModbusClient::new(MockTransport::new());
        assert!(client.read_03(1, 0, 0).await.is_err());
        assert!(client.read_03(1, 0, 126).await.is_err());
        assert!(client.read_01(1, 0, 2001).await.is_err());
        assert!(client.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_exception_mapped_to_error() {
        let mut mock = MockTransport::new();
        mock.push_pdu(&[0x83, 0x02]);

        let mut client = GenericModbusClient::new(mock);
        let err = client.read_03(1, 9999, 1).await.unwrap_err();
        match err {
            ModbusError::Exception { function, exception } => {
                assert_eq!(function, 0x03);
                assert_eq!(
                    exception,
                    crate::protocol::ModbusException::IllegalDataAddress
                );
            }
            other => panic!("expected exception error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mask_write_and_fifo() {
        let mut mock = MockTransport::new();
        mock.push_pdu(&[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]);
        mock.push_pdu(&[0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84]);

        let mut client = GenericModbusClient::new(mock);
        client.mask_write_16(1, 4, 0x00F2, 0x0025).await.unwrap();
        let fifo = client.read_fifo_18(1, 0x04DE).await.unwrap();
        assert_eq!(fifo, vec![0x01B8, 0x1284]);
    }

    #[tokio::test]
    async fn test_semantic_aliases_route_to_same_operations() {
        let mut mock = MockTransport::new();
        mock.push_pdu(&[0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let mut client = GenericModbusClient::new(mock);
        client.write_single_coil(1, 0xAC, true).await.unwrap();
        assert_eq!(
            client.transport().sent[0],
            vec![0x05, 0x00, 0xAC, 0xFF, 0x00]
        );
    }
}
