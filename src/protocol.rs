//! Modbus protocol definitions and message codec
//!
//! The request and response PDUs for every supported function code, modeled as
//! two tagged unions with a symmetric encode/decode contract against
//! [`ByteCursor`]:
//!
//! | Code | Function | Request | Response |
//! |------|----------|---------|----------|
//! | 0x01 | Read Coils | ref, count | byte count + packed bits |
//! | 0x02 | Read Discrete Inputs | ref, count | byte count + packed bits |
//! | 0x03 | Read Holding Registers | ref, count | byte count + words |
//! | 0x04 | Read Input Registers | ref, count | byte count + words |
//! | 0x05 | Write Single Coil | ref, 0xFF00/0x0000 | echo |
//! | 0x06 | Write Single Register | ref, value | echo |
//! | 0x0F | Write Multiple Coils | ref, count, bits | ref, count |
//! | 0x10 | Write Multiple Registers | ref, count, words | ref, count |
//! | 0x14 | Read File Record | sub-requests | sub-responses |
//! | 0x15 | Write File Record | records | echo |
//! | 0x16 | Mask Write Register | ref, and, or | echo |
//! | 0x17 | Read/Write Multiple Registers | both spans | byte count + words |
//! | 0x18 | Read FIFO Queue | ref | count + words |
//! | 0x2B | Read Device Identification | MEI sub-request | object list |
//!
//! Count-limit violations on **encode** are programmer errors and panic;
//! violations found while **decoding** wire bytes surface as
//! [`ModbusError::IllegalValue`] so a slave can answer with exception 0x03.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bits::BitVector;
use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::wire::ByteCursor;

/// Modbus slave/unit identifier (1-247, 0 = broadcast on serial)
pub type UnitId = u8;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = FC_READ_COILS,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    /// Read Input Registers (0x04)
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    /// Write Single Register (0x06)
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
    /// Read File Record (0x14)
    ReadFileRecord = FC_READ_FILE_RECORD,
    /// Write File Record (0x15)
    WriteFileRecord = FC_WRITE_FILE_RECORD,
    /// Mask Write Register (0x16)
    MaskWriteRegister = FC_MASK_WRITE_REGISTER,
    /// Read/Write Multiple Registers (0x17)
    ReadWriteMultipleRegisters = FC_READ_WRITE_MULTIPLE_REGISTERS,
    /// Read FIFO Queue (0x18)
    ReadFifoQueue = FC_READ_FIFO_QUEUE,
    /// Read Device Identification via MEI (0x2B)
    ReadDeviceId = FC_READ_DEVICE_ID,
}

impl ModbusFunction {
    /// Convert from a wire byte.
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            FC_READ_FILE_RECORD => Ok(Self::ReadFileRecord),
            FC_WRITE_FILE_RECORD => Ok(Self::WriteFileRecord),
            FC_MASK_WRITE_REGISTER => Ok(Self::MaskWriteRegister),
            FC_READ_WRITE_MULTIPLE_REGISTERS => Ok(Self::ReadWriteMultipleRegisters),
            FC_READ_FIFO_QUEUE => Ok(Self::ReadFifoQueue),
            FC_READ_DEVICE_ID => Ok(Self::ReadDeviceId),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
                | Self::ReadFileRecord
                | Self::ReadFifoQueue
                | Self::ReadDeviceId
        )
    }

    /// Check if this function mutates slave state
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
                | Self::WriteFileRecord
                | Self::MaskWriteRegister
                | Self::ReadWriteMultipleRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReadFileRecord => "Read File Record",
            Self::WriteFileRecord => "Write File Record",
            Self::MaskWriteRegister => "Mask Write Register",
            Self::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
            Self::ReadFifoQueue => "Read FIFO Queue",
            Self::ReadDeviceId => "Read Device Identification",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = EXCEPTION_ILLEGAL_FUNCTION,
    IllegalDataAddress = EXCEPTION_ILLEGAL_DATA_ADDRESS,
    IllegalDataValue = EXCEPTION_ILLEGAL_DATA_VALUE,
    SlaveDeviceFailure = EXCEPTION_SERVER_DEVICE_FAILURE,
    Acknowledge = EXCEPTION_ACKNOWLEDGE,
    SlaveDeviceBusy = EXCEPTION_SERVER_DEVICE_BUSY,
    MemoryParityError = EXCEPTION_MEMORY_PARITY_ERROR,
    GatewayPathUnavailable = EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
    GatewayTargetFailed = EXCEPTION_GATEWAY_TARGET_FAILED,
}

impl ModbusException {
    /// Convert from a wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            EXCEPTION_ILLEGAL_FUNCTION => Some(Self::IllegalFunction),
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Some(Self::IllegalDataAddress),
            EXCEPTION_ILLEGAL_DATA_VALUE => Some(Self::IllegalDataValue),
            EXCEPTION_SERVER_DEVICE_FAILURE => Some(Self::SlaveDeviceFailure),
            EXCEPTION_ACKNOWLEDGE => Some(Self::Acknowledge),
            EXCEPTION_SERVER_DEVICE_BUSY => Some(Self::SlaveDeviceBusy),
            EXCEPTION_MEMORY_PARITY_ERROR => Some(Self::MemoryParityError),
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Some(Self::GatewayPathUnavailable),
            EXCEPTION_GATEWAY_TARGET_FAILED => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Acknowledge => "acknowledge",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailed => "gateway target device failed to respond",
        };
        write!(f, "0x{:02X} {}", self.to_u8(), name)
    }
}

/// One sub-request of a Read File Record (FC20) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSubRequest {
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
}

/// One record of a Write File Record (FC21) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_number: u16,
    pub record_number: u16,
    pub values: Vec<u16>,
}

/// One identification object of a Read Device Identification (FC43) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdObject {
    pub object_id: u8,
    pub value: Vec<u8>,
}

/// A master-to-slave request PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum ModbusRequest {
    ReadCoils {
        address: u16,
        quantity: u16,
    },
    ReadDiscreteInputs {
        address: u16,
        quantity: u16,
    },
    ReadHoldingRegisters {
        address: u16,
        quantity: u16,
    },
    ReadInputRegisters {
        address: u16,
        quantity: u16,
    },
    WriteSingleCoil {
        address: u16,
        value: bool,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    WriteMultipleCoils {
        address: u16,
        coils: Vec<bool>,
    },
    WriteMultipleRegisters {
        address: u16,
        values: Vec<u16>,
    },
    ReadFileRecord {
        requests: Vec<FileSubRequest>,
    },
    WriteFileRecord {
        records: Vec<FileRecord>,
    },
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    ReadWriteMultipleRegisters {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: Vec<u16>,
    },
    ReadFifoQueue {
        address: u16,
    },
    ReadDeviceId {
        device_id_code: u8,
        object_id: u8,
    },
}

/// A slave-to-master response PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum ModbusResponse {
    ReadCoils {
        bits: BitVector,
    },
    ReadDiscreteInputs {
        bits: BitVector,
    },
    ReadHoldingRegisters {
        values: Vec<u16>,
    },
    ReadInputRegisters {
        values: Vec<u16>,
    },
    WriteSingleCoil {
        address: u16,
        value: bool,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    WriteMultipleCoils {
        address: u16,
        quantity: u16,
    },
    WriteMultipleRegisters {
        address: u16,
        quantity: u16,
    },
    ReadFileRecord {
        records: Vec<Vec<u16>>,
    },
    WriteFileRecord {
        records: Vec<FileRecord>,
    },
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    ReadWriteMultipleRegisters {
        values: Vec<u16>,
    },
    ReadFifoQueue {
        values: Vec<u16>,
    },
    ReadDeviceId {
        device_id_code: u8,
        conformity_level: u8,
        more_follows: bool,
        next_object_id: u8,
        objects: Vec<DeviceIdObject>,
    },
    /// Exception response: original function code plus one exception byte.
    /// The raw function byte is kept so unknown codes survive round-trips.
    Exception {
        function: u8,
        exception: ModbusException,
    },
}

// ============================================================================
// Bit packing helpers
// ============================================================================

/// Pack booleans into bytes, LSB-first in the low-address direction.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` booleans from LSB-first packed bytes.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            bytes
                .get(i / 8)
                .map(|b| b & (1 << (i % 8)) != 0)
                .unwrap_or(false)
        })
        .collect()
}

fn write_words(cursor: &mut ByteCursor, values: &[u16]) {
    for &value in values {
        cursor.write_u16(value);
    }
}

fn read_words(cursor: &mut ByteCursor, count: usize) -> ModbusResult<Vec<u16>> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(cursor.read_u16()?);
    }
    Ok(values)
}

fn coil_value_from_u16(raw: u16) -> ModbusResult<bool> {
    match raw {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        other => Err(ModbusError::illegal_value(format!(
            "coil value must be 0xFF00 or 0x0000, got 0x{:04X}",
            other
        ))),
    }
}

impl ModbusRequest {
    /// Function code of this request.
    pub fn function(&self) -> ModbusFunction {
        match self {
            Self::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Self::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
            Self::ReadFileRecord { .. } => ModbusFunction::ReadFileRecord,
            Self::WriteFileRecord { .. } => ModbusFunction::WriteFileRecord,
            Self::MaskWriteRegister { .. } => ModbusFunction::MaskWriteRegister,
            Self::ReadWriteMultipleRegisters { .. } => ModbusFunction::ReadWriteMultipleRegisters,
            Self::ReadFifoQueue { .. } => ModbusFunction::ReadFifoQueue,
            Self::ReadDeviceId { .. } => ModbusFunction::ReadDeviceId,
        }
    }

    /// Encoded PDU length: function byte plus payload.
    pub fn pdu_len(&self) -> usize {
        match self {
            Self::ReadCoils { .. }
            | Self::ReadDiscreteInputs { .. }
            | Self::ReadHoldingRegisters { .. }
            | Self::ReadInputRegisters { .. }
            | Self::WriteSingleCoil { .. }
            | Self::WriteSingleRegister { .. } => 5,
            Self::WriteMultipleCoils { coils, .. } => 6 + coils.len().div_ceil(8),
            Self::WriteMultipleRegisters { values, .. } => 6 + values.len() * 2,
            Self::ReadFileRecord { requests } => 2 + requests.len() * 7,
            Self::WriteFileRecord { records } => {
                2 + records.iter().map(|r| 7 + r.values.len() * 2).sum::<usize>()
            }
            Self::MaskWriteRegister { .. } => 7,
            Self::ReadWriteMultipleRegisters { values, .. } => 10 + values.len() * 2,
            Self::ReadFifoQueue { .. } => 3,
            Self::ReadDeviceId { .. } => 4,
        }
    }

    /// Encode the PDU (function byte + payload) into `cursor`.
    ///
    /// # Panics
    ///
    /// Panics if a count or value violates its protocol limit; building an
    /// out-of-range request is a programmer error, not an I/O condition.
    pub fn encode_pdu(&self, cursor: &mut ByteCursor) {
        cursor.write_u8(self.function().to_u8());
        match self {
            Self::ReadCoils { address, quantity }
            | Self::ReadDiscreteInputs { address, quantity } => {
                assert!(
                    (1..=MAX_READ_COILS as u16).contains(quantity),
                    "bit read quantity {} outside 1..={}",
                    quantity,
                    MAX_READ_COILS
                );
                cursor.write_u16(*address);
                cursor.write_u16(*quantity);
            }
            Self::ReadHoldingRegisters { address, quantity }
            | Self::ReadInputRegisters { address, quantity } => {
                assert!(
                    (1..=MAX_READ_REGISTERS as u16).contains(quantity),
                    "register read quantity {} outside 1..={}",
                    quantity,
                    MAX_READ_REGISTERS
                );
                cursor.write_u16(*address);
                cursor.write_u16(*quantity);
            }
            Self::WriteSingleCoil { address, value } => {
                cursor.write_u16(*address);
                cursor.write_u16(if *value { 0xFF00 } else { 0x0000 });
            }
            Self::WriteSingleRegister { address, value } => {
                cursor.write_u16(*address);
                cursor.write_u16(*value);
            }
            Self::WriteMultipleCoils { address, coils } => {
                assert!(
                    (1..=MAX_WRITE_COILS).contains(&coils.len()),
                    "coil write quantity {} outside 1..={}",
                    coils.len(),
                    MAX_WRITE_COILS
                );
                let packed = pack_bits(coils);
                cursor.write_u16(*address);
                cursor.write_u16(coils.len() as u16);
                cursor.write_u8(packed.len() as u8);
                cursor.write_bytes(&packed);
            }
            Self::WriteMultipleRegisters { address, values } => {
                assert!(
                    (1..=MAX_WRITE_REGISTERS).contains(&values.len()),
                    "register write quantity {} outside 1..={}",
                    values.len(),
                    MAX_WRITE_REGISTERS
                );
                cursor.write_u16(*address);
                cursor.write_u16(values.len() as u16);
                cursor.write_u8((values.len() * 2) as u8);
                write_words(cursor, values);
            }
            Self::ReadFileRecord { requests } => {
                let byte_count = requests.len() * 7;
                assert!(
                    (7..=MAX_FILE_RECORD_BYTES).contains(&byte_count),
                    "file record request byte count {} outside 7..={}",
                    byte_count,
                    MAX_FILE_RECORD_BYTES
                );
                cursor.write_u8(byte_count as u8);
                for sub in requests {
                    cursor.write_u8(FILE_RECORD_REFERENCE_TYPE);
                    cursor.write_u16(sub.file_number);
                    cursor.write_u16(sub.record_number);
                    cursor.write_u16(sub.record_length);
                }
            }
            Self::WriteFileRecord { records } => {
                let byte_count: usize = records.iter().map(|r| 7 + r.values.len() * 2).sum();
                assert!(
                    (9..=MAX_FILE_RECORD_BYTES).contains(&byte_count),
                    "file record write byte count {} outside 9..={}",
                    byte_count,
                    MAX_FILE_RECORD_BYTES
                );
                cursor.write_u8(byte_count as u8);
                for record in records {
                    cursor.write_u8(FILE_RECORD_REFERENCE_TYPE);
                    cursor.write_u16(record.file_number);
                    cursor.write_u16(record.record_number);
                    cursor.write_u16(record.values.len() as u16);
                    write_words(cursor, &record.values);
                }
            }
            Self::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                cursor.write_u16(*address);
                cursor.write_u16(*and_mask);
                cursor.write_u16(*or_mask);
            }
            Self::ReadWriteMultipleRegisters {
                read_address,
                read_quantity,
                write_address,
                values,
            } => {
                assert!(
                    (1..=MAX_RW_READ_REGISTERS as u16).contains(read_quantity),
                    "read/write read quantity {} outside 1..={}",
                    read_quantity,
                    MAX_RW_READ_REGISTERS
                );
                assert!(
                    (1..=MAX_RW_WRITE_REGISTERS).contains(&values.len()),
                    "read/write write quantity {} outside 1..={}",
                    values.len(),
                    MAX_RW_WRITE_REGISTERS
                );
                cursor.write_u16(*read_address);
                cursor.write_u16(*read_quantity);
                cursor.write_u16(*write_address);
                cursor.write_u16(values.len() as u16);
                cursor.write_u8((values.len() * 2) as u8);
                write_words(cursor, values);
            }
            Self::ReadFifoQueue { address } => {
                cursor.write_u16(*address);
            }
            Self::ReadDeviceId {
                device_id_code,
                object_id,
            } => {
                assert!(
                    (1..=4).contains(device_id_code),
                    "device id read code {} outside 1..=4",
                    device_id_code
                );
                cursor.write_u8(MEI_READ_DEVICE_ID);
                cursor.write_u8(*device_id_code);
                cursor.write_u8(*object_id);
            }
        }
    }

    /// Encode into a fresh byte vector.
    pub fn to_pdu_bytes(&self) -> Vec<u8> {
        let mut cursor = ByteCursor::new();
        self.encode_pdu(&mut cursor);
        cursor.into_inner()
    }

    /// Decode a request PDU (function byte first) from `cursor`.
    pub fn decode_pdu(cursor: &mut ByteCursor) -> ModbusResult<Self> {
        let function = ModbusFunction::from_u8(cursor.read_u8()?)?;
        match function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                let address = cursor.read_u16()?;
                let quantity = cursor.read_u16()?;
                if quantity == 0 || quantity as usize > MAX_READ_COILS {
                    return Err(ModbusError::illegal_value(format!(
                        "bit read quantity {} outside 1..={}",
                        quantity, MAX_READ_COILS
                    )));
                }
                Ok(match function {
                    ModbusFunction::ReadCoils => Self::ReadCoils { address, quantity },
                    _ => Self::ReadDiscreteInputs { address, quantity },
                })
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                let address = cursor.read_u16()?;
                let quantity = cursor.read_u16()?;
                if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
                    return Err(ModbusError::illegal_value(format!(
                        "register read quantity {} outside 1..={}",
                        quantity, MAX_READ_REGISTERS
                    )));
                }
                Ok(match function {
                    ModbusFunction::ReadHoldingRegisters => {
                        Self::ReadHoldingRegisters { address, quantity }
                    }
                    _ => Self::ReadInputRegisters { address, quantity },
                })
            }
            ModbusFunction::WriteSingleCoil => {
                let address = cursor.read_u16()?;
                let value = coil_value_from_u16(cursor.read_u16()?)?;
                Ok(Self::WriteSingleCoil { address, value })
            }
            ModbusFunction::WriteSingleRegister => Ok(Self::WriteSingleRegister {
                address: cursor.read_u16()?,
                value: cursor.read_u16()?,
            }),
            ModbusFunction::WriteMultipleCoils => {
                let address = cursor.read_u16()?;
                let quantity = cursor.read_u16()?;
                let byte_count = cursor.read_u8()? as usize;
                if quantity == 0 || quantity as usize > MAX_WRITE_COILS {
                    return Err(ModbusError::illegal_value(format!(
                        "coil write quantity {} outside 1..={}",
                        quantity, MAX_WRITE_COILS
                    )));
                }
                if byte_count != (quantity as usize).div_ceil(8) {
                    return Err(ModbusError::illegal_value(format!(
                        "byte count {} does not cover {} coils",
                        byte_count, quantity
                    )));
                }
                let packed = cursor.read_bytes(byte_count)?.to_vec();
                Ok(Self::WriteMultipleCoils {
                    address,
                    coils: unpack_bits(&packed, quantity as usize),
                })
            }
            ModbusFunction::WriteMultipleRegisters => {
                let address = cursor.read_u16()?;
                let quantity = cursor.read_u16()?;
                let byte_count = cursor.read_u8()? as usize;
                if quantity == 0 || quantity as usize > MAX_WRITE_REGISTERS {
                    return Err(ModbusError::illegal_value(format!(
                        "register write quantity {} outside 1..={}",
                        quantity, MAX_WRITE_REGISTERS
                    )));
                }
                if byte_count != quantity as usize * 2 {
                    return Err(ModbusError::illegal_value(format!(
                        "byte count {} does not match {} registers",
                        byte_count, quantity
                    )));
                }
                Ok(Self::WriteMultipleRegisters {
                    address,
                    values: read_words(cursor, quantity as usize)?,
                })
            }
            ModbusFunction::ReadFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count < 7 || byte_count > MAX_FILE_RECORD_BYTES || byte_count % 7 != 0 {
                    return Err(ModbusError::illegal_value(format!(
                        "file record request byte count {} invalid",
                        byte_count
                    )));
                }
                let mut requests = Vec::with_capacity(byte_count / 7);
                for _ in 0..byte_count / 7 {
                    let reference = cursor.read_u8()?;
                    if reference != FILE_RECORD_REFERENCE_TYPE {
                        return Err(ModbusError::illegal_value(format!(
                            "file record reference type {} (expected 6)",
                            reference
                        )));
                    }
                    requests.push(FileSubRequest {
                        file_number: cursor.read_u16()?,
                        record_number: cursor.read_u16()?,
                        record_length: cursor.read_u16()?,
                    });
                }
                Ok(Self::ReadFileRecord { requests })
            }
            ModbusFunction::WriteFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count < 9 || byte_count > MAX_FILE_RECORD_BYTES {
                    return Err(ModbusError::illegal_value(format!(
                        "file record write byte count {} invalid",
                        byte_count
                    )));
                }
                let end = cursor.position() + byte_count;
                let mut records = Vec::new();
                while cursor.position() < end {
                    let reference = cursor.read_u8()?;
                    if reference != FILE_RECORD_REFERENCE_TYPE {
                        return Err(ModbusError::illegal_value(format!(
                            "file record reference type {} (expected 6)",
                            reference
                        )));
                    }
                    let file_number = cursor.read_u16()?;
                    let record_number = cursor.read_u16()?;
                    let record_length = cursor.read_u16()? as usize;
                    records.push(FileRecord {
                        file_number,
                        record_number,
                        values: read_words(cursor, record_length)?,
                    });
                }
                if cursor.position() != end {
                    return Err(ModbusError::illegal_value(
                        "file record data overruns declared byte count",
                    ));
                }
                Ok(Self::WriteFileRecord { records })
            }
            ModbusFunction::MaskWriteRegister => Ok(Self::MaskWriteRegister {
                address: cursor.read_u16()?,
                and_mask: cursor.read_u16()?,
                or_mask: cursor.read_u16()?,
            }),
            ModbusFunction::ReadWriteMultipleRegisters => {
                let read_address = cursor.read_u16()?;
                let read_quantity = cursor.read_u16()?;
                let write_address = cursor.read_u16()?;
                let write_quantity = cursor.read_u16()?;
                let byte_count = cursor.read_u8()? as usize;
                if read_quantity == 0 || read_quantity as usize > MAX_RW_READ_REGISTERS {
                    return Err(ModbusError::illegal_value(format!(
                        "read/write read quantity {} outside 1..={}",
                        read_quantity, MAX_RW_READ_REGISTERS
                    )));
                }
                if write_quantity == 0 || write_quantity as usize > MAX_RW_WRITE_REGISTERS {
                    return Err(ModbusError::illegal_value(format!(
                        "read/write write quantity {} outside 1..={}",
                        write_quantity, MAX_RW_WRITE_REGISTERS
                    )));
                }
                if byte_count != write_quantity as usize * 2 {
                    return Err(ModbusError::illegal_value(format!(
                        "byte count {} does not match {} registers",
                        byte_count, write_quantity
                    )));
                }
                Ok(Self::ReadWriteMultipleRegisters {
                    read_address,
                    read_quantity,
                    write_address,
                    values: read_words(cursor, write_quantity as usize)?,
                })
            }
            ModbusFunction::ReadFifoQueue => Ok(Self::ReadFifoQueue {
                address: cursor.read_u16()?,
            }),
            ModbusFunction::ReadDeviceId => {
                let mei = cursor.read_u8()?;
                if mei != MEI_READ_DEVICE_ID {
                    return Err(ModbusError::illegal_value(format!(
                        "unsupported MEI type 0x{:02X}",
                        mei
                    )));
                }
                let device_id_code = cursor.read_u8()?;
                if !(1..=4).contains(&device_id_code) {
                    return Err(ModbusError::illegal_value(format!(
                        "device id read code {} outside 1..=4",
                        device_id_code
                    )));
                }
                Ok(Self::ReadDeviceId {
                    device_id_code,
                    object_id: cursor.read_u8()?,
                })
            }
        }
    }

    /// Decode a request PDU from raw bytes.
    pub fn from_pdu_bytes(bytes: &[u8]) -> ModbusResult<Self> {
        let mut cursor = ByteCursor::from_bytes(bytes);
        Self::decode_pdu(&mut cursor)
    }
}

impl ModbusResponse {
    /// Build an exception response for `function` with `exception`.
    pub fn exception(function: u8, exception: ModbusException) -> Self {
        Self::Exception {
            function: function & !EXCEPTION_FLAG,
            exception,
        }
    }

    /// True for exception responses.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// The function byte as it appears on the wire (exception flag included).
    pub fn function_byte(&self) -> u8 {
        match self {
            Self::ReadCoils { .. } => FC_READ_COILS,
            Self::ReadDiscreteInputs { .. } => FC_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
            Self::ReadFileRecord { .. } => FC_READ_FILE_RECORD,
            Self::WriteFileRecord { .. } => FC_WRITE_FILE_RECORD,
            Self::MaskWriteRegister { .. } => FC_MASK_WRITE_REGISTER,
            Self::ReadWriteMultipleRegisters { .. } => FC_READ_WRITE_MULTIPLE_REGISTERS,
            Self::ReadFifoQueue { .. } => FC_READ_FIFO_QUEUE,
            Self::ReadDeviceId { .. } => FC_READ_DEVICE_ID,
            Self::Exception { function, .. } => *function | EXCEPTION_FLAG,
        }
    }

    /// Encoded PDU length: function byte plus payload.
    pub fn pdu_len(&self) -> usize {
        match self {
            Self::ReadCoils { bits } | Self::ReadDiscreteInputs { bits } => 2 + bits.byte_size(),
            Self::ReadHoldingRegisters { values }
            | Self::ReadInputRegisters { values }
            | Self::ReadWriteMultipleRegisters { values } => 2 + values.len() * 2,
            Self::WriteSingleCoil { .. }
            | Self::WriteSingleRegister { .. }
            | Self::WriteMultipleCoils { .. }
            | Self::WriteMultipleRegisters { .. } => 5,
            Self::ReadFileRecord { records } => {
                2 + records.iter().map(|r| 2 + r.len() * 2).sum::<usize>()
            }
            Self::WriteFileRecord { records } => {
                2 + records.iter().map(|r| 7 + r.values.len() * 2).sum::<usize>()
            }
            Self::MaskWriteRegister { .. } => 7,
            Self::ReadFifoQueue { values } => 5 + values.len() * 2,
            Self::ReadDeviceId { objects, .. } => {
                7 + objects.iter().map(|o| 2 + o.value.len()).sum::<usize>()
            }
            Self::Exception { .. } => 2,
        }
    }

    /// Encode the PDU (function byte + payload) into `cursor`.
    ///
    /// # Panics
    ///
    /// Panics if a count violates its protocol limit.
    pub fn encode_pdu(&self, cursor: &mut ByteCursor) {
        cursor.write_u8(self.function_byte());
        match self {
            Self::ReadCoils { bits } | Self::ReadDiscreteInputs { bits } => {
                assert!(
                    bits.size() <= MAX_READ_COILS,
                    "bit response size {} exceeds {}",
                    bits.size(),
                    MAX_READ_COILS
                );
                cursor.write_u8(bits.byte_size() as u8);
                cursor.write_bytes(bits.as_bytes());
            }
            Self::ReadHoldingRegisters { values }
            | Self::ReadInputRegisters { values }
            | Self::ReadWriteMultipleRegisters { values } => {
                assert!(
                    values.len() <= MAX_READ_REGISTERS,
                    "register response count {} exceeds {}",
                    values.len(),
                    MAX_READ_REGISTERS
                );
                cursor.write_u8((values.len() * 2) as u8);
                write_words(cursor, values);
            }
            Self::WriteSingleCoil { address, value } => {
                cursor.write_u16(*address);
                cursor.write_u16(if *value { 0xFF00 } else { 0x0000 });
            }
            Self::WriteSingleRegister { address, value } => {
                cursor.write_u16(*address);
                cursor.write_u16(*value);
            }
            Self::WriteMultipleCoils { address, quantity }
            | Self::WriteMultipleRegisters { address, quantity } => {
                cursor.write_u16(*address);
                cursor.write_u16(*quantity);
            }
            Self::ReadFileRecord { records } => {
                let byte_count: usize = records.iter().map(|r| 2 + r.len() * 2).sum();
                assert!(
                    byte_count <= MAX_FILE_RECORD_BYTES,
                    "file record response byte count {} exceeds {}",
                    byte_count,
                    MAX_FILE_RECORD_BYTES
                );
                cursor.write_u8(byte_count as u8);
                for record in records {
                    cursor.write_u8((record.len() * 2 + 1) as u8);
                    cursor.write_u8(FILE_RECORD_REFERENCE_TYPE);
                    write_words(cursor, record);
                }
            }
            Self::WriteFileRecord { records } => {
                let byte_count: usize = records.iter().map(|r| 7 + r.values.len() * 2).sum();
                cursor.write_u8(byte_count as u8);
                for record in records {
                    cursor.write_u8(FILE_RECORD_REFERENCE_TYPE);
                    cursor.write_u16(record.file_number);
                    cursor.write_u16(record.record_number);
                    cursor.write_u16(record.values.len() as u16);
                    write_words(cursor, &record.values);
                }
            }
            Self::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                cursor.write_u16(*address);
                cursor.write_u16(*and_mask);
                cursor.write_u16(*or_mask);
            }
            Self::ReadFifoQueue { values } => {
                assert!(
                    values.len() <= MAX_FIFO_COUNT,
                    "fifo response count {} exceeds {}",
                    values.len(),
                    MAX_FIFO_COUNT
                );
                cursor.write_u16((values.len() * 2 + 2) as u16);
                cursor.write_u16(values.len() as u16);
                write_words(cursor, values);
            }
            Self::ReadDeviceId {
                device_id_code,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            } => {
                cursor.write_u8(MEI_READ_DEVICE_ID);
                cursor.write_u8(*device_id_code);
                cursor.write_u8(*conformity_level);
                cursor.write_u8(if *more_follows { 0xFF } else { 0x00 });
                cursor.write_u8(*next_object_id);
                cursor.write_u8(objects.len() as u8);
                for object in objects {
                    cursor.write_u8(object.object_id);
                    cursor.write_u8(object.value.len() as u8);
                    cursor.write_bytes(&object.value);
                }
            }
            Self::Exception { exception, .. } => {
                cursor.write_u8(exception.to_u8());
            }
        }
    }

    /// Encode into a fresh byte vector.
    pub fn to_pdu_bytes(&self) -> Vec<u8> {
        let mut cursor = ByteCursor::new();
        self.encode_pdu(&mut cursor);
        cursor.into_inner()
    }

    /// Decode a response PDU (function byte first) from `cursor`.
    pub fn decode_pdu(cursor: &mut ByteCursor) -> ModbusResult<Self> {
        let function_byte = cursor.read_u8()?;
        if function_byte & EXCEPTION_FLAG != 0 {
            let code = cursor.read_u8()?;
            let exception = ModbusException::from_u8(code).ok_or_else(|| {
                ModbusError::protocol(format!("unknown exception code 0x{:02X}", code))
            })?;
            return Ok(Self::Exception {
                function: function_byte & !EXCEPTION_FLAG,
                exception,
            });
        }
        let function = ModbusFunction::from_u8(function_byte)?;
        match function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                let byte_count = cursor.read_u8()? as usize;
                let bytes = cursor.read_bytes(byte_count)?.to_vec();
                let bits = BitVector::from_bytes(&bytes);
                Ok(match function {
                    ModbusFunction::ReadCoils => Self::ReadCoils { bits },
                    _ => Self::ReadDiscreteInputs { bits },
                })
            }
            ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters
            | ModbusFunction::ReadWriteMultipleRegisters => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count % 2 != 0 {
                    return Err(ModbusError::protocol(format!(
                        "odd register byte count {}",
                        byte_count
                    )));
                }
                let values = read_words(cursor, byte_count / 2)?;
                Ok(match function {
                    ModbusFunction::ReadHoldingRegisters => Self::ReadHoldingRegisters { values },
                    ModbusFunction::ReadInputRegisters => Self::ReadInputRegisters { values },
                    _ => Self::ReadWriteMultipleRegisters { values },
                })
            }
            ModbusFunction::WriteSingleCoil => {
                let address = cursor.read_u16()?;
                let value = coil_value_from_u16(cursor.read_u16()?)?;
                Ok(Self::WriteSingleCoil { address, value })
            }
            ModbusFunction::WriteSingleRegister => Ok(Self::WriteSingleRegister {
                address: cursor.read_u16()?,
                value: cursor.read_u16()?,
            }),
            ModbusFunction::WriteMultipleCoils => Ok(Self::WriteMultipleCoils {
                address: cursor.read_u16()?,
                quantity: cursor.read_u16()?,
            }),
            ModbusFunction::WriteMultipleRegisters => Ok(Self::WriteMultipleRegisters {
                address: cursor.read_u16()?,
                quantity: cursor.read_u16()?,
            }),
            ModbusFunction::ReadFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                let end = cursor.position() + byte_count;
                let mut records = Vec::new();
                while cursor.position() < end {
                    let sub_len = cursor.read_u8()? as usize;
                    if sub_len < 1 || sub_len % 2 == 0 {
                        return Err(ModbusError::protocol(format!(
                            "file record sub-response length {} invalid",
                            sub_len
                        )));
                    }
                    let reference = cursor.read_u8()?;
                    if reference != FILE_RECORD_REFERENCE_TYPE {
                        return Err(ModbusError::protocol(format!(
                            "file record reference type {} (expected 6)",
                            reference
                        )));
                    }
                    records.push(read_words(cursor, (sub_len - 1) / 2)?);
                }
                Ok(Self::ReadFileRecord { records })
            }
            ModbusFunction::WriteFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                let end = cursor.position() + byte_count;
                let mut records = Vec::new();
                while cursor.position() < end {
                    let reference = cursor.read_u8()?;
                    if reference != FILE_RECORD_REFERENCE_TYPE {
                        return Err(ModbusError::protocol(format!(
                            "file record reference type {} (expected 6)",
                            reference
                        )));
                    }
                    let file_number = cursor.read_u16()?;
                    let record_number = cursor.read_u16()?;
                    let record_length = cursor.read_u16()? as usize;
                    records.push(FileRecord {
                        file_number,
                        record_number,
                        values: read_words(cursor, record_length)?,
                    });
                }
                Ok(Self::WriteFileRecord { records })
            }
            ModbusFunction::MaskWriteRegister => Ok(Self::MaskWriteRegister {
                address: cursor.read_u16()?,
                and_mask: cursor.read_u16()?,
                or_mask: cursor.read_u16()?,
            }),
            ModbusFunction::ReadFifoQueue => {
                let byte_count = cursor.read_u16()? as usize;
                let fifo_count = cursor.read_u16()? as usize;
                if fifo_count > MAX_FIFO_COUNT {
                    return Err(ModbusError::protocol(format!(
                        "fifo count {} exceeds {}",
                        fifo_count, MAX_FIFO_COUNT
                    )));
                }
                if byte_count != fifo_count * 2 + 2 {
                    return Err(ModbusError::protocol(format!(
                        "fifo byte count {} does not match count {}",
                        byte_count, fifo_count
                    )));
                }
                Ok(Self::ReadFifoQueue {
                    values: read_words(cursor, fifo_count)?,
                })
            }
            ModbusFunction::ReadDeviceId => {
                let mei = cursor.read_u8()?;
                if mei != MEI_READ_DEVICE_ID {
                    return Err(ModbusError::protocol(format!(
                        "unsupported MEI type 0x{:02X}",
                        mei
                    )));
                }
                let device_id_code = cursor.read_u8()?;
                let conformity_level = cursor.read_u8()?;
                let more_follows = cursor.read_u8()? != 0;
                let next_object_id = cursor.read_u8()?;
                let object_count = cursor.read_u8()? as usize;
                let mut objects = Vec::with_capacity(object_count);
                for _ in 0..object_count {
                    let object_id = cursor.read_u8()?;
                    let len = cursor.read_u8()? as usize;
                    objects.push(DeviceIdObject {
                        object_id,
                        value: cursor.read_bytes(len)?.to_vec(),
                    });
                }
                Ok(Self::ReadDeviceId {
                    device_id_code,
                    conformity_level,
                    more_follows,
                    next_object_id,
                    objects,
                })
            }
        }
    }

    /// Decode a response PDU from raw bytes.
    pub fn from_pdu_bytes(bytes: &[u8]) -> ModbusResult<Self> {
        let mut cursor = ByteCursor::from_bytes(bytes);
        Self::decode_pdu(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(request: ModbusRequest) {
        let bytes = request.to_pdu_bytes();
        assert_eq!(bytes.len(), request.pdu_len(), "pdu_len for {:?}", request);
        let decoded = ModbusRequest::from_pdu_bytes(&bytes).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.to_pdu_bytes(), bytes);
    }

    fn roundtrip_response(response: ModbusResponse) {
        let bytes = response.to_pdu_bytes();
        assert_eq!(bytes.len(), response.pdu_len(), "pdu_len for {:?}", response);
        let decoded = ModbusResponse::from_pdu_bytes(&bytes).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.to_pdu_bytes(), bytes);
    }

    #[test]
    fn test_read_holding_registers_wire_format() {
        let request = ModbusRequest::ReadHoldingRegisters {
            address: 0,
            quantity: 3,
        };
        assert_eq!(request.to_pdu_bytes(), &[0x03, 0x00, 0x00, 0x00, 0x03]);

        let response = ModbusResponse::ReadHoldingRegisters {
            values: vec![0x000A, 0x000B, 0x000C],
        };
        assert_eq!(
            response.to_pdu_bytes(),
            &[0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C]
        );
    }

    #[test]
    fn test_write_single_coil_wire_format() {
        let request = ModbusRequest::WriteSingleCoil {
            address: 0x00AC,
            value: true,
        };
        assert_eq!(request.to_pdu_bytes(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let off = ModbusRequest::WriteSingleCoil {
            address: 1,
            value: false,
        };
        assert_eq!(off.to_pdu_bytes(), &[0x05, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_exception_wire_format() {
        let response = ModbusResponse::exception(0x63, ModbusException::IllegalFunction);
        assert_eq!(response.to_pdu_bytes(), &[0xE3, 0x01]);
        roundtrip_response(response);
    }

    #[test]
    fn test_mask_write_wire_format() {
        let request = ModbusRequest::MaskWriteRegister {
            address: 0x0004,
            and_mask: 0x00F2,
            or_mask: 0x0025,
        };
        assert_eq!(
            request.to_pdu_bytes(),
            &[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]
        );
        roundtrip_request(request);
    }

    #[test]
    fn test_request_roundtrips() {
        roundtrip_request(ModbusRequest::ReadCoils {
            address: 0x0013,
            quantity: 37,
        });
        roundtrip_request(ModbusRequest::ReadDiscreteInputs {
            address: 0,
            quantity: 2000,
        });
        roundtrip_request(ModbusRequest::ReadInputRegisters {
            address: 8,
            quantity: 125,
        });
        roundtrip_request(ModbusRequest::WriteSingleRegister {
            address: 1,
            value: 0xABCD,
        });
        roundtrip_request(ModbusRequest::WriteMultipleCoils {
            address: 0x13,
            coils: vec![true, false, true, true, false, false, true, true, true, false],
        });
        roundtrip_request(ModbusRequest::WriteMultipleRegisters {
            address: 1,
            values: vec![0x000A, 0x0102],
        });
        roundtrip_request(ModbusRequest::ReadFileRecord {
            requests: vec![
                FileSubRequest {
                    file_number: 4,
                    record_number: 1,
                    record_length: 2,
                },
                FileSubRequest {
                    file_number: 3,
                    record_number: 9,
                    record_length: 2,
                },
            ],
        });
        roundtrip_request(ModbusRequest::WriteFileRecord {
            records: vec![FileRecord {
                file_number: 4,
                record_number: 7,
                values: vec![0x06AF, 0x04BE, 0x100D],
            }],
        });
        roundtrip_request(ModbusRequest::ReadWriteMultipleRegisters {
            read_address: 3,
            read_quantity: 6,
            write_address: 14,
            values: vec![0x00FF, 0x00FF, 0x00FF],
        });
        roundtrip_request(ModbusRequest::ReadFifoQueue { address: 0x04DE });
        roundtrip_request(ModbusRequest::ReadDeviceId {
            device_id_code: 1,
            object_id: 0,
        });
    }

    #[test]
    fn test_response_roundtrips() {
        roundtrip_response(ModbusResponse::ReadCoils {
            bits: BitVector::from_bytes(&[0xCD, 0x6B, 0x05]),
        });
        roundtrip_response(ModbusResponse::ReadDiscreteInputs {
            bits: BitVector::from_bytes(&[0xAC]),
        });
        roundtrip_response(ModbusResponse::ReadInputRegisters {
            values: vec![0x000A],
        });
        roundtrip_response(ModbusResponse::WriteSingleCoil {
            address: 0xAC,
            value: true,
        });
        roundtrip_response(ModbusResponse::WriteSingleRegister {
            address: 1,
            value: 3,
        });
        roundtrip_response(ModbusResponse::WriteMultipleCoils {
            address: 0x13,
            quantity: 10,
        });
        roundtrip_response(ModbusResponse::WriteMultipleRegisters {
            address: 1,
            quantity: 2,
        });
        roundtrip_response(ModbusResponse::ReadFileRecord {
            records: vec![vec![0x0DFE, 0x0020], vec![0x33CD]],
        });
        roundtrip_response(ModbusResponse::WriteFileRecord {
            records: vec![FileRecord {
                file_number: 4,
                record_number: 7,
                values: vec![0x06AF],
            }],
        });
        roundtrip_response(ModbusResponse::MaskWriteRegister {
            address: 4,
            and_mask: 0xF2,
            or_mask: 0x25,
        });
        roundtrip_response(ModbusResponse::ReadWriteMultipleRegisters {
            values: vec![0x00FE, 0x0ACD, 0x0001],
        });
        roundtrip_response(ModbusResponse::ReadFifoQueue {
            values: vec![0x01B8, 0x1284],
        });
        roundtrip_response(ModbusResponse::ReadDeviceId {
            device_id_code: 1,
            conformity_level: 0x01,
            more_follows: false,
            next_object_id: 0,
            objects: vec![
                DeviceIdObject {
                    object_id: 0,
                    value: b"Acme".to_vec(),
                },
                DeviceIdObject {
                    object_id: 1,
                    value: b"PLC-9".to_vec(),
                },
            ],
        });
    }

    #[test]
    fn test_decode_rejects_out_of_range_counts() {
        // Read coils with quantity 2001: structurally valid, semantically not.
        let err = ModbusRequest::from_pdu_bytes(&[0x01, 0x00, 0x00, 0x07, 0xD1]).unwrap_err();
        assert!(matches!(err, ModbusError::IllegalValue { .. }));

        // Zero quantity.
        let err = ModbusRequest::from_pdu_bytes(&[0x03, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::IllegalValue { .. }));

        // Byte count not covering the coil quantity.
        let err =
            ModbusRequest::from_pdu_bytes(&[0x0F, 0x00, 0x00, 0x00, 0x09, 0x01, 0xFF]).unwrap_err();
        assert!(matches!(err, ModbusError::IllegalValue { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_coil_value() {
        let err = ModbusRequest::from_pdu_bytes(&[0x05, 0x00, 0x01, 0x12, 0x34]).unwrap_err();
        assert!(matches!(err, ModbusError::IllegalValue { .. }));
    }

    #[test]
    fn test_decode_unknown_function() {
        let err = ModbusRequest::from_pdu_bytes(&[0x63, 0x00, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::InvalidFunction { code: 0x63 }
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let err = ModbusRequest::from_pdu_bytes(&[0x03, 0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::Truncated { .. }));

        let err = ModbusResponse::from_pdu_bytes(&[0x03, 0x06, 0x00, 0x0A]).unwrap_err();
        assert!(matches!(err, ModbusError::Truncated { .. }));
    }

    #[test]
    #[should_panic(expected = "outside 1..=")]
    fn test_encode_out_of_range_panics() {
        ModbusRequest::ReadCoils {
            address: 0,
            quantity: 2001,
        }
        .to_pdu_bytes();
    }

    #[test]
    #[should_panic(expected = "outside 1..=")]
    fn test_encode_zero_quantity_panics() {
        ModbusRequest::ReadHoldingRegisters {
            address: 0,
            quantity: 0,
        }
        .to_pdu_bytes();
    }

    #[test]
    fn test_pack_unpack_bits() {
        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&packed, bits.len()), bits);
    }

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x03).unwrap(),
            ModbusFunction::ReadHoldingRegisters
        );
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(
            ModbusFunction::from_u8(0x2B).unwrap(),
            ModbusFunction::ReadDeviceId
        );
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(
            ModbusException::from_u8(0x02).unwrap(),
            ModbusException::IllegalDataAddress
        );
        assert_eq!(ModbusException::IllegalDataAddress.to_u8(), 0x02);
        assert!(ModbusException::from_u8(0x07).is_none());
        assert!(ModbusException::from_u8(0xFF).is_none());
    }

    #[test]
    fn test_function_classification() {
        assert!(ModbusFunction::ReadCoils.is_read_function());
        assert!(ModbusFunction::WriteSingleCoil.is_write_function());
        // FC23 both reads and writes; it is classified as a write.
        assert!(ModbusFunction::ReadWriteMultipleRegisters.is_write_function());
        assert!(!ModbusFunction::ReadWriteMultipleRegisters.is_read_function());
    }
}
