//! Slave-side request dispatcher
//!
//! Routes each decoded request to the matching [`ProcessImage`] operation and
//! turns the outcome into a response PDU. The error policy follows the
//! protocol: requests for a unit the image does not serve are dropped without
//! a reply, malformed frames abort the connection, and semantic failures
//! (bad address, bad count/value) come back as the matching exception.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bits::BitVector;
use crate::error::{ModbusError, ModbusResult};
use crate::image::{ProcessImage, UnitImage};
use crate::protocol::{
    DeviceIdObject, ModbusException, ModbusRequest, ModbusResponse, UnitId,
};

/// Identification strings served for Read Device Identification (FC43).
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub revision: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_name: "relay-modbus".to_string(),
            product_code: env!("CARGO_PKG_NAME").to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DeviceIdentity {
    fn objects(&self) -> Vec<DeviceIdObject> {
        vec![
            DeviceIdObject {
                object_id: 0x00,
                value: self.vendor_name.clone().into_bytes(),
            },
            DeviceIdObject {
                object_id: 0x01,
                value: self.product_code.clone().into_bytes(),
            },
            DeviceIdObject {
                object_id: 0x02,
                value: self.revision.clone().into_bytes(),
            },
        ]
    }
}

/// Stateless dispatcher shared by every connection handler of a slave.
pub struct ModbusHandler {
    image: Arc<ProcessImage>,
    identity: DeviceIdentity,
}

impl ModbusHandler {
    /// Create a handler over `image` with the default device identity.
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self {
            image,
            identity: DeviceIdentity::default(),
        }
    }

    /// Create a handler with explicit identification strings.
    pub fn with_identity(image: Arc<ProcessImage>, identity: DeviceIdentity) -> Self {
        Self { image, identity }
    }

    /// The shared process image.
    pub fn image(&self) -> &Arc<ProcessImage> {
        &self.image
    }

    /// Service one raw request PDU addressed to `unit_id`.
    ///
    /// Returns:
    /// - `Ok(Some(pdu))` — response bytes to send back (possibly an exception),
    /// - `Ok(None)` — the unit is not served; drop silently,
    /// - `Err(_)` — the frame is malformed beyond answering; the caller
    ///   should close the connection.
    pub fn handle_pdu(&self, unit_id: UnitId, pdu: &[u8]) -> ModbusResult<Option<Vec<u8>>> {
        if !self.image.serves_unit(unit_id) {
            debug!("dropping request for unserved unit {}", unit_id);
            return Ok(None);
        }
        let function = pdu.first().copied().unwrap_or(0);

        let request = match ModbusRequest::from_pdu_bytes(pdu) {
            Ok(request) => request,
            Err(ModbusError::InvalidFunction { code }) => {
                warn!("unsupported function 0x{:02X} from unit {}", code, unit_id);
                return Ok(Some(
                    ModbusResponse::exception(code, ModbusException::IllegalFunction)
                        .to_pdu_bytes(),
                ));
            }
            Err(ModbusError::IllegalValue { message }) => {
                warn!("rejecting request: {}", message);
                return Ok(Some(
                    ModbusResponse::exception(function, ModbusException::IllegalDataValue)
                        .to_pdu_bytes(),
                ));
            }
            Err(e) => return Err(e),
        };

        Ok(self
            .handle(unit_id, &request)
            .map(|response| response.to_pdu_bytes()))
    }

    /// Service one decoded request. Returns `None` when `unit_id` is not
    /// served (the caller stays silent).
    pub fn handle(&self, unit_id: UnitId, request: &ModbusRequest) -> Option<ModbusResponse> {
        let unit = self.image.unit(unit_id)?;
        let function = request.function().to_u8();
        Some(match self.dispatch(&unit, request) {
            Ok(response) => response,
            Err(e) => {
                let exception = exception_code(&e);
                debug!(
                    "request {} failed: {} -> exception {}",
                    request.function(),
                    e,
                    exception
                );
                ModbusResponse::exception(function, exception)
            }
        })
    }

    fn dispatch(&self, unit: &UnitImage, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        match request {
            ModbusRequest::ReadCoils { address, quantity } => {
                let coils = unit.read_coils(*address, *quantity)?;
                Ok(ModbusResponse::ReadCoils {
                    bits: BitVector::from_bools(&coils),
                })
            }
            ModbusRequest::ReadDiscreteInputs { address, quantity } => {
                let inputs = unit.read_discretes(*address, *quantity)?;
                Ok(ModbusResponse::ReadDiscreteInputs {
                    bits: BitVector::from_bools(&inputs),
                })
            }
            ModbusRequest::ReadHoldingRegisters { address, quantity } => {
                Ok(ModbusResponse::ReadHoldingRegisters {
                    values: unit.read_holdings(*address, *quantity)?,
                })
            }
            ModbusRequest::ReadInputRegisters { address, quantity } => {
                Ok(ModbusResponse::ReadInputRegisters {
                    values: unit.read_inputs(*address, *quantity)?,
                })
            }
            ModbusRequest::WriteSingleCoil { address, value } => {
                unit.write_coil(*address, *value)?;
                Ok(ModbusResponse::WriteSingleCoil {
                    address: *address,
                    value: *value,
                })
            }
            ModbusRequest::WriteSingleRegister { address, value } => {
                unit.write_holding(*address, *value)?;
                Ok(ModbusResponse::WriteSingleRegister {
                    address: *address,
                    value: *value,
                })
            }
            ModbusRequest::WriteMultipleCoils { address, coils } => {
                unit.write_coils(*address, coils)?;
                Ok(ModbusResponse::WriteMultipleCoils {
                    address: *address,
                    quantity: coils.len() as u16,
                })
            }
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                unit.write_holdings(*address, values)?;
                Ok(ModbusResponse::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                })
            }
            ModbusRequest::ReadFileRecord { requests } => {
                let mut records = Vec::with_capacity(requests.len());
                for sub in requests {
                    records.push(unit.read_file_record(
                        sub.file_number,
                        sub.record_number,
                        sub.record_length,
                    )?);
                }
                Ok(ModbusResponse::ReadFileRecord { records })
            }
            ModbusRequest::WriteFileRecord { records } => {
                for record in records {
                    unit.write_file_record(
                        record.file_number,
                        record.record_number,
                        &record.values,
                    )?;
                }
                Ok(ModbusResponse::WriteFileRecord {
                    records: records.clone(),
                })
            }
            ModbusRequest::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                unit.mask_write_holding(*address, *and_mask, *or_mask)?;
                Ok(ModbusResponse::MaskWriteRegister {
                    address: *address,
                    and_mask: *and_mask,
                    or_mask: *or_mask,
                })
            }
            ModbusRequest::ReadWriteMultipleRegisters {
                read_address,
                read_quantity,
                write_address,
                values,
            } => Ok(ModbusResponse::ReadWriteMultipleRegisters {
                values: unit.write_then_read_holdings(
                    *write_address,
                    values,
                    *read_address,
                    *read_quantity,
                )?,
            }),
            ModbusRequest::ReadFifoQueue { address } => Ok(ModbusResponse::ReadFifoQueue {
                values: unit.read_fifo(*address)?,
            }),
            ModbusRequest::ReadDeviceId {
                device_id_code,
                object_id,
            } => {
                let objects: Vec<DeviceIdObject> = self
                    .identity
                    .objects()
                    .into_iter()
                    .filter(|o| o.object_id >= *object_id)
                    .collect();
                if objects.is_empty() {
                    return Err(ModbusError::illegal_address(format!(
                        "identification object 0x{:02X} does not exist",
                        object_id
                    )));
                }
                Ok(ModbusResponse::ReadDeviceId {
                    device_id_code: *device_id_code,
                    conformity_level: 0x01,
                    more_follows: false,
                    next_object_id: 0,
                    objects,
                })
            }
        }
    }
}

/// Map an image/codec error to the exception code reported to the master.
fn exception_code(error: &ModbusError) -> ModbusException {
    match error {
        ModbusError::IllegalAddress { .. } => ModbusException::IllegalDataAddress,
        ModbusError::IllegalValue { .. } => ModbusException::IllegalDataValue,
        ModbusError::InvalidFunction { .. } => ModbusException::IllegalFunction,
        _ => ModbusException::SlaveDeviceFailure,
    }
}
