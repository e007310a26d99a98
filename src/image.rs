//! In-memory process image
//!
//! The process image is the slave's data store: per unit id, a bank of coils,
//! discrete inputs, input registers and holding registers, plus optional file
//! records and FIFO queues. Handler tasks share one [`ProcessImage`]; reads
//! take a shared lock and writes an exclusive lock per unit, so a request's
//! mutation is atomic — no partial write is ever visible to a concurrent
//! reader.
//!
//! Change observers registered on a unit are invoked after a successful
//! protocol write with `(address, function, new_value)`, outside the write
//! critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::bits::BitVector;
use crate::constants::MAX_FIFO_COUNT;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// Observer invoked after a successful write with
/// `(address, function, new_value)`. Coil writes report 0/1.
pub type ImageObserver = Arc<dyn Fn(u16, ModbusFunction, u16) + Send + Sync>;

/// One change event queued during a write and delivered after the lock drops.
type ChangeEvent = (u16, ModbusFunction, u16);

struct Banks {
    coils: BitVector,
    discretes: BitVector,
    inputs: Vec<u16>,
    holdings: Vec<u16>,
    files: HashMap<u16, Vec<Vec<u16>>>,
    fifos: HashMap<u16, VecDeque<u16>>,
}

/// The addressable data of a single unit (slave id).
pub struct UnitImage {
    banks: RwLock<Banks>,
    observers: RwLock<Vec<ImageObserver>>,
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_range(address: u16, quantity: usize, len: usize, bank: &str) -> ModbusResult<()> {
    let end = address as usize + quantity;
    if end > len {
        return Err(ModbusError::illegal_address(format!(
            "{}..{} outside {} bank of {}",
            address, end, bank, len
        )));
    }
    Ok(())
}

impl UnitImage {
    /// Allocate banks of the given sizes, zero-filled.
    pub fn new(
        coil_count: usize,
        discrete_count: usize,
        input_count: usize,
        holding_count: usize,
    ) -> Self {
        Self {
            banks: RwLock::new(Banks {
                coils: BitVector::new(coil_count),
                discretes: BitVector::new(discrete_count),
                inputs: vec![0; input_count],
                holdings: vec![0; holding_count],
                files: HashMap::new(),
                fifos: HashMap::new(),
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Seed a file with its records (builder style, before sharing).
    pub fn with_file(self, file_number: u16, records: Vec<Vec<u16>>) -> Self {
        write_guard(&self.banks).files.insert(file_number, records);
        self
    }

    /// Seed a FIFO queue at `address` (builder style, before sharing).
    pub fn with_fifo(self, address: u16, values: Vec<u16>) -> Self {
        write_guard(&self.banks)
            .fifos
            .insert(address, values.into());
        self
    }

    /// Register a change observer.
    pub fn add_observer(&self, observer: ImageObserver) {
        write_guard(&self.observers).push(observer);
    }

    fn notify(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let observers = read_guard(&self.observers);
        for observer in observers.iter() {
            for &(address, function, value) in events {
                observer(address, function, value);
            }
        }
    }

    // ===== Coils =====

    /// Read `quantity` coils starting at `address`.
    pub fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let banks = read_guard(&self.banks);
        check_range(address, quantity as usize, banks.coils.size(), "coil")?;
        Ok((0..quantity as usize)
            .map(|i| banks.coils.get(address as usize + i))
            .collect())
    }

    /// Write one coil.
    pub fn write_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
        {
            let mut banks = write_guard(&self.banks);
            check_range(address, 1, banks.coils.size(), "coil")?;
            banks.coils.set(address as usize, value);
        }
        self.notify(&[(address, ModbusFunction::WriteSingleCoil, value as u16)]);
        Ok(())
    }

    /// Write a run of coils atomically.
    pub fn write_coils(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let mut events = Vec::with_capacity(values.len());
        {
            let mut banks = write_guard(&self.banks);
            check_range(address, values.len(), banks.coils.size(), "coil")?;
            for (i, &value) in values.iter().enumerate() {
                banks.coils.set(address as usize + i, value);
                events.push((
                    address + i as u16,
                    ModbusFunction::WriteMultipleCoils,
                    value as u16,
                ));
            }
        }
        self.notify(&events);
        Ok(())
    }

    // ===== Discrete inputs =====

    /// Read `quantity` discrete inputs starting at `address`.
    pub fn read_discretes(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let banks = read_guard(&self.banks);
        check_range(address, quantity as usize, banks.discretes.size(), "discrete")?;
        Ok((0..quantity as usize)
            .map(|i| banks.discretes.get(address as usize + i))
            .collect())
    }

    /// Prime a discrete input from the application side.
    pub fn set_discrete(&self, address: u16, value: bool) -> ModbusResult<()> {
        let mut banks = write_guard(&self.banks);
        check_range(address, 1, banks.discretes.size(), "discrete")?;
        banks.discretes.set(address as usize, value);
        Ok(())
    }

    // ===== Registers =====

    /// Read `quantity` holding registers starting at `address`.
    pub fn read_holdings(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let banks = read_guard(&self.banks);
        check_range(address, quantity as usize, banks.holdings.len(), "holding")?;
        Ok(banks.holdings[address as usize..address as usize + quantity as usize].to_vec())
    }

    /// Read `quantity` input registers starting at `address`.
    pub fn read_inputs(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let banks = read_guard(&self.banks);
        check_range(address, quantity as usize, banks.inputs.len(), "input")?;
        Ok(banks.inputs[address as usize..address as usize + quantity as usize].to_vec())
    }

    /// Prime an input register from the application side.
    pub fn set_input(&self, address: u16, value: u16) -> ModbusResult<()> {
        let mut banks = write_guard(&self.banks);
        check_range(address, 1, banks.inputs.len(), "input")?;
        banks.inputs[address as usize] = value;
        Ok(())
    }

    /// Prime a holding register without notifying observers.
    pub fn set_holding(&self, address: u16, value: u16) -> ModbusResult<()> {
        let mut banks = write_guard(&self.banks);
        check_range(address, 1, banks.holdings.len(), "holding")?;
        banks.holdings[address as usize] = value;
        Ok(())
    }

    /// Write one holding register.
    pub fn write_holding(&self, address: u16, value: u16) -> ModbusResult<()> {
        {
            let mut banks = write_guard(&self.banks);
            check_range(address, 1, banks.holdings.len(), "holding")?;
            banks.holdings[address as usize] = value;
        }
        self.notify(&[(address, ModbusFunction::WriteSingleRegister, value)]);
        Ok(())
    }

    /// Write a run of holding registers atomically.
    pub fn write_holdings(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let mut events = Vec::with_capacity(values.len());
        {
            let mut banks = write_guard(&self.banks);
            check_range(address, values.len(), banks.holdings.len(), "holding")?;
            for (i, &value) in values.iter().enumerate() {
                banks.holdings[address as usize + i] = value;
                events.push((
                    address + i as u16,
                    ModbusFunction::WriteMultipleRegisters,
                    value,
                ));
            }
        }
        self.notify(&events);
        Ok(())
    }

    /// Apply a mask write: `new = (current & and_mask) | (or_mask & !and_mask)`.
    /// Returns the new value.
    pub fn mask_write_holding(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<u16> {
        let new_value;
        {
            let mut banks = write_guard(&self.banks);
            check_range(address, 1, banks.holdings.len(), "holding")?;
            let current = banks.holdings[address as usize];
            new_value = (current & and_mask) | (or_mask & !and_mask);
            banks.holdings[address as usize] = new_value;
        }
        self.notify(&[(address, ModbusFunction::MaskWriteRegister, new_value)]);
        Ok(new_value)
    }

    /// Write one span of holding registers, then read another, under a single
    /// exclusive lock: the read sees the freshly written values and nothing
    /// in between.
    pub fn write_then_read_holdings(
        &self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let mut events = Vec::with_capacity(values.len());
        let result;
        {
            let mut banks = write_guard(&self.banks);
            check_range(write_address, values.len(), banks.holdings.len(), "holding")?;
            check_range(
                read_address,
                read_quantity as usize,
                banks.holdings.len(),
                "holding",
            )?;
            for (i, &value) in values.iter().enumerate() {
                banks.holdings[write_address as usize + i] = value;
                events.push((
                    write_address + i as u16,
                    ModbusFunction::ReadWriteMultipleRegisters,
                    value,
                ));
            }
            result = banks.holdings
                [read_address as usize..read_address as usize + read_quantity as usize]
                .to_vec();
        }
        self.notify(&events);
        Ok(result)
    }

    // ===== File records =====

    /// Read `length` words of a file record.
    pub fn read_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        length: u16,
    ) -> ModbusResult<Vec<u16>> {
        let banks = read_guard(&self.banks);
        let file = banks.files.get(&file_number).ok_or_else(|| {
            ModbusError::illegal_address(format!("file {} does not exist", file_number))
        })?;
        let record = file.get(record_number as usize).ok_or_else(|| {
            ModbusError::illegal_address(format!(
                "record {} outside file {} of {} records",
                record_number,
                file_number,
                file.len()
            ))
        })?;
        check_range(0, length as usize, record.len(), "file record")?;
        Ok(record[..length as usize].to_vec())
    }

    /// Overwrite the head of a file record.
    pub fn write_file_record(
        &self,
        file_number: u16,
        record_number: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        let mut banks = write_guard(&self.banks);
        let file = banks.files.get_mut(&file_number).ok_or_else(|| {
            ModbusError::illegal_address(format!("file {} does not exist", file_number))
        })?;
        let record = file.get_mut(record_number as usize).ok_or_else(|| {
            ModbusError::illegal_address(format!(
                "record {} outside file {}",
                record_number, file_number
            ))
        })?;
        check_range(0, values.len(), record.len(), "file record")?;
        record[..values.len()].copy_from_slice(values);
        Ok(())
    }

    // ===== FIFO queues =====

    /// Snapshot the FIFO registered at `address`, front first. Queues deeper
    /// than 31 entries are reported as a value error per the function's limit.
    pub fn read_fifo(&self, address: u16) -> ModbusResult<Vec<u16>> {
        let banks = read_guard(&self.banks);
        let fifo = banks.fifos.get(&address).ok_or_else(|| {
            ModbusError::illegal_address(format!("no FIFO at address {}", address))
        })?;
        if fifo.len() > MAX_FIFO_COUNT {
            return Err(ModbusError::illegal_value(format!(
                "FIFO holds {} entries, more than {}",
                fifo.len(),
                MAX_FIFO_COUNT
            )));
        }
        Ok(fifo.iter().copied().collect())
    }

    /// Append a value to the FIFO at `address`, creating it if absent.
    pub fn push_fifo(&self, address: u16, value: u16) {
        write_guard(&self.banks)
            .fifos
            .entry(address)
            .or_default()
            .push_back(value);
    }

    /// Drop every entry of the FIFO at `address`.
    pub fn clear_fifo(&self, address: u16) {
        if let Some(fifo) = write_guard(&self.banks).fifos.get_mut(&address) {
            fifo.clear();
        }
    }
}

/// The slave's full data store: one [`UnitImage`] per served unit id.
///
/// Built before the listener starts; the unit map itself is immutable
/// afterwards, only bank contents change.
#[derive(Default)]
pub struct ProcessImage {
    units: HashMap<u8, Arc<UnitImage>>,
}

impl ProcessImage {
    /// Empty image serving no units.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the image for `unit_id`, returning the shared handle.
    pub fn add_unit(&mut self, unit_id: u8, image: UnitImage) -> Arc<UnitImage> {
        let image = Arc::new(image);
        self.units.insert(unit_id, image.clone());
        image
    }

    /// The image serving `unit_id`, if any.
    pub fn unit(&self, unit_id: u8) -> Option<Arc<UnitImage>> {
        self.units.get(&unit_id).cloned()
    }

    /// Whether requests addressed to `unit_id` are served.
    pub fn serves_unit(&self, unit_id: u8) -> bool {
        self.units.contains_key(&unit_id)
    }

    /// Served unit ids.
    pub fn unit_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.units.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn unit() -> UnitImage {
        UnitImage::new(16, 16, 8, 8)
    }

    #[test]
    fn test_coil_read_write() {
        let image = unit();
        image.write_coil(3, true).unwrap();
        assert_eq!(
            image.read_coils(2, 3).unwrap(),
            vec![false, true, false]
        );

        image.write_coils(0, &[true, true, false, true]).unwrap();
        assert_eq!(
            image.read_coils(0, 4).unwrap(),
            vec![true, true, false, true]
        );
    }

    #[test]
    fn test_range_violations_rejected() {
        let image = unit();
        assert!(matches!(
            image.read_coils(10, 7).unwrap_err(),
            ModbusError::IllegalAddress { .. }
        ));
        assert!(matches!(
            image.read_holdings(8, 1).unwrap_err(),
            ModbusError::IllegalAddress { .. }
        ));
        assert!(matches!(
            image.write_holdings(6, &[1, 2, 3]).unwrap_err(),
            ModbusError::IllegalAddress { .. }
        ));
        // Boundary case: last valid span succeeds.
        assert!(image.read_holdings(7, 1).is_ok());
    }

    #[test]
    fn test_mask_write_semantics() {
        let image = unit();
        image.set_holding(4, 0x12).unwrap();
        let new_value = image.mask_write_holding(4, 0xF2, 0x25).unwrap();
        assert_eq!(new_value, 0x17);
        assert_eq!(image.read_holdings(4, 1).unwrap(), vec![0x17]);
    }

    #[test]
    fn test_write_before_read() {
        let image = unit();
        let result = image
            .write_then_read_holdings(0, &[0xAA, 0xBB], 0, 4)
            .unwrap();
        assert_eq!(result, vec![0xAA, 0xBB, 0, 0]);
    }

    #[test]
    fn test_observers_see_writes() {
        let image = unit();
        let seen: Arc<Mutex<Vec<(u16, u16)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        image.add_observer(Arc::new(move |address, _function, value| {
            sink.lock().unwrap().push((address, value));
        }));

        image.write_holding(2, 0x1234).unwrap();
        image.write_holdings(5, &[1, 2]).unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![(2, 0x1234), (5, 1), (6, 2)]
        );
    }

    #[test]
    fn test_observers_not_fired_on_priming() {
        let image = unit();
        let count = Arc::new(Mutex::new(0u32));
        let sink = count.clone();
        image.add_observer(Arc::new(move |_, _, _| {
            *sink.lock().unwrap() += 1;
        }));

        image.set_holding(0, 7).unwrap();
        image.set_input(0, 7).unwrap();
        image.set_discrete(0, true).unwrap();
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_file_records() {
        let image = unit().with_file(4, vec![vec![0, 0, 0], vec![9, 9, 9]]);
        image.write_file_record(4, 0, &[0x06AF, 0x04BE]).unwrap();
        assert_eq!(
            image.read_file_record(4, 0, 3).unwrap(),
            vec![0x06AF, 0x04BE, 0]
        );
        assert!(image.read_file_record(5, 0, 1).is_err());
        assert!(image.read_file_record(4, 2, 1).is_err());
        assert!(image.read_file_record(4, 0, 4).is_err());
    }

    #[test]
    fn test_fifo() {
        let image = unit().with_fifo(0x04DE, vec![0x01B8]);
        image.push_fifo(0x04DE, 0x1284);
        assert_eq!(image.read_fifo(0x04DE).unwrap(), vec![0x01B8, 0x1284]);

        image.clear_fifo(0x04DE);
        assert_eq!(image.read_fifo(0x04DE).unwrap(), Vec::<u16>::new());

        // Depth above 31 is a value error.
        for i in 0..40 {
            image.push_fifo(0x04DE, i);
        }
        assert!(matches!(
            image.read_fifo(0x04DE).unwrap_err(),
            ModbusError::IllegalValue { .. }
        ));
    }

    #[test]
    fn test_process_image_unit_lookup() {
        let mut process = ProcessImage::new();
        process.add_unit(1, unit());
        process.add_unit(5, unit());

        assert!(process.serves_unit(1));
        assert!(!process.serves_unit(2));
        assert_eq!(process.unit_ids(), vec![1, 5]);
        assert!(process.unit(5).is_some());
        assert!(process.unit(9).is_none());
    }
}
