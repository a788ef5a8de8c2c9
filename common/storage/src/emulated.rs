// Licensed under the Apache-2.0 license

//! Host models of the device's non-volatile memories.
//!
//! `MemFlash` behaves like a NOR part: erased cells read `0xFF`, programming
//! ANDs the new data into the cell, and erase works on whole sectors. Power
//! can be cut after a budget of programmed bytes to exercise the atomicity
//! rules of the records stored on top of it.

use std::cell::{Cell, RefCell};
use std::vec::Vec;

use flash_image::RebootInfoRecord;

use crate::hil::{FlashDrvError, FlashStorage};
use crate::reboot::RebootInfoStore;

pub struct MemFlash {
    data: RefCell<Vec<u8>>,
    erase_size: usize,
    erase_counts: RefCell<Vec<u32>>,
    /// Bytes (or sectors, for erase) left before the supply drops.
    power_budget: Cell<Option<usize>>,
    powered: Cell<bool>,
    bytes_written: Cell<usize>,
}

impl MemFlash {
    pub fn new(capacity: usize, erase_size: usize) -> Self {
        assert!(erase_size > 0 && capacity % erase_size == 0);
        MemFlash {
            data: RefCell::new(vec![0xFF; capacity]),
            erase_size,
            erase_counts: RefCell::new(vec![0; capacity / erase_size]),
            power_budget: Cell::new(None),
            powered: Cell::new(true),
            bytes_written: Cell::new(0),
        }
    }

    /// Cuts power once `bytes` more bytes have been programmed. An erase
    /// consumes one unit per sector and a cut in the middle of a sector erase
    /// leaves that sector half erased.
    pub fn cut_power_after(&self, bytes: usize) {
        self.power_budget.set(Some(bytes));
    }

    /// Restores power. Contents are kept, as on real flash.
    pub fn power_cycle(&self) {
        self.power_budget.set(None);
        self.powered.set(true);
    }

    pub fn is_powered(&self) -> bool {
        self.powered.get()
    }

    /// Programs raw bytes, bypassing NOR semantics and power simulation.
    /// Used to provision images at "manufacture" time.
    pub fn load(&self, address: usize, bytes: &[u8]) {
        self.data.borrow_mut()[address..address + bytes.len()].copy_from_slice(bytes);
    }

    /// Flips bits in place, modelling a retention error.
    pub fn corrupt(&self, address: usize, xor: u8) {
        self.data.borrow_mut()[address] ^= xor;
    }

    pub fn snapshot(&self, address: usize, len: usize) -> Vec<u8> {
        self.data.borrow()[address..address + len].to_vec()
    }

    pub fn erase_count(&self, sector: usize) -> u32 {
        self.erase_counts.borrow()[sector]
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written.get()
    }

    fn check_range(&self, address: usize, len: usize) -> Result<(), FlashDrvError> {
        if address + len > self.capacity() {
            return Err(FlashDrvError::SIZE);
        }
        if !self.powered.get() {
            return Err(FlashDrvError::OFF);
        }
        Ok(())
    }

    /// Consumes one unit of the power budget. Returns `false` when the supply
    /// has just dropped.
    fn consume_power(&self) -> bool {
        match self.power_budget.get() {
            Some(0) => {
                self.powered.set(false);
                false
            }
            Some(n) => {
                self.power_budget.set(Some(n - 1));
                true
            }
            None => true,
        }
    }
}

impl FlashStorage for MemFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        self.check_range(address, buffer.len())?;
        buffer.copy_from_slice(&self.data.borrow()[address..address + buffer.len()]);
        Ok(())
    }

    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError> {
        self.check_range(address, buffer.len())?;
        let mut data = self.data.borrow_mut();
        for (i, byte) in buffer.iter().enumerate() {
            if !self.consume_power() {
                return Err(FlashDrvError::OFF);
            }
            data[address + i] &= *byte;
            self.bytes_written.set(self.bytes_written.get() + 1);
        }
        Ok(())
    }

    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError> {
        if address % self.erase_size != 0 || length % self.erase_size != 0 {
            return Err(FlashDrvError::INVAL);
        }
        self.check_range(address, length)?;
        let mut data = self.data.borrow_mut();
        for sector_start in (address..address + length).step_by(self.erase_size) {
            let sector = &mut data[sector_start..sector_start + self.erase_size];
            if !self.consume_power() {
                sector[..self.erase_size / 2].fill(0xFF);
                return Err(FlashDrvError::OFF);
            }
            sector.fill(0xFF);
            self.erase_counts.borrow_mut()[sector_start / self.erase_size] += 1;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.borrow().len()
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }
}

/// Retained RAM section holding the reboot diagnostics. Survives resets but
/// not power loss.
#[derive(Default)]
pub struct MemRebootInfo {
    record: RefCell<Option<RebootInfoRecord>>,
}

impl MemRebootInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the retained contents, as a cold power-on does.
    pub fn power_loss(&self) {
        self.record.replace(None);
    }
}

impl RebootInfoStore for MemRebootInfo {
    fn load(&self) -> Option<RebootInfoRecord> {
        *self.record.borrow()
    }

    fn store(&self, record: &RebootInfoRecord) {
        self.record.replace(Some(*record));
    }
}
