// Licensed under the Apache-2.0 license

//! Wear-leveled store for the update settings record.
//!
//! The region is split into 256-byte record slots that are written strictly
//! in sequence and never overwritten in place. Before the first slot of an
//! erase sector is reused, that sector is erased, so with two or more sectors
//! the newest valid record always survives a power cut.

use flash_image::{SettingsRecord, SETTINGS_RECORD_SIZE};
use fuota_config::boot::{
    BootConfig, BootConfigError, SettingsFlags, UpdateSettings, UpdateSlot,
};
use log::{debug, error, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::partition::FlashPartition;

pub struct SettingsStore<'a> {
    partition: FlashPartition<'a>,
    slots: usize,
    next_index: usize,
    last_counter: u32,
}

impl<'a> SettingsStore<'a> {
    pub fn new(partition: FlashPartition<'a>) -> Self {
        let slots = partition.len() / SETTINGS_RECORD_SIZE;
        if partition.len() / partition.erase_size().max(1) < 2 {
            warn!(
                "[settings] {} spans a single erase sector, wrap-around is not power safe",
                partition.name()
            );
        }
        let mut store = SettingsStore {
            partition,
            slots,
            next_index: 0,
            last_counter: 0,
        };
        if let Some((index, record)) = store.newest_record() {
            store.next_index = (index + 1) % slots;
            store.last_counter = record.write_counter.get();
        }
        store
    }

    fn read_record(&self, index: usize) -> Option<SettingsRecord> {
        let mut buf = [0u8; SETTINGS_RECORD_SIZE];
        self.partition
            .read(index * SETTINGS_RECORD_SIZE, &mut buf)
            .ok()?;
        let record = SettingsRecord::read_from_bytes(&buf[..]).ok()?;
        if record.is_valid() && decode(&record).is_some() {
            Some(record)
        } else {
            None
        }
    }

    /// Scans from the highest-offset slot backward and returns the valid
    /// record with the highest write counter.
    fn newest_record(&self) -> Option<(usize, SettingsRecord)> {
        let mut newest: Option<(usize, SettingsRecord)> = None;
        for index in (0..self.slots).rev() {
            if let Some(record) = self.read_record(index) {
                let newer = match &newest {
                    Some((_, best)) => record.write_counter.get() > best.write_counter.get(),
                    None => true,
                };
                if newer {
                    newest = Some((index, record));
                }
            }
        }
        newest
    }

    /// Makes the slot at `next_index` writable. Garbage left by an interrupted
    /// write in the middle of a sector is skipped; a used sector is erased
    /// when writing reaches its first slot.
    fn prepare_slot(&mut self) -> Result<usize, BootConfigError> {
        let sector = self.partition.erase_size();
        for _ in 0..self.slots {
            let index = self.next_index;
            let offset = index * SETTINGS_RECORD_SIZE;
            if self.partition.is_erased(offset, SETTINGS_RECORD_SIZE).map_err(storage_error)? {
                return Ok(index);
            }
            if offset % sector == 0 {
                debug!("[settings] erasing sector at {:#x}", offset);
                self.partition.erase(offset, sector).map_err(storage_error)?;
                return Ok(index);
            }
            self.next_index = (index + 1) % self.slots;
        }
        Err(BootConfigError::StorageError)
    }
}

fn storage_error(err: crate::hil::FlashDrvError) -> BootConfigError {
    error!("[settings] flash access failed: {:?}", err);
    BootConfigError::StorageError
}

fn decode(record: &SettingsRecord) -> Option<UpdateSettings> {
    Some(UpdateSettings {
        current_slot: UpdateSlot::try_from(record.current_slot).ok()?,
        next_slot: UpdateSlot::try_from(record.next_slot).ok()?,
        boot_attempt_count: record.boot_attempt_count,
        flags: SettingsFlags::from_bits_truncate(record.flags.get()),
    })
}

impl BootConfig for SettingsStore<'_> {
    fn read_settings(&self) -> UpdateSettings {
        match self.newest_record().and_then(|(_, record)| decode(&record)) {
            Some(settings) => settings,
            None => {
                debug!("[settings] no valid record, using defaults");
                UpdateSettings::default()
            }
        }
    }

    fn write_settings(&mut self, settings: &UpdateSettings) -> Result<(), BootConfigError> {
        if self.slots == 0 {
            return Err(BootConfigError::StorageError);
        }
        if let Some((_, current)) = self.newest_record() {
            if decode(&current).as_ref() == Some(settings) {
                return Ok(());
            }
        }

        let counter = self.last_counter.wrapping_add(1);
        let record = SettingsRecord::new(
            settings.current_slot as u8,
            settings.next_slot as u8,
            settings.boot_attempt_count,
            settings.flags.bits(),
            counter,
        );

        let index = self.prepare_slot()?;
        let offset = index * SETTINGS_RECORD_SIZE;
        self.next_index = (index + 1) % self.slots;
        self.partition
            .write(offset, record.as_bytes())
            .map_err(storage_error)?;

        let mut readback = [0u8; SETTINGS_RECORD_SIZE];
        self.partition
            .read(offset, &mut readback)
            .map_err(storage_error)?;
        if readback[..] != *record.as_bytes() {
            error!("[settings] record at {:#x} did not read back", offset);
            return Err(BootConfigError::WriteFailed);
        }

        self.last_counter = counter;
        debug!(
            "[settings] #{} at slot {}: current={:?} next={:?} attempts={} flags={:?}",
            counter,
            index,
            settings.current_slot,
            settings.next_slot,
            settings.boot_attempt_count,
            settings.flags
        );
        Ok(())
    }

    fn erase_settings(&mut self) -> Result<(), BootConfigError> {
        warn!("[settings] erasing all records");
        self.partition.erase_all().map_err(storage_error)?;
        self.next_index = 0;
        self.last_counter = 0;
        Ok(())
    }
}
