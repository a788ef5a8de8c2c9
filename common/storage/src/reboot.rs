// Licensed under the Apache-2.0 license

//! Reboot cause tracking.
//!
//! Fault handlers and planned-reset paths leave a cause in retained memory
//! right before they reset the core; the bootloader combines it with the
//! hardware reset flags once per boot. The result is diagnostic data that
//! also feeds the factory escalation rule of the boot selector.

use bitflags::bitflags;
use flash_image::{RebootCause, RebootInfoRecord, BL_MAGIC};
use log::{info, warn};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::FromZeros;

bitflags! {
    /// Hardware reset reason flags as latched by the reset controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResetFlags: u32 {
        const POWER_ON = 1 << 0;
        const PIN = 1 << 1;
        const SOFTWARE = 1 << 2;
        const WATCHDOG = 1 << 3;
        const LOW_POWER = 1 << 4;
    }
}

/// Storage for the retained reboot record. Implementations live in a
/// `.noinit` RAM section on target and in `emulated::MemRebootInfo` on host.
pub trait RebootInfoStore {
    fn load(&self) -> Option<RebootInfoRecord>;
    fn store(&self, record: &RebootInfoRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebootInfo {
    pub cause: RebootCause,
    pub reset_flags: ResetFlags,
    pub pc: u32,
    pub lr: u32,
    /// Fault-caused resets in a row, the current one included.
    pub fault_count: u8,
}

pub struct RebootTracker<'a> {
    store: &'a dyn RebootInfoStore,
}

impl<'a> RebootTracker<'a> {
    pub fn new(store: &'a dyn RebootInfoStore) -> Self {
        RebootTracker { store }
    }

    fn valid_record(&self) -> Option<RebootInfoRecord> {
        self.store.load().filter(|record| record.is_valid())
    }

    fn record_or_fresh(&self) -> RebootInfoRecord {
        self.valid_record().unwrap_or_else(|| {
            let mut record = RebootInfoRecord::new_zeroed();
            record.bl_magic = BL_MAGIC.into();
            record
        })
    }

    /// Determines why the previous run ended. Called once per boot by the
    /// bootloader, which passes the reset flags it just read and cleared.
    pub fn analyze_reset(&self, flags: ResetFlags) -> RebootInfo {
        let previous = if flags.contains(ResetFlags::POWER_ON) {
            None
        } else {
            self.valid_record()
        };
        let pending = previous
            .map(|record| RebootCause::from(record.pending_cause))
            .unwrap_or_default();

        let cause = if flags.contains(ResetFlags::POWER_ON) {
            RebootCause::PowerOn
        } else if flags.contains(ResetFlags::WATCHDOG) {
            RebootCause::Watchdog
        } else if flags.contains(ResetFlags::SOFTWARE) {
            if pending == RebootCause::Unknown {
                RebootCause::SoftwareReset
            } else {
                pending
            }
        } else if previous.is_none() {
            // Retained memory did not survive, so this was a cold start.
            RebootCause::PowerOn
        } else {
            pending
        };

        let fault_count = if cause.is_fault() {
            previous
                .map(|record| record.fault_count)
                .unwrap_or(0)
                .saturating_add(1)
        } else {
            0
        };

        let mut record = previous.unwrap_or_else(RebootInfoRecord::new_zeroed);
        record.bl_magic = BL_MAGIC.into();
        record.app_magic = U32::new(0);
        record.reset_flags = flags.bits().into();
        record.pending_cause = RebootCause::Unknown as u8;
        record.last_cause = cause as u8;
        record.fault_count = fault_count;
        record.seal();
        self.store.store(&record);

        let info = RebootInfo {
            cause,
            reset_flags: flags,
            pc: record.pc.get(),
            lr: record.lr.get(),
            fault_count,
        };
        if cause.is_fault() {
            warn!(
                "[reboot] last reset: {:?} pc={:#010x} lr={:#010x}, {} in a row",
                cause, info.pc, info.lr, fault_count
            );
        } else {
            info!("[reboot] last reset: {:?} ({:?})", cause, flags);
        }
        info
    }

    /// Fault handler entry point: remembers the fault for the next boot.
    pub fn record_fault(&self, cause: RebootCause, pc: u32, lr: u32) {
        let mut record = self.record_or_fresh();
        record.pending_cause = cause as u8;
        record.pc = pc.into();
        record.lr = lr.into();
        record.seal();
        self.store.store(&record);
    }

    /// Remembers the reason for a deliberate reset, e.g. `ImageUpgrade`.
    pub fn record_reset_cause(&self, cause: RebootCause) {
        let mut record = self.record_or_fresh();
        record.pending_cause = cause as u8;
        record.seal();
        self.store.store(&record);
    }

    /// Marks the application as initialized.
    pub fn mark_app_started(&self) {
        let mut record = self.record_or_fresh();
        record.app_magic = flash_image::APP_MAGIC.into();
        record.seal();
        self.store.store(&record);
    }

    /// Ends a fault streak, e.g. once new firmware has been acknowledged.
    pub fn clear_fault_count(&self) {
        if let Some(mut record) = self.valid_record() {
            record.fault_count = 0;
            record.seal();
            self.store.store(&record);
        }
    }

    /// The analysis result of the current boot.
    pub fn last(&self) -> RebootInfo {
        match self.valid_record() {
            Some(record) => RebootInfo {
                cause: RebootCause::from(record.last_cause),
                reset_flags: ResetFlags::from_bits_truncate(record.reset_flags.get()),
                pc: record.pc.get(),
                lr: record.lr.get(),
                fault_count: record.fault_count,
            },
            None => RebootInfo::default(),
        }
    }
}
