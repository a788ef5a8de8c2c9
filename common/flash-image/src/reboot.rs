// Licensed under the Apache-2.0 license

use core::mem::offset_of;

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::crc32;

/// Written by the bootloader once it has analyzed the last reset.
pub const BL_MAGIC: u32 = 0xB007_10AD;
/// Written by the application once it is up and running.
pub const APP_MAGIC: u32 = 0xA995_7A27;
pub const REBOOT_INFO_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RebootCause {
    #[default]
    Unknown = 0,
    PowerOn = 1,
    ImageUpgrade = 2,
    HardFault = 3,
    UsageFault = 4,
    BusFault = 5,
    MemFault = 6,
    Watchdog = 7,
    SoftwareReset = 8,
    StackOverflow = 9,
}

impl RebootCause {
    /// Causes that count towards the consecutive fault limit.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            RebootCause::HardFault
                | RebootCause::UsageFault
                | RebootCause::BusFault
                | RebootCause::MemFault
                | RebootCause::Watchdog
                | RebootCause::StackOverflow
        )
    }
}

impl From<u8> for RebootCause {
    fn from(value: u8) -> Self {
        match value {
            1 => RebootCause::PowerOn,
            2 => RebootCause::ImageUpgrade,
            3 => RebootCause::HardFault,
            4 => RebootCause::UsageFault,
            5 => RebootCause::BusFault,
            6 => RebootCause::MemFault,
            7 => RebootCause::Watchdog,
            8 => RebootCause::SoftwareReset,
            9 => RebootCause::StackOverflow,
            _ => RebootCause::Unknown,
        }
    }
}

/// Diagnostic record kept in retained memory across resets.
///
/// Fault handlers fill `pending_cause`, `pc` and `lr` right before they reset
/// the core. The bootloader folds the pending cause and the hardware reset
/// flags into `last_cause` and clears `pending_cause` for the next run.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RebootInfoRecord {
    pub bl_magic: U32,
    pub app_magic: U32,
    pub reset_flags: U32,
    pub pc: U32,
    pub lr: U32,
    pub pending_cause: u8,
    pub last_cause: u8,
    pub fault_count: u8,
    pub reserved: [u8; 5],
    pub crc32: U32,
}

const _: () = assert!(core::mem::size_of::<RebootInfoRecord>() == REBOOT_INFO_SIZE);

impl RebootInfoRecord {
    pub fn compute_crc(&self) -> u32 {
        crc32(&self.as_bytes()[..offset_of!(RebootInfoRecord, crc32)])
    }

    pub fn seal(&mut self) {
        self.crc32 = self.compute_crc().into();
    }

    /// Retained RAM holds garbage after a cold power-on, so both the magic and
    /// the CRC have to match before anything in the record is trusted.
    pub fn is_valid(&self) -> bool {
        self.bl_magic.get() == BL_MAGIC && self.compute_crc() == self.crc32.get()
    }
}
