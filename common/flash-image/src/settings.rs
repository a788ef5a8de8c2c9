// Licensed under the Apache-2.0 license

use core::mem::offset_of;

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::crc32;

pub const SETTINGS_MAGIC: u32 = 0xF005_BA11;
pub const SETTINGS_VERSION: u16 = 0x0001;
pub const SETTINGS_RECORD_SIZE: usize = 256;

/// One wear-leveling entry of the update settings region.
///
/// `write_counter` increases by one on every write so that the newest record
/// can be told apart from older ones once the region has wrapped around.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SettingsRecord {
    pub magic: U32,
    pub length: U16,
    pub version: U16,
    pub current_slot: u8,
    pub next_slot: u8,
    pub boot_attempt_count: u8,
    pub flags: U16,
    pub write_counter: U32,
    pub reserved: [u8; 235],
    pub crc32: U32,
}

const _: () = assert!(core::mem::size_of::<SettingsRecord>() == SETTINGS_RECORD_SIZE);

impl SettingsRecord {
    pub fn new(
        current_slot: u8,
        next_slot: u8,
        boot_attempt_count: u8,
        flags: u16,
        write_counter: u32,
    ) -> Self {
        let mut record = SettingsRecord {
            magic: SETTINGS_MAGIC.into(),
            length: (SETTINGS_RECORD_SIZE as u16).into(),
            version: SETTINGS_VERSION.into(),
            current_slot,
            next_slot,
            boot_attempt_count,
            flags: flags.into(),
            write_counter: write_counter.into(),
            reserved: [0u8; 235],
            crc32: U32::new(0),
        };
        record.crc32 = record.compute_crc().into();
        record
    }

    pub fn compute_crc(&self) -> u32 {
        crc32(&self.as_bytes()[..offset_of!(SettingsRecord, crc32)])
    }

    /// Magic, format and CRC checks. Field level checks (slot numbers) are
    /// left to the owner of the record.
    pub fn is_valid(&self) -> bool {
        self.magic.get() == SETTINGS_MAGIC
            && self.length.get() as usize == SETTINGS_RECORD_SIZE
            && self.version.get() == SETTINGS_VERSION
            && self.compute_crc() == self.crc32.get()
    }
}
