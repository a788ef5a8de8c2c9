// Licensed under the Apache-2.0 license

use bitflags::bitflags;

/// Persistent store of the update control record.
///
/// Reads never fail: an implementation that cannot find a valid record
/// returns `UpdateSettings::default()`.
pub trait BootConfig {
    /// Returns the newest valid settings record, or the compiled-in defaults.
    fn read_settings(&self) -> UpdateSettings;

    /// Appends a new settings record.
    ///
    /// # Arguments
    /// * `settings` - The settings that every later `read_settings` must return.
    fn write_settings(&mut self, settings: &UpdateSettings) -> Result<(), BootConfigError>;

    /// Drops every stored record (factory reset). Subsequent reads return the
    /// defaults until the next write.
    fn erase_settings(&mut self) -> Result<(), BootConfigError>;
}

/// Every flash partition a firmware image can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionId {
    Factory,
    SlotA,
    SlotB,
    Active,
}

impl PartitionId {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionId::Factory => "factory",
            PartitionId::SlotA => "slot_a",
            PartitionId::SlotB => "slot_b",
            PartitionId::Active => "active",
        }
    }
}

/// One of the two alternating update slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateSlot {
    A = 1,
    B = 2,
}

impl UpdateSlot {
    /// The other update slot.
    pub fn opposite(&self) -> UpdateSlot {
        match self {
            UpdateSlot::A => UpdateSlot::B,
            UpdateSlot::B => UpdateSlot::A,
        }
    }
}

impl core::convert::TryFrom<u8> for UpdateSlot {
    type Error = BootConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(UpdateSlot::A),
            2 => Ok(UpdateSlot::B),
            _ => Err(BootConfigError::InvalidSlot),
        }
    }
}

impl From<UpdateSlot> for PartitionId {
    fn from(slot: UpdateSlot) -> Self {
        match slot {
            UpdateSlot::A => PartitionId::SlotA,
            UpdateSlot::B => PartitionId::SlotB,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SettingsFlags: u16 {
        /// The running image survived its stability window.
        const ACKNOWLEDGED = 1 << 0;
        /// The bootloader fell back to the previous slot during the current
        /// testing window.
        const ROLLED_BACK = 1 << 1;
        /// The update slots were re-seeded from the factory image.
        const FACTORY_RESTORED = 1 << 2;
    }
}

/// Update control record as seen by the bootloader and the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSettings {
    pub current_slot: UpdateSlot,
    pub next_slot: UpdateSlot,
    pub boot_attempt_count: u8,
    pub flags: SettingsFlags,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        UpdateSettings {
            current_slot: UpdateSlot::A,
            next_slot: UpdateSlot::A,
            boot_attempt_count: 0,
            flags: SettingsFlags::empty(),
        }
    }
}

impl UpdateSettings {
    pub fn acknowledged(&self) -> bool {
        self.flags.contains(SettingsFlags::ACKNOWLEDGED)
    }

    pub fn update_pending(&self) -> bool {
        self.next_slot != self.current_slot
    }

    /// Makes `slot` the current and next slot and starts a fresh testing
    /// window.
    pub fn adopt(&mut self, slot: UpdateSlot) {
        self.current_slot = slot;
        self.next_slot = slot;
        self.boot_attempt_count = 0;
        self.flags.remove(SettingsFlags::ACKNOWLEDGED);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootConfigError {
    #[error("invalid update slot")]
    InvalidSlot,
    #[error("settings storage access failed")]
    StorageError,
    #[error("settings record did not read back")]
    WriteFailed,
}
