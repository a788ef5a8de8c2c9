// Licensed under the Apache-2.0 license

#![cfg_attr(target_os = "none", no_std)]

pub mod boot;

use core::time::Duration;

/// Consecutive unacknowledged boots tolerated before falling back to the
/// previous slot.
pub const MAX_BOOT_ATTEMPTS: u8 = 3;

/// Consecutive fault-caused resets inside one testing window that escalate a
/// second failure straight to the factory image.
pub const FAULT_RESET_LIMIT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashDevice {
    /// Small on-chip flash holding the bootloader and the execution copy.
    Internal,
    /// Large serial flash holding the update slots and control records.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRegion {
    pub device: FlashDevice,
    pub offset: u32,
    pub size: u32,
}

impl PartitionRegion {
    pub const fn internal(offset: u32, size: u32) -> Self {
        PartitionRegion {
            device: FlashDevice::Internal,
            offset,
            size,
        }
    }

    pub const fn external(offset: u32, size: u32) -> Self {
        PartitionRegion {
            device: FlashDevice::External,
            offset,
            size,
        }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    fn overlaps(&self, other: &PartitionRegion) -> bool {
        self.device == other.device && self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("partition {0} is not aligned to the erase sector size")]
    Unaligned(&'static str),
    #[error("partition {0} overlaps partition {1}")]
    Overlap(&'static str, &'static str),
    #[error("partition {0} is empty")]
    Empty(&'static str),
}

/// Partition map of both flash devices.
///
/// These are the defaults that can be overridden and provided to the
/// bootloader and application builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    /// Erase granularity shared by every partition boundary.
    pub sector_size: u32,
    pub bootloader: PartitionRegion,
    pub active: PartitionRegion,
    pub factory: PartitionRegion,
    pub slot_a: PartitionRegion,
    pub slot_b: PartitionRegion,
    pub settings: PartitionRegion,
    pub frag_session: PartitionRegion,
    pub frag_scratch: PartitionRegion,
}

impl Default for FlashLayout {
    fn default() -> Self {
        FlashLayout {
            sector_size: 4 * 1024,
            bootloader: PartitionRegion::internal(0x0000_0000, 40 * 1024),
            active: PartitionRegion::internal(0x0000_A000, 208 * 1024),
            factory: PartitionRegion::external(0x0000_0000, 216 * 1024),
            slot_a: PartitionRegion::external(0x0003_6000, 216 * 1024),
            slot_b: PartitionRegion::external(0x0006_C000, 216 * 1024),
            settings: PartitionRegion::external(0x000A_2000, 8 * 1024),
            frag_session: PartitionRegion::external(0x000A_4000, 8 * 1024),
            frag_scratch: PartitionRegion::external(0x000A_6000, 128 * 1024),
        }
    }
}

impl FlashLayout {
    /// Smallest internal and external flash sizes that hold this layout.
    pub fn internal_capacity(&self) -> u32 {
        self.regions()
            .iter()
            .filter(|(_, r)| r.device == FlashDevice::Internal)
            .map(|(_, r)| r.end())
            .max()
            .unwrap_or(0)
    }

    pub fn external_capacity(&self) -> u32 {
        self.regions()
            .iter()
            .filter(|(_, r)| r.device == FlashDevice::External)
            .map(|(_, r)| r.end())
            .max()
            .unwrap_or(0)
    }

    pub fn regions(&self) -> [(&'static str, PartitionRegion); 8] {
        [
            ("bootloader", self.bootloader),
            ("active", self.active),
            ("factory", self.factory),
            ("slot_a", self.slot_a),
            ("slot_b", self.slot_b),
            ("settings", self.settings),
            ("frag_session", self.frag_session),
            ("frag_scratch", self.frag_scratch),
        ]
    }

    /// Checks that every partition is sector aligned and that no two
    /// partitions on the same device overlap.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let regions = self.regions();
        for (i, &(name, region)) in regions.iter().enumerate() {
            if region.size == 0 {
                return Err(LayoutError::Empty(name));
            }
            if region.offset % self.sector_size != 0 || region.size % self.sector_size != 0 {
                return Err(LayoutError::Unaligned(name));
            }
            for &(other_name, other) in regions.iter().skip(i + 1) {
                if region.overlaps(&other) {
                    return Err(LayoutError::Overlap(name, other_name));
                }
            }
        }
        Ok(())
    }
}

/// Application-side timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuotaTimings {
    /// A completed update reboots after a delay drawn uniformly from
    /// `reboot_delay_min..=reboot_delay_max`.
    pub reboot_delay_min: Duration,
    pub reboot_delay_max: Duration,
    /// Time new firmware must run before it acknowledges itself.
    pub stability_window: Duration,
    /// Fragment sessions without progress for this long are discarded.
    pub session_timeout: Duration,
}

impl Default for FuotaTimings {
    fn default() -> Self {
        FuotaTimings {
            reboot_delay_min: Duration::from_secs(10 * 60),
            reboot_delay_max: Duration::from_secs(30 * 60),
            stability_window: Duration::from_secs(10 * 60),
            session_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}
