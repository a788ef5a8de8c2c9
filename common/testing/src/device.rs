// Licensed under the Apache-2.0 license

use flash_image::RebootCause;
use fuota_config::boot::{BootConfig, PartitionId, UpdateSettings};
use fuota_config::{FlashDevice, FlashLayout, PartitionRegion};
use fuota_storage::emulated::{MemFlash, MemRebootInfo};
use fuota_storage::{FlashMap, RebootTracker, SettingsStore};

/// Simulated device: internal flash, external flash and the retained RAM
/// section, laid out per `layout`. Contents persist across "reboots" for as
/// long as the value lives.
pub struct TestDevice {
    pub layout: FlashLayout,
    pub internal: MemFlash,
    pub external: MemFlash,
    pub reboot_ram: MemRebootInfo,
}

impl Default for TestDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDevice {
    pub fn new() -> Self {
        Self::with_layout(FlashLayout::default())
    }

    pub fn with_layout(layout: FlashLayout) -> Self {
        layout.validate().expect("valid flash layout");
        let sector = layout.sector_size as usize;
        TestDevice {
            internal: MemFlash::new(round_up(layout.internal_capacity() as usize, sector), sector),
            external: MemFlash::new(round_up(layout.external_capacity() as usize, sector), sector),
            reboot_ram: MemRebootInfo::new(),
            layout,
        }
    }

    pub fn flash_map(&self) -> FlashMap<'_> {
        FlashMap::new(&self.internal, &self.external, &self.layout).expect("layout fits flash")
    }

    pub fn settings_store(&self) -> SettingsStore<'_> {
        SettingsStore::new(self.flash_map().settings)
    }

    pub fn settings(&self) -> UpdateSettings {
        self.settings_store().read_settings()
    }

    pub fn write_settings(&self, settings: &UpdateSettings) {
        self.settings_store()
            .write_settings(settings)
            .expect("settings write");
    }

    pub fn reboot_tracker(&self) -> RebootTracker<'_> {
        RebootTracker::new(&self.reboot_ram)
    }

    /// Leaves a fault record behind, as the fault handler would before
    /// resetting the core.
    pub fn inject_fault(&self, cause: RebootCause) {
        self.reboot_tracker().record_fault(cause, 0x0800_0400, 0x0800_0200);
    }

    pub fn region(&self, id: PartitionId) -> PartitionRegion {
        match id {
            PartitionId::Factory => self.layout.factory,
            PartitionId::SlotA => self.layout.slot_a,
            PartitionId::SlotB => self.layout.slot_b,
            PartitionId::Active => self.layout.active,
        }
    }

    pub fn flash(&self, device: FlashDevice) -> &MemFlash {
        match device {
            FlashDevice::Internal => &self.internal,
            FlashDevice::External => &self.external,
        }
    }

    /// Provisions `image` at the start of partition `id` and blanks the rest
    /// of it. Bypasses write protection, like a production programmer.
    pub fn program(&self, id: PartitionId, image: &[u8]) {
        let region = self.region(id);
        assert!(image.len() <= region.size as usize, "image larger than {:?}", id);
        let flash = self.flash(region.device);
        flash.load(region.offset as usize, &vec![0xFF; region.size as usize]);
        flash.load(region.offset as usize, image);
    }

    /// Blanks partition `id`.
    pub fn wipe(&self, id: PartitionId) {
        self.program(id, &[]);
    }

    /// Flips bits of one byte inside partition `id`.
    pub fn corrupt(&self, id: PartitionId, offset: usize, xor: u8) {
        let region = self.region(id);
        self.flash(region.device)
            .corrupt(region.offset as usize + offset, xor);
    }

    pub fn read_partition(&self, id: PartitionId, len: usize) -> Vec<u8> {
        let region = self.region(id);
        self.flash(region.device).snapshot(region.offset as usize, len)
    }

    /// Cuts power on both flash parts after `bytes` programmed bytes each.
    pub fn cut_power_after(&self, bytes: usize) {
        self.internal.cut_power_after(bytes);
        self.external.cut_power_after(bytes);
    }

    /// Power cycle: flash keeps its contents, retained RAM is lost.
    pub fn power_cycle(&self) {
        self.internal.power_cycle();
        self.external.power_cycle();
        self.reboot_ram.power_loss();
    }
}

fn round_up(len: usize, sector: usize) -> usize {
    len.div_ceil(sector) * sector
}
