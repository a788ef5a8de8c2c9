// Licensed under the Apache-2.0 license

use fuota_config::boot::{BootConfig, UpdateSettings};
use fuota_storage::{FlashMap, RebootInfo, RebootInfoStore, RebootTracker, ResetFlags};
use image_verifier::ImageVerifier;
use log::error;

/// Everything the boot selector may touch during one reset, passed
/// explicitly instead of living in statics.
pub struct SystemContext<'a> {
    pub flash: &'a FlashMap<'a>,
    pub settings: &'a mut dyn BootConfig,
    pub validator: &'a dyn ImageVerifier,
    pub reboot: RebootTracker<'a>,
    /// Why the previous run ended, analyzed once at construction.
    pub reboot_info: RebootInfo,
}

impl<'a> SystemContext<'a> {
    pub fn new(
        flash: &'a FlashMap<'a>,
        settings: &'a mut dyn BootConfig,
        validator: &'a dyn ImageVerifier,
        reboot_store: &'a dyn RebootInfoStore,
        reset_flags: ResetFlags,
    ) -> Self {
        let reboot = RebootTracker::new(reboot_store);
        let reboot_info = reboot.analyze_reset(reset_flags);
        SystemContext {
            flash,
            settings,
            validator,
            reboot,
            reboot_info,
        }
    }

    /// Persists `settings`. A failed write is logged and otherwise ignored:
    /// booting a valid image matters more than recording the decision.
    pub fn persist(&mut self, settings: &UpdateSettings) -> bool {
        match self.settings.write_settings(settings) {
            Ok(()) => true,
            Err(err) => {
                error!("[boot] failed to persist settings: {}", err);
                false
            }
        }
    }
}
