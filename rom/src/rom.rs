/*++

Licensed under the Apache-2.0 license.

File Name:

    rom.rs

Abstract:

    Bootloader entry: analyzes the reset, selects and installs an image,
    then jumps to it or serves the recovery channel.

--*/

use crate::boot_selector::{select_boot_target, BootTarget};
use crate::context::SystemContext;
use crate::platform::BootPlatform;
use crate::recovery::{run_recovery, RecoveryChannel, StatusIndicator};
use fuota_config::boot::BootConfig;
use fuota_storage::{FlashMap, RebootInfoStore};
use image_verifier::ImageVerifier;
use log::info;

/// Board-specific resources handed to the bootloader by its `main`.
pub struct RomParameters<'a> {
    pub flash: &'a FlashMap<'a>,
    pub settings: &'a mut dyn BootConfig,
    /// Configured with the embedded public key when images are signed.
    pub validator: &'a dyn ImageVerifier,
    pub reboot_store: &'a dyn RebootInfoStore,
    pub recovery_channel: &'a mut dyn RecoveryChannel,
    pub indicator: &'a mut dyn StatusIndicator,
}

pub fn rom_start(params: RomParameters, platform: &mut dyn BootPlatform) -> ! {
    info!("[boot] Hello from bootloader");

    let reset_flags = platform.take_reset_flags();
    let mut ctx = SystemContext::new(
        params.flash,
        params.settings,
        params.validator,
        params.reboot_store,
        reset_flags,
    );

    let decision = select_boot_target(&mut ctx);
    match decision.target {
        BootTarget::Slot { partition, info } => {
            info!(
                "[boot] booting v{} build {:#x} from {}",
                info.version,
                info.build_id,
                partition.name()
            );
            platform.boot_active(&info)
        }
        BootTarget::ActiveDirect(info) => platform.boot_active(&info),
        BootTarget::RecoveryWait => {
            let info = run_recovery(&mut ctx, params.recovery_channel, params.indicator);
            info!("[boot] recovery image v{} accepted, resetting", info.version);
            platform.system_reset()
        }
    }
}
