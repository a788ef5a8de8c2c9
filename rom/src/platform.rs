// Licensed under the Apache-2.0 license

use fuota_storage::ResetFlags;
use image_verifier::ImageInfo;

/// Board hooks the bootloader cannot express in portable code.
pub trait BootPlatform {
    /// Reads and clears the reset controller's latched flags.
    fn take_reset_flags(&mut self) -> ResetFlags;

    /// Jumps to the image installed in the `Active` region.
    fn boot_active(&mut self, info: &ImageInfo) -> !;

    fn system_reset(&mut self) -> !;
}
