/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Bootloader side of the firmware update subsystem: boot slot
    selection, installation into the execution region and the
    out-of-band recovery path.

--*/

#![cfg_attr(target_os = "none", no_std)]

mod boot_selector;
pub use boot_selector::*;
mod context;
pub use context::SystemContext;
pub mod installer;
pub use installer::InstallError;
mod platform;
pub use platform::BootPlatform;
pub mod recovery;
pub use recovery::{LedPattern, RecoveryChannel, RecoveryError, RecoveryRequest, StatusIndicator};
mod rom;
pub use rom::*;
