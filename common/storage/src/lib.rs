// Licensed under the Apache-2.0 license

//! Flash access and the small persistent records built on top of it: the
//! wear-leveled update settings and the reboot diagnostics.

#![cfg_attr(target_os = "none", no_std)]

pub mod hil;
pub use hil::{FlashDrvError, FlashStorage};
mod partition;
pub use partition::*;
pub mod reboot;
pub use reboot::{RebootInfo, RebootInfoStore, RebootTracker, ResetFlags};
mod settings_store;
pub use settings_store::SettingsStore;

#[cfg(any(test, feature = "emulated"))]
pub mod emulated;
