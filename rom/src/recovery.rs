// Licensed under the Apache-2.0 license

//! Out-of-band image delivery for a device with nothing left to boot.
//!
//! The channel is passive: it only runs once the boot selector has reached
//! `RecoveryWait`. A host writes a raw image into `SlotA` at arbitrary
//! offsets, then signals completion. The image is validated and adopted,
//! and the device resets into the normal boot flow.

use crate::context::SystemContext;
use fuota_config::boot::{BootConfigError, SettingsFlags, UpdateSlot};
use fuota_storage::FlashDrvError;
use image_verifier::{ImageInfo, ValidationError};
use log::{error, info, warn};

/// Largest payload a single recovery write may carry.
pub const MAX_RECOVERY_CHUNK: usize = 256;

/// LED patterns the bootloader can signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// Slow blink: nothing bootable, waiting for an image.
    RecoveryWait,
    /// Fast blink: image data is arriving.
    Receiving,
    /// Double blink: the last delivered image was rejected.
    Rejected,
    /// Solid: image accepted, about to reset.
    Accepted,
}

pub trait StatusIndicator {
    fn show(&mut self, pattern: LedPattern);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryRequest {
    /// `len` bytes of image data, placed at the start of the receive buffer,
    /// belong at `offset` of the image.
    Write { offset: u32, len: usize },
    /// The host has sent the whole image.
    Complete,
}

/// Transport of the recovery channel (NFC, UART, ...).
pub trait RecoveryChannel {
    /// Blocks until the next request arrives. Data of a `Write` is copied
    /// into `buf`.
    fn receive(&mut self, buf: &mut [u8; MAX_RECOVERY_CHUNK]) -> RecoveryRequest;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("write of {len} bytes at {offset:#x} is outside the slot")]
    OutOfRange { offset: u32, len: usize },
    #[error("completion before any data")]
    NoData,
    #[error("delivered image invalid: {0}")]
    InvalidImage(ValidationError),
    #[error("flash access failed: {0}")]
    Flash(#[from] FlashDrvError),
    #[error("settings update failed: {0}")]
    Settings(#[from] BootConfigError),
}

/// Receives one image into `SlotA`.
pub struct RecoveryLoader<'c, 'a> {
    ctx: &'c mut SystemContext<'a>,
    erased: bool,
    received: usize,
}

impl<'c, 'a> RecoveryLoader<'c, 'a> {
    pub fn new(ctx: &'c mut SystemContext<'a>) -> Self {
        RecoveryLoader {
            ctx,
            erased: false,
            received: 0,
        }
    }

    /// Bytes accepted so far.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), RecoveryError> {
        let slot = &self.ctx.flash.slot_a;
        let end = offset as usize + data.len();
        if end > slot.len() {
            return Err(RecoveryError::OutOfRange {
                offset,
                len: data.len(),
            });
        }
        if !self.erased {
            info!("[boot] recovery: erasing {}", slot.name());
            slot.erase_all()?;
            self.erased = true;
        }
        slot.write(offset as usize, data)?;
        self.received += data.len();
        Ok(())
    }

    /// Validates the received image and makes `SlotA` the current slot.
    /// Any image version is accepted here; signatures are still enforced.
    pub fn complete(&mut self) -> Result<ImageInfo, RecoveryError> {
        if !self.erased {
            return Err(RecoveryError::NoData);
        }
        let info = self
            .ctx
            .validator
            .validate(&self.ctx.flash.slot_a)
            .map_err(RecoveryError::InvalidImage)?;

        let mut settings = self.ctx.settings.read_settings();
        settings.adopt(UpdateSlot::A);
        // The delivered image is not a fallback.
        settings.flags.remove(SettingsFlags::ROLLED_BACK);
        self.ctx.settings.write_settings(&settings)?;
        info!("[boot] recovery: adopted v{} in {}", info.version, self.ctx.flash.slot_a.name());
        Ok(info)
    }

    /// Starts over after a rejected image.
    pub fn reset(&mut self) {
        self.erased = false;
        self.received = 0;
    }
}

/// Serves the recovery channel until an image has been accepted.
pub fn run_recovery(
    ctx: &mut SystemContext,
    channel: &mut dyn RecoveryChannel,
    indicator: &mut dyn StatusIndicator,
) -> ImageInfo {
    error!("[boot] waiting for an image on the recovery channel");
    indicator.show(LedPattern::RecoveryWait);
    let mut loader = RecoveryLoader::new(ctx);
    let mut buf = [0u8; MAX_RECOVERY_CHUNK];
    loop {
        match channel.receive(&mut buf) {
            RecoveryRequest::Write { offset, len } => {
                if loader.received() == 0 {
                    indicator.show(LedPattern::Receiving);
                }
                let len = core::cmp::min(len, MAX_RECOVERY_CHUNK);
                if let Err(err) = loader.write(offset, &buf[..len]) {
                    warn!("[boot] recovery: write rejected: {}", err);
                }
            }
            RecoveryRequest::Complete => match loader.complete() {
                Ok(info) => {
                    indicator.show(LedPattern::Accepted);
                    return info;
                }
                Err(err) => {
                    warn!("[boot] recovery: {}", err);
                    indicator.show(LedPattern::Rejected);
                    loader.reset();
                }
            },
        }
    }
}
