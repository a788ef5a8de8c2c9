// Licensed under the Apache-2.0 license

//! Copies validated images between partitions.
//!
//! Images never execute from the external slots. Booting a slot means
//! installing it into the internal `Active` region first; the copy is
//! re-validated and compared against its source before it may run. An
//! interrupted copy leaves `Active` invalid and is simply redone on the
//! next reset.

use fuota_storage::{FlashDrvError, FlashPartition};
use image_verifier::{ImageInfo, ImageVerifier, ValidationError};
use log::{info, warn};

/// Bytes moved per read/write step.
pub const COPY_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    #[error("source image invalid: {0}")]
    InvalidSource(ValidationError),
    #[error("image of {0} bytes does not fit the destination")]
    TooLarge(usize),
    #[error("installed copy invalid: {0}")]
    InvalidCopy(ValidationError),
    #[error("installed copy differs from its source")]
    Mismatch,
    #[error("flash access failed: {0}")]
    Flash(#[from] FlashDrvError),
}

/// Erases the sectors of `dst` covering `len` bytes, then copies the first
/// `len` bytes of `src` into it.
pub fn copy_image(
    src: &FlashPartition,
    dst: &FlashPartition,
    len: usize,
) -> Result<(), FlashDrvError> {
    if len > src.len() || len > dst.len() {
        return Err(FlashDrvError::SIZE);
    }
    dst.erase_prefix(len)?;
    let mut buf = [0u8; COPY_CHUNK_SIZE];
    let mut offset = 0;
    while offset < len {
        let chunk = core::cmp::min(COPY_CHUNK_SIZE, len - offset);
        src.read(offset, &mut buf[..chunk])?;
        dst.write(offset, &buf[..chunk])?;
        offset += chunk;
    }
    Ok(())
}

/// Makes `dst` hold a validated copy of the image in `src`.
///
/// Nothing is written when `dst` already holds the same valid image.
pub fn transfer_image(
    validator: &dyn ImageVerifier,
    src: &FlashPartition,
    dst: &FlashPartition,
) -> Result<ImageInfo, InstallError> {
    let source = validator
        .validate(src)
        .map_err(InstallError::InvalidSource)?;
    if source.total_len > dst.len() {
        return Err(InstallError::TooLarge(source.total_len));
    }

    if let Ok(existing) = validator.validate(dst) {
        if existing.same_image(&source) {
            info!(
                "[boot] {} already holds v{} from {}",
                dst.name(),
                source.version,
                src.name()
            );
            return Ok(existing);
        }
    }

    info!(
        "[boot] copying v{} ({} bytes) from {} to {}",
        source.version,
        source.total_len,
        src.name(),
        dst.name()
    );
    copy_image(src, dst, source.total_len)?;

    let copy = validator.validate(dst).map_err(InstallError::InvalidCopy)?;
    if !copy.same_image(&source) {
        warn!("[boot] {} does not match {} after copy", dst.name(), src.name());
        return Err(InstallError::Mismatch);
    }
    Ok(copy)
}

/// Installs the image of an update slot into the execution region.
pub fn install_image(
    validator: &dyn ImageVerifier,
    slot: &FlashPartition,
    active: &FlashPartition,
) -> Result<ImageInfo, InstallError> {
    transfer_image(validator, slot, active)
}

/// Re-seeds `slot_a` from the write-protected factory partition and installs
/// it. The factory image itself is never executed in place.
pub fn restore_factory(
    validator: &dyn ImageVerifier,
    factory: &FlashPartition,
    slot_a: &FlashPartition,
    active: &FlashPartition,
) -> Result<ImageInfo, InstallError> {
    let restored = transfer_image(validator, factory, slot_a)?;
    info!("[boot] factory image v{} restored to {}", restored.version, slot_a.name());
    install_image(validator, slot_a, active)
}
