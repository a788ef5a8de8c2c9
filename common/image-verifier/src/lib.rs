// Licensed under the Apache-2.0 license

//! Structural and cryptographic validation of the firmware image in a slot.
//!
//! Validation runs in two stages. The 256-byte header is checked first
//! (magic, format, header CRC) so that garbage is rejected after a single
//! small read. Only then is the payload streamed through CRC-32, and through
//! SHA-384 when a signature key is configured, in fixed-size chunks.

#![cfg_attr(target_os = "none", no_std)]

mod signature;

pub use signature::*;

use flash_image::{
    FirmwareVersion, ImageHeader, ImageType, IMAGE_HEADER_SIZE, IMAGE_HEADER_VERSION,
    IMAGE_MAGIC, MIN_IMAGE_SIZE, SIGNATURE_SIZE,
};
use fuota_storage::{FlashDrvError, FlashPartition};
use log::{debug, warn};
use sha2::{Digest, Sha384};
use zerocopy::{FromBytes, IntoBytes};

/// Bytes read from flash per step of the payload digest.
pub const CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("bad image magic")]
    BadMagic,
    #[error("unsupported header format")]
    UnsupportedFormat,
    #[error("header CRC mismatch")]
    HeaderCrcMismatch,
    #[error("image size out of range")]
    SizeOutOfRange,
    #[error("image type not bootable")]
    WrongImageType,
    #[error("data CRC mismatch")]
    DataCrcMismatch,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("version {candidate} is older than {floor}")]
    VersionRollback {
        candidate: FirmwareVersion,
        floor: FirmwareVersion,
    },
    #[error("flash access failed: {0}")]
    Flash(#[from] FlashDrvError),
}

/// Summary of a validated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub version: FirmwareVersion,
    pub build_id: u32,
    pub image_type: ImageType,
    pub image_size: u32,
    pub data_crc32: u32,
    pub header_crc32: u32,
    /// Bytes the image occupies in its slot, detached signature included.
    pub total_len: usize,
}

impl ImageInfo {
    /// Two validated images with equal header and payload CRCs are the same
    /// image for installation purposes.
    pub fn same_image(&self, other: &ImageInfo) -> bool {
        self.header_crc32 == other.header_crc32
            && self.data_crc32 == other.data_crc32
            && self.image_size == other.image_size
    }
}

/// Validation as seen by the boot selector and the update scheduler.
pub trait ImageVerifier {
    /// Stage one only: reads and checks the header of `partition`.
    fn read_header(&self, partition: &FlashPartition) -> Result<ImageHeader, ValidationError>;

    /// Full validation of the image in `partition`. Repeated calls on an
    /// unchanged partition return the same result.
    fn validate(&self, partition: &FlashPartition) -> Result<ImageInfo, ValidationError>;

    /// Full validation plus the monotonic version policy: a candidate older
    /// than `floor` is rejected.
    fn validate_candidate(
        &self,
        partition: &FlashPartition,
        floor: Option<FirmwareVersion>,
    ) -> Result<ImageInfo, ValidationError> {
        let info = self.validate(partition)?;
        match floor {
            Some(floor) if info.version < floor => {
                warn!(
                    "[verifier] {}: version {} is older than running {}",
                    partition.name(),
                    info.version,
                    floor
                );
                Err(ValidationError::VersionRollback {
                    candidate: info.version,
                    floor,
                })
            }
            _ => Ok(info),
        }
    }
}

/// CRC validator with optional signature enforcement.
#[derive(Default)]
pub struct ImageValidator<'a> {
    signature: Option<&'a dyn SignatureVerifier>,
}

impl<'a> ImageValidator<'a> {
    /// A validator that checks CRCs only.
    pub fn new() -> Self {
        ImageValidator { signature: None }
    }

    /// A validator that also requires a valid detached signature.
    pub fn with_signature(verifier: &'a dyn SignatureVerifier) -> Self {
        ImageValidator {
            signature: Some(verifier),
        }
    }

    fn signature_len(&self) -> usize {
        if self.signature.is_some() {
            SIGNATURE_SIZE
        } else {
            0
        }
    }

    fn check_header(&self, partition: &FlashPartition) -> Result<ImageHeader, ValidationError> {
        let mut buf = [0u8; IMAGE_HEADER_SIZE];
        partition.read(0, &mut buf)?;
        let header =
            ImageHeader::read_from_bytes(&buf[..]).map_err(|_| ValidationError::UnsupportedFormat)?;

        if header.magic.get() != IMAGE_MAGIC {
            return Err(ValidationError::BadMagic);
        }
        if !header.header_crc_valid() {
            return Err(ValidationError::HeaderCrcMismatch);
        }
        if header.length.get() as usize != IMAGE_HEADER_SIZE
            || header.version.get() != IMAGE_HEADER_VERSION
        {
            return Err(ValidationError::UnsupportedFormat);
        }
        Ok(header)
    }

    fn check_image(&self, partition: &FlashPartition) -> Result<ImageInfo, ValidationError> {
        let header = self.check_header(partition)?;

        let image_size = header.image_size.get();
        let total_len = image_size as usize + self.signature_len();
        if image_size < MIN_IMAGE_SIZE || total_len > partition.len() {
            return Err(ValidationError::SizeOutOfRange);
        }
        let image_type = match ImageType::try_from(header.image_type) {
            Ok(ImageType::Bootloader) | Err(()) => return Err(ValidationError::WrongImageType),
            Ok(image_type) => image_type,
        };

        let mut crc = crc32fast::Hasher::new();
        let mut sha = self.signature.map(|_| {
            let mut sha = Sha384::new();
            sha.update(header.as_bytes());
            sha
        });
        let mut buf = [0u8; CHUNK_SIZE];
        let mut offset = IMAGE_HEADER_SIZE;
        let end = image_size as usize;
        while offset < end {
            let len = core::cmp::min(CHUNK_SIZE, end - offset);
            partition.read(offset, &mut buf[..len])?;
            crc.update(&buf[..len]);
            if let Some(sha) = sha.as_mut() {
                sha.update(&buf[..len]);
            }
            offset += len;
        }
        if crc.finalize() != header.data_crc32.get() {
            return Err(ValidationError::DataCrcMismatch);
        }

        if let (Some(verifier), Some(sha)) = (self.signature, sha) {
            let mut digest = [0u8; DIGEST_SIZE];
            digest.copy_from_slice(&sha.finalize());
            let mut signature = [0u8; SIGNATURE_SIZE];
            partition.read(end, &mut signature)?;
            if !verifier.verify(&digest, &signature) {
                return Err(ValidationError::SignatureInvalid);
            }
        }

        Ok(ImageInfo {
            version: header.firmware_version(),
            build_id: header.build_id.get(),
            image_type,
            image_size,
            data_crc32: header.data_crc32.get(),
            header_crc32: header.header_crc32.get(),
            total_len,
        })
    }
}

impl ImageVerifier for ImageValidator<'_> {
    fn read_header(&self, partition: &FlashPartition) -> Result<ImageHeader, ValidationError> {
        self.check_header(partition)
    }

    fn validate(&self, partition: &FlashPartition) -> Result<ImageInfo, ValidationError> {
        match self.check_image(partition) {
            Ok(info) => {
                debug!(
                    "[verifier] {}: {:?} v{} build {:#x}, {} bytes",
                    partition.name(),
                    info.image_type,
                    info.version,
                    info.build_id,
                    info.image_size
                );
                Ok(info)
            }
            Err(err) => {
                warn!("[verifier] {}: rejected: {}", partition.name(), err);
                Err(err)
            }
        }
    }
}
