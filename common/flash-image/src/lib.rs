// Licensed under the Apache-2.0 license
#![cfg_attr(target_os = "none", no_std)]

//! On-flash binary formats shared by the bootloader, the application and the
//! host-side image tooling. All multi-byte fields are little-endian.

use core::fmt;
use core::mem::offset_of;

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

mod reboot;
mod settings;

pub use reboot::*;
pub use settings::*;

pub const IMAGE_MAGIC: u32 = 0xBEDA_BB1E;
pub const IMAGE_HEADER_VERSION: u16 = 0x0001;
pub const IMAGE_HEADER_SIZE: usize = 256;

/// Smallest `image_size` (header included) a slot may declare.
pub const MIN_IMAGE_SIZE: u32 = 1024;

/// Detached ECDSA P-384 signature (`r || s`) stored right after the image.
pub const SIGNATURE_SIZE: usize = 96;

/// CRC-32 (IEEE) as used by every record in this crate.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageType {
    Application = 1,
    Bootloader = 2,
    Factory = 3,
}

impl TryFrom<u8> for ImageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ImageType::Application),
            2 => Ok(ImageType::Bootloader),
            3 => Ok(ImageType::Factory),
            _ => Err(()),
        }
    }
}

/// Firmware version packed as `major.minor.patch.rc`, one byte each with the
/// major number in the most significant byte. Ordering is numeric on the
/// packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FirmwareVersion(pub u32);

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8, rc: u8) -> Self {
        FirmwareVersion(
            (major as u32) << 24 | (minor as u32) << 16 | (patch as u32) << 8 | rc as u32,
        )
    }

    pub fn major(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn minor(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn patch(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn rc(&self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-rc{}",
            self.major(),
            self.minor(),
            self.patch(),
            self.rc()
        )
    }
}

/// Fixed 256-byte header at offset 0 of every image slot.
///
/// `image_size` counts the header and the payload. `data_crc32` covers the
/// payload only (`image_size - IMAGE_HEADER_SIZE` bytes following the
/// header) and `header_crc32` covers every byte that precedes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ImageHeader {
    pub magic: U32,
    pub length: U16,
    pub version: U16,
    pub fw_version: U32,
    pub build_id: U32,
    pub image_size: U32,
    pub data_crc32: U32,
    pub image_type: u8,
    pub reserved: [u8; 227],
    pub header_crc32: U32,
}

const _: () = assert!(core::mem::size_of::<ImageHeader>() == IMAGE_HEADER_SIZE);

impl ImageHeader {
    /// Builds a sealed header for a payload of `payload_len` bytes.
    pub fn new(
        image_type: ImageType,
        fw_version: FirmwareVersion,
        build_id: u32,
        payload_len: u32,
        data_crc32: u32,
    ) -> Self {
        let mut header = ImageHeader {
            magic: IMAGE_MAGIC.into(),
            length: (IMAGE_HEADER_SIZE as u16).into(),
            version: IMAGE_HEADER_VERSION.into(),
            fw_version: fw_version.0.into(),
            build_id: build_id.into(),
            image_size: (IMAGE_HEADER_SIZE as u32 + payload_len).into(),
            data_crc32: data_crc32.into(),
            image_type: image_type as u8,
            reserved: [0u8; 227],
            header_crc32: U32::new(0),
        };
        header.seal();
        header
    }

    pub fn compute_header_crc(&self) -> u32 {
        crc32(&self.as_bytes()[..offset_of!(ImageHeader, header_crc32)])
    }

    /// Recomputes `header_crc32` after a field has been changed.
    pub fn seal(&mut self) {
        self.header_crc32 = self.compute_header_crc().into();
    }

    pub fn header_crc_valid(&self) -> bool {
        self.compute_header_crc() == self.header_crc32.get()
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        FirmwareVersion(self.fw_version.get())
    }

    pub fn payload_len(&self) -> u32 {
        self.image_size
            .get()
            .saturating_sub(IMAGE_HEADER_SIZE as u32)
    }
}
