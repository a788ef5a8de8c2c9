// Licensed under the Apache-2.0 license

use flash_image::{crc32, FirmwareVersion, ImageHeader, ImageType};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha384};
use zerocopy::IntoBytes;

use crate::keys;

/// Builds firmware images in the slot format: header, payload and, when
/// signed, the detached signature.
///
/// ```ignore
/// let image = ImageBuilder::new(FirmwareVersion::new(1, 2, 0, 0)).signed().build();
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    version: FirmwareVersion,
    image_type: ImageType,
    build_id: u32,
    payload_len: usize,
    seed: u64,
    signed: bool,
    header_only: bool,
}

impl ImageBuilder {
    pub fn new(version: FirmwareVersion) -> Self {
        ImageBuilder {
            version,
            image_type: ImageType::Application,
            build_id: version.0,
            payload_len: 2048,
            seed: version.0 as u64,
            signed: false,
            header_only: false,
        }
    }

    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn build_id(mut self, build_id: u32) -> Self {
        self.build_id = build_id;
        self
    }

    pub fn payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Payload bytes are pseudo-random; two builders with the same seed and
    /// length produce the same payload.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Emits the header alone. The header still describes `payload_len`
    /// bytes, which lets tests declare sizes no slot can hold.
    pub fn header_only(mut self) -> Self {
        self.header_only = true;
        self
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; self.payload_len];
        StdRng::seed_from_u64(self.seed).fill_bytes(&mut payload);
        payload
    }

    pub fn build(&self) -> Vec<u8> {
        let payload = self.payload();
        let header = ImageHeader::new(
            self.image_type,
            self.version,
            self.build_id,
            self.payload_len as u32,
            crc32(&payload),
        );
        let mut image = header.as_bytes().to_vec();
        if self.header_only {
            return image;
        }
        image.extend_from_slice(&payload);
        if self.signed {
            let mut digest = [0u8; 48];
            digest.copy_from_slice(&Sha384::digest(&image));
            image.extend_from_slice(&keys::sign_digest(&digest));
        }
        image
    }
}
