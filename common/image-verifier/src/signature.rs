// Licensed under the Apache-2.0 license

use flash_image::SIGNATURE_SIZE;
use p384::ecdsa::signature::hazmat::PrehashVerifier;
use p384::ecdsa::{Signature, VerifyingKey};

pub const DIGEST_SIZE: usize = 48;

/// Checks a detached signature over the SHA-384 digest of header and payload.
pub trait SignatureVerifier {
    fn verify(&self, digest: &[u8; DIGEST_SIZE], signature: &[u8; SIGNATURE_SIZE]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid ECDSA P-384 public key")]
pub struct InvalidPublicKey;

/// ECDSA P-384 verifier around the public key embedded in the bootloader.
pub struct EcdsaP384Verifier {
    key: VerifyingKey,
}

impl EcdsaP384Verifier {
    /// # Arguments
    /// * `sec1` - SEC1 encoded public key, compressed or uncompressed.
    pub fn from_sec1(sec1: &[u8]) -> Result<Self, InvalidPublicKey> {
        let key = VerifyingKey::from_sec1_bytes(sec1).map_err(|_| InvalidPublicKey)?;
        Ok(EcdsaP384Verifier { key })
    }
}

impl SignatureVerifier for EcdsaP384Verifier {
    fn verify(&self, digest: &[u8; DIGEST_SIZE], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.key.verify_prehash(digest, &signature).is_ok()
    }
}
