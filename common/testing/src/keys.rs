// Licensed under the Apache-2.0 license

//! Fixed ECDSA P-384 key pair used to sign test images. Never use outside of
//! tests.

use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::SecretKey;

pub const TEST_SIGNING_KEY: [u8; 48] = [
    0x3c, 0x21, 0x9d, 0x4f, 0x6a, 0x11, 0x87, 0xe2, 0x5b, 0x90, 0x0d, 0x73, 0xc4, 0x28, 0xaf, 0x16,
    0x47, 0xe9, 0x32, 0x8b, 0x5d, 0xf0, 0x61, 0x0a, 0x9e, 0x34, 0xb7, 0x2c, 0x88, 0x13, 0x6d, 0xd5,
    0x0f, 0x79, 0xa2, 0x4e, 0xc1, 0x35, 0x6b, 0x97, 0x2a, 0xe4, 0x58, 0x0c, 0xb3, 0x71, 0x1f, 0x66,
];

pub fn signing_key() -> SigningKey {
    let secret = SecretKey::from_slice(&TEST_SIGNING_KEY).expect("valid P-384 scalar");
    SigningKey::from(secret)
}

/// Uncompressed SEC1 encoding of the public half, as embedded in a
/// bootloader build.
pub fn verifying_key_sec1() -> Vec<u8> {
    let secret = SecretKey::from_slice(&TEST_SIGNING_KEY).expect("valid P-384 scalar");
    secret
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

/// Signs a SHA-384 digest and returns `r || s`.
pub fn sign_digest(digest: &[u8; 48]) -> [u8; 96] {
    let signature: Signature = signing_key()
        .sign_prehash(digest)
        .expect("prehash of the curve size");
    let mut out = [0u8; 96];
    out.copy_from_slice(&signature.to_bytes());
    out
}
