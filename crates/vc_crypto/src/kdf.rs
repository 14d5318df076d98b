//! Key derivation functions
//!
//! `hkdf` — HKDF-SHA256 (RFC 5869), used everywhere key material is
//!   stretched: room seeds, X3DH root keys, DH ratchet steps, sender-key
//!   wrapping keys.
//!
//! `hmac_byte` — HMAC-SHA256 over a single constant byte, the symmetric
//!   ratchet primitive (chain key → next chain key / message key).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Expand `ikm` through HKDF-SHA256 into `output.len()` bytes.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// HMAC-SHA256 of a single constant byte under a 32-byte key.
pub fn hmac_byte(key: &[u8; 32], label: u8) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(&[label]);
    mac.finalize().into_bytes().into()
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Channel hash: SHA-256 of the room name. HKDF `info` input when deriving
/// the per-room key pair.
pub fn channel_hash(room: &str) -> [u8; 32] {
    sha256(room.as_bytes())
}
