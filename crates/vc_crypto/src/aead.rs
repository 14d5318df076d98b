//! Authenticated Encryption with Associated Data
//!
//! AES-256-GCM. Key: 32 bytes. IV: 12 bytes, random per call. Tag: 16
//! bytes, appended to the ciphertext.
//!
//! The IV travels as its own wire field next to the ciphertext, so both
//! helpers work with a detached IV rather than a prefixed one.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const IV_LEN: usize = 12;

/// Encrypt `plaintext` under a 32-byte key with a fresh random IV.
/// Returns (ciphertext with appended tag, IV).
pub fn encrypt(
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; IV_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce);
    Ok((ciphertext, iv))
}

/// Decrypt with a detached IV. Any tag mismatch, truncated input, or
/// malformed IV surfaces as `AuthenticationFailure`.
pub fn decrypt(
    key: &[u8; 32],
    ciphertext: &[u8],
    iv: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    Ok(Zeroizing::new(plaintext))
}
