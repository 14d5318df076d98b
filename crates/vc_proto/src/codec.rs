//! Plaintext padding.
//!
//! Chat payloads are padded to fixed-size buckets before AEAD encryption
//! so the relay sees uniform ciphertext lengths instead of per-message
//! sizes. Media chunks are already fixed-size and skip this.
//!
//! Format: [original_len: u32 LE] [plaintext] [random padding]

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUCKET_SIZES: &[usize] = &[256, 512, 1024, 4096, 16384, 65536];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid padding: {0}")]
    InvalidPadding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMode {
    /// Length prefix only.
    None,
    /// Pad to the next fixed bucket boundary (default).
    Buckets,
}

impl Default for PaddingMode {
    fn default() -> Self {
        Self::Buckets
    }
}

/// Pad plaintext for encryption. Payloads beyond the largest bucket get a
/// length prefix but no fill.
pub fn pad(plaintext: &[u8], mode: PaddingMode) -> Vec<u8> {
    let prefixed_len = 4 + plaintext.len();
    let target = match mode {
        PaddingMode::None => prefixed_len,
        PaddingMode::Buckets => BUCKET_SIZES
            .iter()
            .copied()
            .find(|&bucket| bucket >= prefixed_len)
            .unwrap_or(prefixed_len),
    };

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(plaintext);
    if target > out.len() {
        // Random fill, not zeros — uniform against compression probes.
        let mut fill = vec![0u8; target - out.len()];
        rand::rngs::OsRng.fill_bytes(&mut fill);
        out.extend_from_slice(&fill);
    }
    out
}

/// Strip padding after decryption.
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, CodecError> {
    if padded.len() < 4 {
        return Err(CodecError::InvalidPadding("too short for length prefix".into()));
    }
    let len = u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    if 4 + len > padded.len() {
        return Err(CodecError::InvalidPadding(format!(
            "length prefix {len} exceeds padded size {}",
            padded.len()
        )));
    }
    Ok(padded[4..4 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_smallest_bucket() {
        let padded = pad(b"gm", PaddingMode::Buckets);
        assert_eq!(padded.len(), 256);
        assert_eq!(unpad(&padded).unwrap(), b"gm");
    }

    #[test]
    fn larger_payload_next_bucket() {
        let msg = vec![0x42u8; 5000];
        let padded = pad(&msg, PaddingMode::Buckets);
        assert_eq!(padded.len(), 16384);
        assert_eq!(unpad(&padded).unwrap(), msg);
    }

    #[test]
    fn oversized_payload_gets_prefix_only() {
        let msg = vec![7u8; 70_000];
        let padded = pad(&msg, PaddingMode::Buckets);
        assert_eq!(padded.len(), 4 + msg.len());
        assert_eq!(unpad(&padded).unwrap(), msg);
    }

    #[test]
    fn no_padding_mode() {
        let padded = pad(b"plain", PaddingMode::None);
        assert_eq!(padded.len(), 9);
        assert_eq!(unpad(&padded).unwrap(), b"plain");
    }

    #[test]
    fn corrupt_prefix_rejected() {
        assert!(unpad(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 2]).is_err());
        assert!(unpad(&[1, 0]).is_err());
    }
}
