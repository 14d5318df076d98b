//! Symmetric KDF chain (the "symmetric ratchet").
//!
//! One step, per the Signal Double Ratchet spec:
//!   CK'  = HMAC-SHA256(CK, 0x01)
//!   MK   = HMAC-SHA256(CK, 0x02)
//!
//! The input chain key is unreachable after a step — callers overwrite
//! their copy with CK' and the message key is used for exactly one AEAD
//! operation.

use zeroize::Zeroize;

use crate::{error::CryptoError, kdf};

/// Maximum number of skipped message keys derivable in one jump.
/// Bounds memory and stops DoS via huge counter gaps.
pub const MAX_SKIP: u32 = 100;

const CHAIN_LABEL: u8 = 0x01;
const MESSAGE_LABEL: u8 = 0x02;

/// Advance the chain one step: (next chain key, message key).
pub fn step(ck: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    (kdf::hmac_byte(ck, CHAIN_LABEL), kdf::hmac_byte(ck, MESSAGE_LABEL))
}

/// Advance from index `cur` to `target`, collecting the message key of
/// every index in between. Returns (chain key past `target`, message key
/// for `target`, skipped `(index, key)` pairs).
///
/// Fails with `SkipOverflow` before deriving anything when the gap exceeds
/// `MAX_SKIP`, so no state is consumed on the error path.
pub fn ratchet_to_index(
    ck: &[u8; 32],
    cur: u32,
    target: u32,
) -> Result<([u8; 32], [u8; 32], Vec<(u32, [u8; 32])>), CryptoError> {
    if target < cur {
        return Err(CryptoError::StaleMessage);
    }
    let gap = target - cur;
    if gap > MAX_SKIP {
        return Err(CryptoError::SkipOverflow { requested: gap, max: MAX_SKIP });
    }

    let mut ck = *ck;
    let mut skipped = Vec::with_capacity(gap as usize);
    for i in cur..target {
        let (next, mk) = step(&ck);
        ck = next;
        skipped.push((i, mk));
    }
    let (final_ck, mk) = step(&ck);
    ck.zeroize();
    Ok((final_ck, mk, skipped))
}
