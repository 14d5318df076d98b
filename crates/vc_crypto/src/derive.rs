//! Deterministic key derivation from a wallet-signed master seed.
//!
//! Seed chain:
//!   master_seed = SHA-256(wallet_signature)          wallet signs a fixed
//!                                                    app-wide message
//!   room_seed   = HKDF(master_seed, "e2e-room-key", channel_hash)
//!   scalar      = rejection-sampled from
//!                 HKDF(room_seed, "e2e-ecdh", "ecdh-p256-key" [|| ctr])
//!
//! The rejection loop appends a counter byte to the HKDF info and retries
//! until the candidate lands in [1, n-1], so the same (wallet, room) tuple
//! always yields the same P-256 key pair. The first candidate is accepted
//! with probability ≈ 1 - 2^-32; the loop bound is unreachable in practice.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::CryptoError, kdf, keys::EcdhKeyPair};

/// Wallet signatures are 65 bytes (r ‖ s ‖ v).
pub const WALLET_SIGNATURE_LEN: usize = 65;

const ROOM_KEY_SALT: &[u8] = b"e2e-room-key";
const ECDH_SALT: &[u8] = b"e2e-ecdh";
const ECDH_INFO: &[u8] = b"ecdh-p256-key";

/// 32-byte master seed. One per wallet, shared process-wide. The only key
/// material the host application may persist (as hex, keyed by address).
#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterSeed([u8; 32]);

impl MasterSeed {
    /// Derive the seed from a wallet signature over the fixed app message.
    pub fn from_wallet_signature(signature: &[u8]) -> Result<Self, CryptoError> {
        if signature.len() != WALLET_SIGNATURE_LEN {
            return Err(CryptoError::KeyDerivation(format!(
                "wallet signature must be {WALLET_SIGNATURE_LEN} bytes, got {}",
                signature.len()
            )));
        }
        Ok(Self(kdf::sha256(signature)))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::KeyDerivation(format!("bad seed hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyDerivation("seed must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive the deterministic per-room ECDH key pair for this seed.
pub fn derive_room_key_pair(
    seed: &MasterSeed,
    channel_hash: &[u8; 32],
) -> Result<EcdhKeyPair, CryptoError> {
    let mut room_seed = [0u8; 32];
    kdf::hkdf(seed.as_bytes(), ROOM_KEY_SALT, channel_hash, &mut room_seed)?;

    let mut info = ECDH_INFO.to_vec();
    for ctr in 0u8..=255 {
        info.truncate(ECDH_INFO.len());
        if ctr > 0 {
            info.push(ctr);
        }
        let mut candidate = [0u8; 32];
        kdf::hkdf(&room_seed, ECDH_SALT, &info, &mut candidate)?;
        let pair = EcdhKeyPair::from_scalar_bytes(&candidate);
        candidate.zeroize();
        if let Some(pair) = pair {
            room_seed.zeroize();
            return Ok(pair);
        }
    }
    room_seed.zeroize();
    Err(CryptoError::KeyDerivation(
        "scalar rejection sampling exhausted".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    fn seed() -> MasterSeed {
        MasterSeed::from_wallet_signature(&[0x42u8; WALLET_SIGNATURE_LEN]).unwrap()
    }

    #[test]
    fn seed_requires_65_byte_signature() {
        assert!(MasterSeed::from_wallet_signature(&[0u8; 64]).is_err());
        assert!(MasterSeed::from_wallet_signature(&[0u8; 65]).is_ok());
    }

    #[test]
    fn same_signature_same_seed() {
        let a = MasterSeed::from_wallet_signature(&[9u8; 65]).unwrap();
        let b = MasterSeed::from_wallet_signature(&[9u8; 65]).unwrap();
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn room_key_pair_is_deterministic() {
        let hash = kdf::channel_hash("room-1");
        let a = derive_room_key_pair(&seed(), &hash).unwrap();
        let b = derive_room_key_pair(&seed(), &hash).unwrap();
        assert_eq!(
            keys::public_key_b64(a.public()),
            keys::public_key_b64(b.public())
        );
    }

    #[test]
    fn distinct_rooms_distinct_keys() {
        let a = derive_room_key_pair(&seed(), &kdf::channel_hash("room-1")).unwrap();
        let b = derive_room_key_pair(&seed(), &kdf::channel_hash("room-2")).unwrap();
        assert_ne!(
            keys::public_key_b64(a.public()),
            keys::public_key_b64(b.public())
        );
    }

    #[test]
    fn distinct_wallets_distinct_keys() {
        let hash = kdf::channel_hash("room-1");
        let s2 = MasterSeed::from_wallet_signature(&[0x43u8; 65]).unwrap();
        let a = derive_room_key_pair(&seed(), &hash).unwrap();
        let b = derive_room_key_pair(&s2, &hash).unwrap();
        assert_ne!(
            keys::public_key_b64(a.public()),
            keys::public_key_b64(b.public())
        );
    }

    #[test]
    fn seed_hex_roundtrip() {
        let s = seed();
        let restored = MasterSeed::from_hex(&s.to_hex()).unwrap();
        assert_eq!(s.to_hex(), restored.to_hex());
    }
}
