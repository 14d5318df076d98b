//! Sender Keys: per-sender symmetric ratchet for group rooms.
//!
//! Each member runs one KDF chain for its own outbound traffic and holds
//! one receive-side state per peer. Chain keys are distributed under
//! ECDH-sealed envelopes (one per recipient); a membership change discards
//! the chain and re-distributes a fresh one to the survivors.
//!
//! There is no DH ratchet here — post-compromise recovery for groups comes
//! from rekeying on membership change, not per-message DH.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use p256::PublicKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    aead, chain,
    error::CryptoError,
    kdf,
    keys::{self, EcdhKeyPair, Jwk},
};

pub use crate::chain::MAX_SKIP;

/// Cap on stored out-of-order message keys per sender chain.
pub const MAX_SKIPPED_PER_SENDER: usize = 1000;

const SHARED_SALT: &[u8] = b"e2e-shared";
const SHARED_INFO: &[u8] = b"aes-256-gcm";

// ── Wire types ───────────────────────────────────────────────────────────────

/// One sender-key ciphertext. Serialized inside the relay's `chat` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub sender_address: String,
    pub chain_index: u32,
    /// AES-GCM ciphertext with appended tag (base64).
    pub ciphertext: String,
    /// 96-bit IV (base64).
    pub iv: String,
}

/// A chain key sealed to one recipient's room public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSenderKey {
    pub from_address: String,
    pub for_public_key: Jwk,
    pub encrypted_chain_key: String,
    pub iv: String,
}

fn message_aad(sender: &str, index: u32) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "chainIndex": index,
        "senderAddress": sender,
    }))
    .unwrap_or_default()
}

fn distribution_aad(from: &str, to_lower: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "fromAddress": from,
        "peerAddress": to_lower,
    }))
    .unwrap_or_default()
}

/// ECDH + HKDF wrapping key shared between two room identities.
fn shared_wrap_key(mine: &EcdhKeyPair, theirs: &PublicKey) -> Result<[u8; 32], CryptoError> {
    let mut dh = mine.agree(theirs);
    let mut key = [0u8; 32];
    let derived = kdf::hkdf(&dh, SHARED_SALT, SHARED_INFO, &mut key);
    dh.zeroize();
    derived?;
    Ok(key)
}

// ── Sender chain state ───────────────────────────────────────────────────────

/// One sender's KDF chain, used both for our own outbound chain and for
/// each peer's inbound chain.
#[derive(Clone)]
pub struct SenderKeyState {
    sender_address: String,
    chain_key: [u8; 32],
    chain_index: u32,
    skipped: BTreeMap<u32, [u8; 32]>,
}

impl Drop for SenderKeyState {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for mk in self.skipped.values_mut() {
            mk.zeroize();
        }
    }
}

impl SenderKeyState {
    /// Fresh chain with a random 32-byte key, index 0.
    pub fn create(sender_address: &str) -> Self {
        let mut chain_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut chain_key);
        Self::from_chain_key(sender_address, chain_key)
    }

    pub fn from_chain_key(sender_address: &str, chain_key: [u8; 32]) -> Self {
        Self {
            sender_address: sender_address.to_lowercase(),
            chain_key,
            chain_index: 0,
            skipped: BTreeMap::new(),
        }
    }

    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    pub fn chain_index(&self) -> u32 {
        self.chain_index
    }

    /// Raw chain key at the current position, for sealing to a recipient.
    /// Only meaningful at index 0 — a mid-stream chain is rotated before
    /// distribution (the envelope carries no index).
    pub fn chain_key_bytes(&self) -> &[u8; 32] {
        &self.chain_key
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<GroupMessage, CryptoError> {
        let (next_ck, mut mk) = chain::step(&self.chain_key);
        let aad = message_aad(&self.sender_address, self.chain_index);
        let sealed = aead::encrypt(&mk, plaintext, &aad);
        mk.zeroize();
        let (ciphertext, iv) = sealed?;

        let msg = GroupMessage {
            sender_address: self.sender_address.clone(),
            chain_index: self.chain_index,
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        };

        self.chain_key.zeroize();
        self.chain_key = next_ck;
        self.chain_index += 1;
        Ok(msg)
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt a group message, tolerating out-of-order delivery within
    /// `MAX_SKIP`. State commits only after authentication succeeds.
    pub fn decrypt(
        &mut self,
        msg: &GroupMessage,
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptoError> {
        let ciphertext = STANDARD.decode(&msg.ciphertext)?;
        let iv = STANDARD.decode(&msg.iv)?;
        let aad = message_aad(&msg.sender_address, msg.chain_index);

        let mut staged = self.clone();

        if msg.chain_index < staged.chain_index {
            // Behind the chain: only a stored skipped key can decrypt it.
            let Some(mut mk) = staged.skipped.remove(&msg.chain_index) else {
                return Err(CryptoError::StaleMessage);
            };
            let opened = aead::decrypt(&mk, &ciphertext, &iv, &aad);
            mk.zeroize();
            let plaintext = opened?;
            *self = staged;
            return Ok(plaintext);
        }

        let (next_ck, mut mk, newly_skipped) =
            chain::ratchet_to_index(&staged.chain_key, staged.chain_index, msg.chain_index)?;
        let opened = aead::decrypt(&mk, &ciphertext, &iv, &aad);
        mk.zeroize();
        let plaintext = opened?;

        for (index, skipped_mk) in newly_skipped {
            staged.skipped.insert(index, skipped_mk);
        }
        while staged.skipped.len() > MAX_SKIPPED_PER_SENDER {
            let oldest = staged.skipped.keys().next().copied();
            match oldest {
                Some(index) => {
                    if let Some(mut dropped) = staged.skipped.remove(&index) {
                        dropped.zeroize();
                    }
                }
                None => break,
            }
        }
        staged.chain_key.zeroize();
        staged.chain_key = next_ck;
        staged.chain_index = msg.chain_index + 1;
        *self = staged;
        Ok(plaintext)
    }
}

// ── Distribution ─────────────────────────────────────────────────────────────

/// Seal our chain key to one recipient.
pub fn seal_chain_key(
    my_pair: &EcdhKeyPair,
    my_address: &str,
    recipient_address: &str,
    recipient_key: &PublicKey,
    chain_key: &[u8; 32],
) -> Result<SealedSenderKey, CryptoError> {
    let mut wrap = shared_wrap_key(my_pair, recipient_key)?;
    let aad = distribution_aad(my_address, &recipient_address.to_lowercase());
    let sealed = aead::encrypt(&wrap, chain_key, &aad);
    wrap.zeroize();
    let (ciphertext, iv) = sealed?;

    Ok(SealedSenderKey {
        from_address: my_address.to_string(),
        for_public_key: keys::export_public_jwk(recipient_key),
        encrypted_chain_key: STANDARD.encode(ciphertext),
        iv: STANDARD.encode(iv),
    })
}

/// Open a sealed chain key from a peer and initialise its inbound state.
/// Any failure to authenticate surfaces as `InvalidSenderKey`.
pub fn open_chain_key(
    my_pair: &EcdhKeyPair,
    my_address: &str,
    sender_key: &PublicKey,
    envelope: &SealedSenderKey,
) -> Result<SenderKeyState, CryptoError> {
    let ciphertext = STANDARD
        .decode(&envelope.encrypted_chain_key)
        .map_err(|_| CryptoError::InvalidSenderKey)?;
    let iv = STANDARD
        .decode(&envelope.iv)
        .map_err(|_| CryptoError::InvalidSenderKey)?;

    let mut wrap = shared_wrap_key(my_pair, sender_key)?;
    let aad = distribution_aad(&envelope.from_address, &my_address.to_lowercase());
    let opened = aead::decrypt(&wrap, &ciphertext, &iv, &aad);
    wrap.zeroize();
    let plaintext = opened.map_err(|_| CryptoError::InvalidSenderKey)?;

    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidSenderKey);
    }
    let mut chain_key = [0u8; 32];
    chain_key.copy_from_slice(&plaintext);
    Ok(SenderKeyState::from_chain_key(&envelope.from_address, chain_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_roundtrip() {
        let mut sender = SenderKeyState::create("0xAAA");
        let mut receiver =
            SenderKeyState::from_chain_key("0xaaa", *sender.chain_key_bytes());

        for i in 0..3u8 {
            let msg = sender.encrypt(&[i; 8]).unwrap();
            assert_eq!(&receiver.decrypt(&msg).unwrap()[..], &[i; 8]);
        }
        assert_eq!(receiver.chain_index(), 3);
    }

    #[test]
    fn out_of_order_uses_skipped_keys() {
        let mut sender = SenderKeyState::create("0xaaa");
        let mut receiver =
            SenderKeyState::from_chain_key("0xaaa", *sender.chain_key_bytes());

        let g1 = sender.encrypt(b"g1").unwrap();
        let g2 = sender.encrypt(b"g2").unwrap();
        let g3 = sender.encrypt(b"g3").unwrap();

        assert_eq!(&receiver.decrypt(&g3).unwrap()[..], b"g3");
        assert_eq!(&receiver.decrypt(&g1).unwrap()[..], b"g1");
        assert_eq!(&receiver.decrypt(&g2).unwrap()[..], b"g2");
    }

    #[test]
    fn replay_without_skipped_key_is_stale() {
        let mut sender = SenderKeyState::create("0xaaa");
        let mut receiver =
            SenderKeyState::from_chain_key("0xaaa", *sender.chain_key_bytes());

        let g1 = sender.encrypt(b"g1").unwrap();
        receiver.decrypt(&g1).unwrap();
        assert!(matches!(
            receiver.decrypt(&g1),
            Err(CryptoError::StaleMessage)
        ));
    }

    #[test]
    fn gap_beyond_window_overflows() {
        let mut sender = SenderKeyState::create("0xaaa");
        let mut receiver =
            SenderKeyState::from_chain_key("0xaaa", *sender.chain_key_bytes());

        for _ in 0..=MAX_SKIP {
            sender.encrypt(b"dropped").unwrap();
        }
        let far = sender.encrypt(b"far").unwrap();
        assert!(matches!(
            receiver.decrypt(&far),
            Err(CryptoError::SkipOverflow { .. })
        ));
        assert_eq!(receiver.chain_index(), 0);
    }

    #[test]
    fn sender_address_is_bound() {
        let mut sender = SenderKeyState::create("0xaaa");
        let mut receiver =
            SenderKeyState::from_chain_key("0xaaa", *sender.chain_key_bytes());

        let mut msg = sender.encrypt(b"hello").unwrap();
        msg.sender_address = "0xmallory".into();
        assert!(matches!(
            receiver.decrypt(&msg),
            Err(CryptoError::AuthenticationFailure)
        ));
        assert_eq!(receiver.chain_index(), 0);
    }

    #[test]
    fn seal_open_roundtrip() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();

        let mut alice_chain = SenderKeyState::create("0xaaa");
        let envelope = seal_chain_key(
            &alice,
            "0xaaa",
            "0xBBB",
            bob.public(),
            alice_chain.chain_key_bytes(),
        )
        .unwrap();

        let mut bob_view = open_chain_key(&bob, "0xBBB", alice.public(), &envelope).unwrap();
        let msg = alice_chain.encrypt(b"to the group").unwrap();
        assert_eq!(&bob_view.decrypt(&msg).unwrap()[..], b"to the group");
    }

    #[test]
    fn open_with_wrong_recipient_fails() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let carol = EcdhKeyPair::generate();

        let chain = SenderKeyState::create("0xaaa");
        let envelope =
            seal_chain_key(&alice, "0xaaa", "0xbbb", bob.public(), chain.chain_key_bytes())
                .unwrap();

        // Carol holds a different room key; the wrap key never matches.
        assert!(matches!(
            open_chain_key(&carol, "0xbbb", alice.public(), &envelope),
            Err(CryptoError::InvalidSenderKey)
        ));
    }

    #[test]
    fn recipient_address_is_bound() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();

        let chain = SenderKeyState::create("0xaaa");
        let envelope =
            seal_chain_key(&alice, "0xaaa", "0xbbb", bob.public(), chain.chain_key_bytes())
                .unwrap();

        // Bob's key but the wrong claimed recipient address.
        assert!(matches!(
            open_chain_key(&bob, "0xccc", alice.public(), &envelope),
            Err(CryptoError::InvalidSenderKey)
        ));
    }
}
