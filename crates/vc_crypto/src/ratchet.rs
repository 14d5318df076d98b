//! Double Ratchet with DH ratchet steps.
//!
//! References:
//!   - Signal Double Ratchet spec: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation (non-negotiable):
//!   root_key — updated on every DH ratchet step
//!   send_ck  — sending chain key, updated per message
//!   recv_ck  — receiving chain key, updated per message
//!   MK       — message key, derived from a chain key, used once, deleted
//!
//! Every identity-bearing header field is bound to the ciphertext as AEAD
//! associated data; a mutated header fails authentication rather than
//! decrypting under the wrong position.
//!
//! Decryption is transactional: all derivations happen on a scratch copy
//! of the state and commit only after the AEAD tag verifies. A forged or
//! out-of-window frame therefore leaves the committed ratchet untouched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use p256::PublicKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    aead, chain,
    error::CryptoError,
    kdf,
    keys::{self, EcdhKeyPair, Jwk},
    x3dh::RootKey,
};

pub use crate::chain::MAX_SKIP;

/// Global cap on stored skipped message keys; oldest evicted beyond this.
pub const MAX_SKIPPED_TOTAL: usize = 1000;

/// Skipped keys older than this are discarded unconsumed.
pub const SKIP_TTL: Duration = Duration::from_secs(600);

const ROOT_SALT: &[u8] = b"dr-root";
const CHAIN_SALT: &[u8] = b"dr-chain";
const ROOT_INFO: &[u8] = b"root-key";
const CHAIN_INFO: &[u8] = b"chain-key";

// ── Wire message ─────────────────────────────────────────────────────────────

/// One ratcheted ciphertext plus the header the recipient needs to advance
/// its ratchet. Serialized inside the relay's `chat` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetMessage {
    pub sender: String,
    pub sender_dh_public_key: Jwk,
    pub previous_chain_length: u32,
    pub chain_index: u32,
    /// AES-GCM ciphertext with appended tag (base64).
    pub ciphertext: String,
    /// 96-bit IV (base64).
    pub iv: String,
}

fn message_aad(sender: &str, sender_dh: &PublicKey, prev_len: u32, index: u32) -> Vec<u8> {
    // json! objects serialise with alphabetically ordered keys, giving a
    // canonical byte string on both ends.
    serde_json::to_vec(&serde_json::json!({
        "chainIndex": index,
        "previousChainLength": prev_len,
        "sender": sender,
        "senderDhPublicKey": keys::public_key_b64(sender_dh),
    }))
    .unwrap_or_default()
}

/// KDF_RK: mix a DH output into the root key.
/// IKM is raw root (32 B) || DH output (32 B).
fn dh_step(root: &[u8; 32], dh: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(root);
    ikm[32..].copy_from_slice(dh);

    let mut new_root = [0u8; 32];
    let mut ck = [0u8; 32];
    let derived = kdf::hkdf(&ikm, ROOT_SALT, ROOT_INFO, &mut new_root)
        .and_then(|_| kdf::hkdf(&ikm, CHAIN_SALT, CHAIN_INFO, &mut ck));
    ikm.zeroize();
    derived?;
    Ok((new_root, ck))
}

// ── Skipped message keys ─────────────────────────────────────────────────────

#[derive(Clone)]
struct SkippedKey {
    mk: [u8; 32],
    seq: u64,
    stored_at: Instant,
}

/// (remote ratchet key fingerprint, index) → message key.
/// Bounded globally; entries expire after `SKIP_TTL`.
#[derive(Clone)]
struct SkippedKeyStore {
    keys: HashMap<(String, u32), SkippedKey>,
    next_seq: u64,
}

impl SkippedKeyStore {
    fn new() -> Self {
        Self { keys: HashMap::new(), next_seq: 0 }
    }

    fn take(&mut self, fingerprint: &str, index: u32) -> Option<[u8; 32]> {
        self.keys
            .remove(&(fingerprint.to_string(), index))
            .map(|entry| entry.mk)
    }

    fn insert(&mut self, fingerprint: String, index: u32, mk: [u8; 32]) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.keys
            .insert((fingerprint, index), SkippedKey { mk, seq, stored_at: Instant::now() });

        while self.keys.len() > MAX_SKIPPED_TOTAL {
            let oldest = self
                .keys
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    if let Some(mut dropped) = self.keys.remove(&key) {
                        dropped.mk.zeroize();
                    }
                }
                None => break,
            }
        }
    }

    fn prune_expired(&mut self) {
        let now = Instant::now();
        self.keys.retain(|_, entry| {
            let keep = now.duration_since(entry.stored_at) < SKIP_TTL;
            if !keep {
                entry.mk.zeroize();
            }
            keep
        });
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn zeroize_all(&mut self) {
        for entry in self.keys.values_mut() {
            entry.mk.zeroize();
        }
        self.keys.clear();
    }
}

// ── Session state ────────────────────────────────────────────────────────────

/// Complete Double Ratchet state for one peer. In-memory only; the private
/// ratchet keys never leave the process.
#[derive(Clone)]
pub struct DoubleRatchetState {
    local_address: String,
    dh_pair: EcdhKeyPair,
    remote_dh: Option<PublicKey>,
    root_key: [u8; 32],
    send_ck: Option<[u8; 32]>,
    send_n: u32,
    prev_send_n: u32,
    recv_ck: Option<[u8; 32]>,
    recv_n: u32,
    skipped: SkippedKeyStore,
}

impl Drop for DoubleRatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        if let Some(ref mut ck) = self.send_ck {
            ck.zeroize();
        }
        if let Some(ref mut ck) = self.recv_ck {
            ck.zeroize();
        }
        self.skipped.zeroize_all();
    }
}

impl DoubleRatchetState {
    /// Responder initialisation: the X3DH ephemeral pair becomes the first
    /// ratchet key; no chains exist until the initiator's first message
    /// triggers a DH ratchet.
    pub fn new_responder(local_address: &str, root: RootKey, my_ephemeral: EcdhKeyPair) -> Self {
        Self {
            local_address: local_address.to_lowercase(),
            dh_pair: my_ephemeral,
            remote_dh: None,
            root_key: *root.as_bytes(),
            send_ck: None,
            send_n: 0,
            prev_send_n: 0,
            recv_ck: None,
            recv_n: 0,
            skipped: SkippedKeyStore::new(),
        }
    }

    /// Initiator initialisation: perform the first DH ratchet step against
    /// the responder's handshake ephemeral, producing the sending chain.
    pub fn new_initiator(
        local_address: &str,
        root: RootKey,
        responder_ephemeral: &PublicKey,
    ) -> Result<Self, CryptoError> {
        let dh_pair = EcdhKeyPair::generate();
        let mut dh = dh_pair.agree(responder_ephemeral);
        let stepped = dh_step(root.as_bytes(), &dh);
        dh.zeroize();
        let (new_root, send_ck) = stepped?;

        Ok(Self {
            local_address: local_address.to_lowercase(),
            dh_pair,
            remote_dh: Some(responder_ephemeral.clone()),
            root_key: new_root,
            send_ck: Some(send_ck),
            send_n: 0,
            prev_send_n: 0,
            recv_ck: None,
            recv_n: 0,
            skipped: SkippedKeyStore::new(),
        })
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, CryptoError> {
        let ck = self.send_ck.as_ref().ok_or(CryptoError::SessionNotEstablished)?;
        let (next_ck, mut mk) = chain::step(ck);

        let aad = message_aad(
            &self.local_address,
            self.dh_pair.public(),
            self.prev_send_n,
            self.send_n,
        );
        let sealed = aead::encrypt(&mk, plaintext, &aad);
        mk.zeroize();
        let (ciphertext, iv) = sealed?;

        let msg = RatchetMessage {
            sender: self.local_address.clone(),
            sender_dh_public_key: self.dh_pair.public_jwk(),
            previous_chain_length: self.prev_send_n,
            chain_index: self.send_n,
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        };

        if let Some(ref mut old) = self.send_ck {
            old.zeroize();
        }
        self.send_ck = Some(next_ck);
        self.send_n += 1;
        Ok(msg)
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Derive the message key for `msg` and decrypt it.
    ///
    /// Handles three cases:
    ///   1. A stored skipped key matches (out-of-order arrival)
    ///   2. The sender moved to a new ratchet key (DH ratchet needed)
    ///   3. A message further along the current receiving chain
    pub fn decrypt(
        &mut self,
        msg: &RatchetMessage,
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptoError> {
        let sender_dh = keys::import_public_jwk(&msg.sender_dh_public_key)?;
        let ciphertext = STANDARD.decode(&msg.ciphertext)?;
        let iv = STANDARD.decode(&msg.iv)?;
        let aad = message_aad(&msg.sender, &sender_dh, msg.previous_chain_length, msg.chain_index);
        let fingerprint = keys::fingerprint(&sender_dh);

        let mut staged = self.clone();
        staged.skipped.prune_expired();

        // Case 1: skipped key. Consumed only if authentication succeeds —
        // a failure drops the staged copy and the stored key survives.
        if let Some(mut mk) = staged.skipped.take(&fingerprint, msg.chain_index) {
            let opened = aead::decrypt(&mk, &ciphertext, &iv, &aad);
            mk.zeroize();
            let plaintext = opened?;
            *self = staged;
            return Ok(plaintext);
        }

        // Case 2: new remote ratchet key.
        if staged.remote_dh.as_ref() != Some(&sender_dh) {
            staged.close_receiving_chain(msg.previous_chain_length)?;

            let mut dh = staged.dh_pair.agree(&sender_dh);
            let stepped = dh_step(&staged.root_key, &dh);
            dh.zeroize();
            let (new_root, recv_ck) = stepped?;
            staged.root_key = new_root;
            staged.recv_ck = Some(recv_ck);
            staged.recv_n = 0;

            staged.prev_send_n = staged.send_n;
            staged.send_n = 0;
            staged.dh_pair = EcdhKeyPair::generate();
            let mut dh = staged.dh_pair.agree(&sender_dh);
            let stepped = dh_step(&staged.root_key, &dh);
            dh.zeroize();
            let (new_root, send_ck) = stepped?;
            staged.root_key = new_root;
            staged.send_ck = Some(send_ck);

            staged.remote_dh = Some(sender_dh);
        }

        // Case 3: advance the current receiving chain.
        let ck = staged.recv_ck.ok_or(CryptoError::SessionNotEstablished)?;
        let (next_ck, mut mk, newly_skipped) =
            chain::ratchet_to_index(&ck, staged.recv_n, msg.chain_index)?;

        let opened = aead::decrypt(&mk, &ciphertext, &iv, &aad);
        mk.zeroize();
        let plaintext = opened?;

        for (index, skipped_mk) in newly_skipped {
            staged.skipped.insert(fingerprint.clone(), index, skipped_mk);
        }
        staged.recv_ck = Some(next_ck);
        staged.recv_n = msg.chain_index + 1;
        *self = staged;
        Ok(plaintext)
    }

    /// Store the message keys remaining in the receiving chain before a DH
    /// ratchet abandons it, up to the sender's stated previous chain length.
    fn close_receiving_chain(&mut self, previous_chain_length: u32) -> Result<(), CryptoError> {
        let (Some(ck), Some(remote)) = (self.recv_ck, self.remote_dh.as_ref()) else {
            return Ok(());
        };
        if previous_chain_length <= self.recv_n {
            return Ok(());
        }
        let gap = previous_chain_length - self.recv_n;
        if gap > MAX_SKIP {
            return Err(CryptoError::SkipOverflow { requested: gap, max: MAX_SKIP });
        }

        let old_fingerprint = keys::fingerprint(remote);
        let mut ck = ck;
        for index in self.recv_n..previous_chain_length {
            let (next, mk) = chain::step(&ck);
            self.skipped.insert(old_fingerprint.clone(), index, mk);
            ck = next;
        }
        ck.zeroize();
        self.recv_n = previous_chain_length;
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn sending_index(&self) -> u32 {
        self.send_n
    }

    pub fn receiving_index(&self) -> u32 {
        self.recv_n
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Our current ratchet public key.
    pub fn ratchet_public(&self) -> &PublicKey {
        self.dh_pair.public()
    }

    #[cfg(test)]
    fn age_skipped(&mut self, by: Duration) {
        for entry in self.skipped.keys.values_mut() {
            if let Some(earlier) = entry.stored_at.checked_sub(by) {
                entry.stored_at = earlier;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x3dh;

    /// Build a linked pair the way the orchestrator does after X3DH.
    fn session_pair() -> (DoubleRatchetState, DoubleRatchetState) {
        let alice_id = EcdhKeyPair::generate();
        let bob_id = EcdhKeyPair::generate();

        let pending = x3dh::initiate();
        let (bob_root, bob_eph) =
            x3dh::respond(&bob_id, alice_id.public(), pending.ephemeral.public()).unwrap();
        let alice_root =
            x3dh::complete(&alice_id, &pending, bob_id.public(), bob_eph.public()).unwrap();

        let bob = DoubleRatchetState::new_responder("0xB0B", bob_root, bob_eph);
        let alice =
            DoubleRatchetState::new_initiator("0xA11CE", alice_root, bob.ratchet_public())
                .unwrap();
        (alice, bob)
    }

    #[test]
    fn ordered_roundtrip_both_directions() {
        let (mut alice, mut bob) = session_pair();

        for i in 0..3u8 {
            let msg = alice.encrypt(&[i; 16]).unwrap();
            let pt = bob.decrypt(&msg).unwrap();
            assert_eq!(&pt[..], &[i; 16]);
        }
        for i in 0..2u8 {
            let msg = bob.encrypt(&[0x80 | i; 16]).unwrap();
            let pt = alice.decrypt(&msg).unwrap();
            assert_eq!(&pt[..], &[0x80 | i; 16]);
        }
    }

    #[test]
    fn out_of_order_within_chain() {
        let (mut alice, mut bob) = session_pair();

        let m1 = alice.encrypt(b"m1").unwrap();
        let m2 = alice.encrypt(b"m2").unwrap();
        let m3 = alice.encrypt(b"m3").unwrap();

        assert_eq!(&bob.decrypt(&m3).unwrap()[..], b"m3");
        assert_eq!(&bob.decrypt(&m1).unwrap()[..], b"m1");
        assert_eq!(&bob.decrypt(&m2).unwrap()[..], b"m2");

        assert_eq!(bob.receiving_index(), 3);
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn dh_ratchet_resets_sending_chain() {
        let (mut alice, mut bob) = session_pair();

        bob.decrypt(&alice.encrypt(b"m1").unwrap()).unwrap();
        bob.decrypt(&alice.encrypt(b"m2").unwrap()).unwrap();

        // Bob's reply rides his new ratchet key and triggers a DH ratchet
        // on Alice.
        alice.decrypt(&bob.encrypt(b"r1").unwrap()).unwrap();

        let m3 = alice.encrypt(b"m3").unwrap();
        assert_eq!(m3.previous_chain_length, 2);
        assert_eq!(m3.chain_index, 0);
        assert_eq!(&bob.decrypt(&m3).unwrap()[..], b"m3");
    }

    #[test]
    fn skip_overflow_leaves_state_untouched() {
        let (mut alice, mut bob) = session_pair();

        let first = alice.encrypt(b"first").unwrap();
        for _ in 0..MAX_SKIP {
            alice.encrypt(b"dropped").unwrap();
        }
        let far = alice.encrypt(b"far").unwrap();
        assert_eq!(far.chain_index, MAX_SKIP + 1);

        assert!(matches!(
            bob.decrypt(&far),
            Err(CryptoError::SkipOverflow { .. })
        ));
        assert_eq!(bob.receiving_index(), 0);
        assert_eq!(bob.skipped_key_count(), 0);

        // The untouched state still decrypts in-window traffic.
        assert_eq!(&bob.decrypt(&first).unwrap()[..], b"first");
    }

    #[test]
    fn tampered_ciphertext_does_not_advance() {
        let (mut alice, mut bob) = session_pair();

        let msg = alice.encrypt(b"secret").unwrap();
        let mut forged = msg.clone();
        let mut raw = STANDARD.decode(&forged.ciphertext).unwrap();
        raw[0] ^= 0x01;
        forged.ciphertext = STANDARD.encode(raw);

        assert!(matches!(
            bob.decrypt(&forged),
            Err(CryptoError::AuthenticationFailure)
        ));
        assert_eq!(bob.receiving_index(), 0);

        assert_eq!(&bob.decrypt(&msg).unwrap()[..], b"secret");
        assert_eq!(bob.receiving_index(), 1);
    }

    #[test]
    fn header_fields_are_bound() {
        let (mut alice, mut bob) = session_pair();

        let msg = alice.encrypt(b"bound").unwrap();

        let mut wrong_sender = msg.clone();
        wrong_sender.sender = "0xmallory".into();
        assert!(matches!(
            bob.decrypt(&wrong_sender),
            Err(CryptoError::AuthenticationFailure)
        ));

        let mut wrong_key = msg.clone();
        wrong_key.sender_dh_public_key = EcdhKeyPair::generate().public_jwk();
        assert!(bob.decrypt(&wrong_key).is_err());
        assert_eq!(bob.receiving_index(), 0);

        assert_eq!(&bob.decrypt(&msg).unwrap()[..], b"bound");
    }

    #[test]
    fn replayed_message_is_stale() {
        let (mut alice, mut bob) = session_pair();

        let msg = alice.encrypt(b"once").unwrap();
        bob.decrypt(&msg).unwrap();
        assert!(matches!(bob.decrypt(&msg), Err(CryptoError::StaleMessage)));
    }

    #[test]
    fn expired_skipped_keys_are_pruned() {
        let (mut alice, mut bob) = session_pair();

        let m1 = alice.encrypt(b"m1").unwrap();
        let m2 = alice.encrypt(b"m2").unwrap();
        bob.decrypt(&m2).unwrap();
        assert_eq!(bob.skipped_key_count(), 1);

        bob.age_skipped(SKIP_TTL + Duration::from_secs(1));
        // The prune commits with the next successful decrypt.
        bob.decrypt(&alice.encrypt(b"m3").unwrap()).unwrap();
        assert_eq!(bob.skipped_key_count(), 0);
        assert!(bob.decrypt(&m1).is_err());
    }

    #[test]
    fn encrypt_without_chain_is_rejected() {
        let (_, mut bob) = session_pair();
        // Responder has no sending chain until the first inbound message.
        assert!(matches!(
            bob.encrypt(b"too early"),
            Err(CryptoError::SessionNotEstablished)
        ));
    }

    #[test]
    fn skipped_store_evicts_oldest_beyond_cap() {
        let mut store = SkippedKeyStore::new();
        for i in 0..(MAX_SKIPPED_TOTAL as u32 + 1) {
            store.insert("fp".into(), i, [0u8; 32]);
        }
        assert_eq!(store.len(), MAX_SKIPPED_TOTAL);
        assert!(store.take("fp", 0).is_none());
        assert!(store.take("fp", 1).is_some());
    }
}
