//! X3DH key agreement (concurrent-ephemeral variant).
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! Both parties contribute an identity key (the deterministic room key
//! pair) and a fresh ephemeral. There are no published prekey bundles; the
//! responder mints its ephemeral on receipt of the init, so the handshake
//! is a single round trip over the relay:
//!
//!   DH1 = DH(EK_init, IK_resp)
//!   DH2 = DH(IK_init, EK_resp)
//!   DH3 = DH(EK_init, EK_resp)
//!   root = HKDF(DH1 || DH2 || DH3, salt="x3dh", info="root-key", 32B)
//!
//! The root key seeds the Double Ratchet. The initiator retains its
//! ephemeral until the response arrives; a response with nothing pending
//! is `UnexpectedHandshake` (enforced by the orchestrator, which owns the
//! pending map).

use p256::PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::CryptoError, kdf, keys::EcdhKeyPair};

const X3DH_SALT: &[u8] = b"x3dh";
const X3DH_INFO: &[u8] = b"root-key";

/// 256-bit DH-ratchet root key produced by the handshake.
#[derive(Clone, ZeroizeOnDrop)]
pub struct RootKey([u8; 32]);

impl RootKey {
    /// Raw key bytes. Needed by the DH ratchet (root is HKDF input) and by
    /// handshake equality checks in tests.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Initiator-side state kept between sending the init and receiving the
/// response.
pub struct PendingHandshake {
    pub ephemeral: EcdhKeyPair,
}

/// Start a handshake: mint the ephemeral the init frame will carry.
pub fn initiate() -> PendingHandshake {
    PendingHandshake { ephemeral: EcdhKeyPair::generate() }
}

fn derive_root(dh1: [u8; 32], dh2: [u8; 32], dh3: [u8; 32]) -> Result<RootKey, CryptoError> {
    let mut ikm = [0u8; 96];
    ikm[..32].copy_from_slice(&dh1);
    ikm[32..64].copy_from_slice(&dh2);
    ikm[64..].copy_from_slice(&dh3);

    let mut root = [0u8; 32];
    let result = kdf::hkdf(&ikm, X3DH_SALT, X3DH_INFO, &mut root);
    ikm.zeroize();
    result?;
    Ok(RootKey(root))
}

/// Responder side: consume an init, mint our own ephemeral, derive the
/// root. Returns the root key and the ephemeral pair — the ephemeral's
/// public half goes back in the response frame and its secret half becomes
/// the responder's initial ratchet key.
pub fn respond(
    my_identity: &EcdhKeyPair,
    their_identity: &PublicKey,
    their_ephemeral: &PublicKey,
) -> Result<(RootKey, EcdhKeyPair), CryptoError> {
    let my_ephemeral = EcdhKeyPair::generate();

    let dh1 = my_identity.agree(their_ephemeral);
    let dh2 = my_ephemeral.agree(their_identity);
    let dh3 = my_ephemeral.agree(their_ephemeral);
    let root = derive_root(dh1, dh2, dh3)?;

    Ok((root, my_ephemeral))
}

/// Initiator side: complete the handshake with the responder's keys,
/// mirroring the responder's DH roles.
pub fn complete(
    my_identity: &EcdhKeyPair,
    pending: &PendingHandshake,
    their_identity: &PublicKey,
    their_ephemeral: &PublicKey,
) -> Result<RootKey, CryptoError> {
    let dh1 = pending.ephemeral.agree(their_identity);
    let dh2 = my_identity.agree(their_ephemeral);
    let dh3 = pending.ephemeral.agree(their_ephemeral);
    derive_root(dh1, dh2, dh3)
}
