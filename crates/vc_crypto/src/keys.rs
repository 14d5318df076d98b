//! P-256 key material and JWK interchange.
//!
//! Every asymmetric key in the protocol is an ECDH key pair on NIST P-256.
//! Public halves travel as JWK (`{kty:"EC", crv:"P-256", x, y}` with
//! base64url coordinates); private halves never leave the process.
//!
//! Import rules (NON-NEGOTIABLE):
//!   - A JWK carrying a private scalar (`d`) is rejected outright.
//!   - Coordinates must decode to exactly 32 bytes each.
//!   - The point must lie on the curve; the identity cannot be encoded in
//!     affine form and is rejected by construction.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::{
    ecdh,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, FieldBytes, NonZeroScalar, PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{error::CryptoError, kdf};

pub use p256::PublicKey as PeerPublicKey;

// ── JWK (EC / P-256 only) ────────────────────────────────────────────────────

/// JSON Web Key for a P-256 point. The optional `d` field exists only so
/// inbound frames smuggling a private scalar can be detected and rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

fn coord(s: &str) -> Result<FieldBytes, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| CryptoError::InvalidPeerKey("bad base64url coordinate".into()))?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidPeerKey(format!(
            "coordinate must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(*FieldBytes::from_slice(&bytes))
}

/// Import a peer public key from a JWK, validating curve membership and
/// refusing anything that carries a private component.
pub fn import_public_jwk(jwk: &Jwk) -> Result<PublicKey, CryptoError> {
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(CryptoError::InvalidPeerKey(format!(
            "unsupported key type {}/{}",
            jwk.kty, jwk.crv
        )));
    }
    if jwk.d.is_some() {
        return Err(CryptoError::InvalidPeerKey(
            "JWK contains a private scalar".into(),
        ));
    }
    let x = coord(&jwk.x)?;
    let y = coord(&jwk.y)?;
    let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
    Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
        .ok_or_else(|| CryptoError::InvalidPeerKey("point is not on P-256".into()))
}

/// Export a public key as a JWK.
pub fn export_public_jwk(key: &PublicKey) -> Jwk {
    let point = key.to_encoded_point(false);
    // Uncompressed affine encoding always has both coordinates.
    let x = point.x().map(|c| URL_SAFE_NO_PAD.encode(c)).unwrap_or_default();
    let y = point.y().map(|c| URL_SAFE_NO_PAD.encode(c)).unwrap_or_default();
    Jwk {
        kty: "EC".into(),
        crv: "P-256".into(),
        x,
        y,
        d: None,
    }
}

/// Compact base64url encoding of the compressed point. Used in AAD payloads
/// where the sender's ratchet key must be bound to the ciphertext.
pub fn public_key_b64(key: &PublicKey) -> String {
    URL_SAFE_NO_PAD.encode(key.to_encoded_point(true).as_bytes())
}

/// Short hex fingerprint of a public key. Keys the skipped-message-key map
/// and shows up in diagnostics; never used for trust decisions.
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = kdf::sha256(key.to_encoded_point(false).as_bytes());
    hex::encode(&digest[..16])
}

// ── ECDH key pair ────────────────────────────────────────────────────────────

/// A P-256 ECDH key pair. The secret scalar is held by `p256::SecretKey`,
/// which zeroizes on drop; there is no raw export path.
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Build a pair from 32 candidate scalar bytes. Returns `None` when the
    /// bytes fall outside [1, n-1] — the caller re-derives and retries.
    pub fn from_scalar_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::from_repr((*bytes).into()))?;
        let secret = SecretKey::from(scalar);
        let public = secret.public_key();
        Some(Self { secret, public })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_jwk(&self) -> Jwk {
        export_public_jwk(&self.public)
    }

    /// ECDH agreement: 32 bytes of raw shared secret (x-coordinate).
    pub fn agree(&self, peer: &PublicKey) -> [u8; 32] {
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes());
        out
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public", &fingerprint(&self.public))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwk_roundtrip() {
        let pair = EcdhKeyPair::generate();
        let jwk = pair.public_jwk();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv, "P-256");
        let imported = import_public_jwk(&jwk).unwrap();
        assert_eq!(&imported, pair.public());
    }

    #[test]
    fn rejects_private_component() {
        let mut jwk = EcdhKeyPair::generate().public_jwk();
        jwk.d = Some("AAAA".into());
        assert!(matches!(
            import_public_jwk(&jwk),
            Err(CryptoError::InvalidPeerKey(_))
        ));
    }

    #[test]
    fn rejects_off_curve_point() {
        let mut jwk = EcdhKeyPair::generate().public_jwk();
        // Valid-length garbage y coordinate — almost surely off the curve.
        jwk.y = URL_SAFE_NO_PAD.encode([0xABu8; 32]);
        assert!(import_public_jwk(&jwk).is_err());
    }

    #[test]
    fn rejects_wrong_curve() {
        let mut jwk = EcdhKeyPair::generate().public_jwk();
        jwk.crv = "P-384".into();
        assert!(import_public_jwk(&jwk).is_err());
    }

    #[test]
    fn ecdh_is_commutative() {
        let a = EcdhKeyPair::generate();
        let b = EcdhKeyPair::generate();
        assert_eq!(a.agree(b.public()), b.agree(a.public()));
    }

    #[test]
    fn fingerprint_is_stable() {
        let pair = EcdhKeyPair::generate();
        assert_eq!(fingerprint(pair.public()), fingerprint(pair.public()));
    }
}
