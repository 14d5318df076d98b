//! vc_crypto — Veilchat end-to-end encryption primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Zeroize all secret material on drop.
//! - Private keys are opaque handles; there is no raw export path.
//! - Protocol state machines are synchronous and side-effect free — the
//!   session layer owns scheduling and locking.
//!
//! # Module layout
//! - `keys`       — P-256 ECDH key pairs, JWK import/export, fingerprints
//! - `derive`     — wallet-seeded deterministic room key derivation
//! - `kdf`        — HKDF-SHA256 / HMAC-SHA256 helpers
//! - `chain`      — symmetric KDF chain (chain key → message key)
//! - `aead`       — AES-256-GCM with detached IVs
//! - `x3dh`       — triple-DH handshake producing the ratchet root key
//! - `ratchet`    — full Double Ratchet with skipped message keys
//! - `sender_key` — group sender-key chains + ECDH-sealed distribution
//! - `error`      — unified error type

pub mod aead;
pub mod chain;
pub mod derive;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod sender_key;
pub mod x3dh;

pub use error::CryptoError;
