use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid peer key: {0}")]
    InvalidPeerKey(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD authentication failed (tag mismatch — tampering, wrong key, or ratchet desync)")]
    AuthenticationFailure,

    #[error("Skip window exceeded: {requested} skipped indices requested, max {max}")]
    SkipOverflow { requested: u32, max: u32 },

    #[error("Message index below the current chain with no stored key")]
    StaleMessage,

    #[error("Sender key envelope could not be opened")]
    InvalidSenderKey,

    #[error("Session not established")]
    SessionNotEstablished,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
