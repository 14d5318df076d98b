//! Plaintext chat payloads (inside the ratchet ciphertext).
//!
//! What the relay sees as an opaque `chat` ciphertext decrypts to one of
//! these. Media transfers smuggle their per-transfer key through here, so
//! only peers already in session can read it.

use serde::{Deserialize, Serialize};

/// Deserialised plaintext carried inside a ratcheted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPayload {
    Text {
        body: String,
    },
    /// Media transfer metadata; announces the chunk stream that follows in
    /// the clear (each chunk sealed under the transfer key below).
    FileTransferStart(TransferMeta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    pub media_type: MediaType,
    /// Raw AES-256 transfer key, base64. Protected by the ratchet layer.
    pub transfer_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}
