//! Relay wire frames.
//!
//! The relay is a DUMB PIPE: it routes opaque JSON frames between room
//! members and sees nothing beyond the `type` tag, addresses, and
//! ciphertext. Every frame crossing it is one of the variants below.
//!
//! `chat` carries either a Double Ratchet message (1:1 rooms, ratchet
//! header present) or a sender-key message (group rooms); the two are told
//! apart by shape, not by tag.

use serde::{Deserialize, Serialize};

use vc_crypto::keys::Jwk;
use vc_crypto::ratchet::RatchetMessage;
use vc_crypto::sender_key::{GroupMessage, SealedSenderKey};

/// Everything the relay can deliver to a room member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Announce our room public key to the room.
    #[serde(rename_all = "camelCase")]
    EncryptionPubkey { sender: String, public_key: Jwk },

    /// A member joined; key may ride along or follow separately.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<Jwk>,
    },

    /// Presence reply so a joiner learns the existing members.
    #[serde(rename_all = "camelCase")]
    IAmHere {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<Jwk>,
    },

    #[serde(rename_all = "camelCase")]
    UserLeft { address: String },

    /// X3DH opening move from the tiebreak winner.
    #[serde(rename_all = "camelCase")]
    X3dhInit {
        from_address: String,
        identity_public_key: Jwk,
        ephemeral_public_key: Jwk,
    },

    #[serde(rename_all = "camelCase")]
    X3dhResponse {
        from_address: String,
        identity_public_key: Jwk,
        ephemeral_public_key: Jwk,
    },

    /// ECDH-sealed sender chain key for one recipient.
    SenderKey(SealedSenderKey),

    /// Ratcheted ciphertext — direct or group, by shape.
    Chat(ChatMessage),

    /// One AEAD-sealed media chunk. Not ratcheted; the transfer key came
    /// through the ratchet in the transfer-start payload.
    #[serde(rename_all = "camelCase")]
    FileTransferChunk {
        transfer_id: String,
        chunk_index: u32,
        ciphertext: String,
        iv: String,
        sender: String,
    },

    #[serde(rename_all = "camelCase")]
    FileTransferComplete { transfer_id: String, sender: String },
}

/// The two shapes a `chat` frame can take. Direct messages carry the
/// ratchet header (`senderDhPublicKey` et al.); group messages only the
/// sender chain position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Direct(RatchetMessage),
    Group(GroupMessage),
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
