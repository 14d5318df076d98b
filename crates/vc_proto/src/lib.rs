//! vc_proto — Wire types and serialisation for the Veilchat relay
//!
//! All on-wire types are JSON with a `type` tag and camelCase fields.
//!
//! # Modules
//! - `frames`  — relay frames (presence, handshake, chat, media)
//! - `payload` — plaintext chat payloads (inside the ratchet ciphertext)
//! - `codec`   — bucket padding for chat plaintext

pub mod codec;
pub mod frames;
pub mod payload;

pub use codec::{CodecError, PaddingMode};
pub use frames::{ChatMessage, Frame};
pub use payload::{ChatPayload, MediaType, TransferMeta};
