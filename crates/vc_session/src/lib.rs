//! vc_session — Veilchat session orchestration
//!
//! Sits between the relay transport and the crypto core: feeds inbound
//! frames through the right protocol state machine and hands back frames
//! to send plus events for the host UI. The core never persists plaintext
//! and holds none after an operation returns.
//!
//! # Modules
//! - `session` — per-room state machine (handshake tiebreak, dispatch)
//! - `media`   — chunked media transfer with per-transfer keys
//! - `seed`    — process-wide master seed cache
//! - `error`   — session-level error type

pub mod error;
pub mod media;
pub mod seed;
pub mod session;

pub use error::SessionError;
pub use media::MediaEvent;
pub use seed::SeedCache;
pub use session::{EncryptionStatus, Output, RoomMode, RoomSession};
