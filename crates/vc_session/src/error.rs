use thiserror::Error;

use vc_crypto::CryptoError;
use vc_proto::CodecError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Fatal initialisation failure: {0}")]
    FatalInit(String),

    #[error("Handshake response without a matching pending init")]
    UnexpectedHandshake,

    #[error("Group message from unknown sender {0}")]
    UnknownSender(String),

    #[error("Transfer timed out without chunk progress")]
    TransferTimeout,

    #[error("File of {size} bytes exceeds the {limit}-byte limit")]
    TransferTooLarge { size: u64, limit: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("Unknown transfer {0}")]
    UnknownTransfer(String),

    #[error("Room is not ready for encryption")]
    NotReady,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Payload decode failed: {0}")]
    Payload(#[from] serde_json::Error),
}
