//! Chunked media transfer.
//!
//! Each transfer gets its own random AES-256 key. The key rides to the
//! peer inside a `file_transfer_start` chat payload — through the ratchet,
//! so only peers already in session can read it — while the chunks
//! themselves travel in the clear as individually AEAD-sealed frames with
//! AAD binding `(transferId, chunkIndex)`.
//!
//! Chunks tolerate arbitrary reordering. A transfer finalizes once the
//! completion signal has been seen AND every chunk is present, whichever
//! comes last. Chunks for a transfer whose start payload has not arrived
//! are dropped, not buffered.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::Zeroize;

use vc_crypto::aead;
use vc_proto::{Frame, MediaType, TransferMeta};

use crate::error::SessionError;

pub const CHUNK_SIZE: usize = 16 * 1024;
pub const MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024;
pub const MAX_VIDEO_SIZE: u64 = 100 * 1024 * 1024;
pub const TRANSFER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Progress surfaced to the host application.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    Started { meta: TransferMeta },
    Progress { transfer_id: String, received: u32, total: u32 },
    Completed { meta: TransferMeta, bytes: Vec<u8> },
    Failed { transfer_id: String, reason: String },
}

fn chunk_aad(transfer_id: &str, chunk_index: u32) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "chunkIndex": chunk_index,
        "transferId": transfer_id,
    }))
    .unwrap_or_default()
}

/// MIME/size gate. Images up to 10 MiB, videos up to 100 MiB.
pub fn validate_media(mime_type: &str, size: u64) -> Result<MediaType, SessionError> {
    let (media_type, limit) = if mime_type.starts_with("image/") {
        (MediaType::Image, MAX_IMAGE_SIZE)
    } else if mime_type.starts_with("video/") {
        (MediaType::Video, MAX_VIDEO_SIZE)
    } else {
        return Err(SessionError::UnsupportedMedia(mime_type.to_string()));
    };
    if size > limit {
        return Err(SessionError::TransferTooLarge { size, limit });
    }
    Ok(media_type)
}

// ── Sender side ──────────────────────────────────────────────────────────────

/// Everything the sender emits for one transfer. The metadata goes out
/// through the ratchet; chunk and completion frames go out as-is.
pub struct OutboundTransfer {
    pub meta: TransferMeta,
    pub chunks: Vec<Frame>,
    pub complete: Frame,
}

/// Split, seal, and describe a file for transfer.
pub fn prepare_transfer(
    sender: &str,
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
    thumbnail: Option<String>,
) -> Result<OutboundTransfer, SessionError> {
    let media_type = validate_media(mime_type, bytes.len() as u64)?;

    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    let transfer_id = uuid::Uuid::new_v4().simple().to_string();
    let total_chunks = bytes.len().div_ceil(CHUNK_SIZE) as u32;

    let mut chunks = Vec::with_capacity(total_chunks as usize);
    for (index, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
        let index = index as u32;
        let encoded = STANDARD.encode(chunk);
        let (ciphertext, iv) =
            aead::encrypt(&key, encoded.as_bytes(), &chunk_aad(&transfer_id, index))?;
        chunks.push(Frame::FileTransferChunk {
            transfer_id: transfer_id.clone(),
            chunk_index: index,
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
            sender: sender.to_string(),
        });
    }

    let meta = TransferMeta {
        transfer_id: transfer_id.clone(),
        file_name: file_name.to_string(),
        file_size: bytes.len() as u64,
        mime_type: mime_type.to_string(),
        total_chunks,
        media_type,
        transfer_key: STANDARD.encode(key),
        thumbnail,
    };
    key.zeroize();

    Ok(OutboundTransfer {
        meta,
        chunks,
        complete: Frame::FileTransferComplete {
            transfer_id,
            sender: sender.to_string(),
        },
    })
}

// ── Receiver side ────────────────────────────────────────────────────────────

struct InboundTransfer {
    meta: TransferMeta,
    key: [u8; 32],
    chunks: HashMap<u32, Vec<u8>>,
    completion_signaled: bool,
    last_progress: Instant,
}

impl InboundTransfer {
    fn zeroize_buffers(&mut self) {
        self.key.zeroize();
        for chunk in self.chunks.values_mut() {
            chunk.zeroize();
        }
        self.chunks.clear();
    }
}

/// All in-flight inbound transfers for one room.
#[derive(Default)]
pub struct TransferTable {
    transfers: HashMap<String, InboundTransfer>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a transfer announced through the ratchet. The same
    /// MIME/size gates the sender applies run here, so a forged metadata
    /// payload cannot commit us to an oversized transfer.
    pub fn register(&mut self, meta: TransferMeta) -> Result<MediaEvent, SessionError> {
        validate_media(&meta.mime_type, meta.file_size)?;
        let raw = STANDARD
            .decode(&meta.transfer_key)
            .map_err(|_| SessionError::UnknownTransfer(meta.transfer_id.clone()))?;
        let key: [u8; 32] = raw
            .try_into()
            .map_err(|_| SessionError::UnknownTransfer(meta.transfer_id.clone()))?;

        self.transfers.insert(
            meta.transfer_id.clone(),
            InboundTransfer {
                meta: meta.clone(),
                key,
                chunks: HashMap::new(),
                completion_signaled: false,
                last_progress: Instant::now(),
            },
        );
        Ok(MediaEvent::Started { meta })
    }

    /// Decrypt and store one chunk. Unknown transfers yield `None` — a
    /// chunk outrunning its start payload is dropped, not buffered.
    pub fn accept_chunk(
        &mut self,
        transfer_id: &str,
        chunk_index: u32,
        ciphertext_b64: &str,
        iv_b64: &str,
    ) -> Result<Option<MediaEvent>, SessionError> {
        let opened = {
            let Some(transfer) = self.transfers.get(transfer_id) else {
                return Ok(None);
            };
            STANDARD
                .decode(ciphertext_b64)
                .ok()
                .zip(STANDARD.decode(iv_b64).ok())
                .and_then(|(ciphertext, iv)| {
                    aead::decrypt(
                        &transfer.key,
                        &ciphertext,
                        &iv,
                        &chunk_aad(transfer_id, chunk_index),
                    )
                    .ok()
                })
                .and_then(|plaintext| STANDARD.decode(&plaintext[..]).ok())
        };

        let Some(bytes) = opened else {
            // Per-chunk integrity failure kills the whole transfer.
            return Ok(Some(self.fail(transfer_id, "chunk failed authentication")));
        };

        let (received, total, ready) = {
            let Some(transfer) = self.transfers.get_mut(transfer_id) else {
                return Ok(None);
            };
            if chunk_index < transfer.meta.total_chunks {
                transfer.chunks.entry(chunk_index).or_insert(bytes);
                transfer.last_progress = Instant::now();
            }
            let received = transfer.chunks.len() as u32;
            let total = transfer.meta.total_chunks;
            (received, total, transfer.completion_signaled && received == total)
        };

        if ready {
            return Ok(Some(self.finalize(transfer_id)));
        }
        Ok(Some(MediaEvent::Progress {
            transfer_id: transfer_id.to_string(),
            received,
            total,
        }))
    }

    /// Handle the sender's completion signal. Finalizes now if every chunk
    /// is already here; otherwise the last late chunk finalizes.
    pub fn complete(&mut self, transfer_id: &str) -> Option<MediaEvent> {
        let transfer = self.transfers.get_mut(transfer_id)?;
        transfer.completion_signaled = true;
        if transfer.chunks.len() as u32 == transfer.meta.total_chunks {
            Some(self.finalize(transfer_id))
        } else {
            None
        }
    }

    fn finalize(&mut self, transfer_id: &str) -> MediaEvent {
        let Some(mut transfer) = self.transfers.remove(transfer_id) else {
            return MediaEvent::Failed {
                transfer_id: transfer_id.to_string(),
                reason: SessionError::UnknownTransfer(transfer_id.to_string()).to_string(),
            };
        };

        let mut bytes = Vec::with_capacity(transfer.meta.file_size as usize);
        for index in 0..transfer.meta.total_chunks {
            match transfer.chunks.get(&index) {
                Some(chunk) => bytes.extend_from_slice(chunk),
                None => {
                    transfer.zeroize_buffers();
                    bytes.zeroize();
                    return MediaEvent::Failed {
                        transfer_id: transfer_id.to_string(),
                        reason: format!("missing chunk {index} at reassembly"),
                    };
                }
            }
        }
        transfer.zeroize_buffers();
        MediaEvent::Completed { meta: transfer.meta, bytes }
    }

    fn fail(&mut self, transfer_id: &str, reason: &str) -> MediaEvent {
        if let Some(mut transfer) = self.transfers.remove(transfer_id) {
            transfer.zeroize_buffers();
        }
        MediaEvent::Failed {
            transfer_id: transfer_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Abort transfers with no chunk progress for `max_idle`, zeroing any
    /// accumulated plaintext.
    pub fn abort_idle(&mut self, max_idle: Duration) -> Vec<MediaEvent> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .transfers
            .iter()
            .filter(|(_, t)| now.duration_since(t.last_progress) >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .map(|id| self.fail(&id, &SessionError::TransferTimeout.to_string()))
            .collect()
    }

    /// Drop everything, zeroing buffers. Used when leaving a room.
    pub fn clear(&mut self) {
        for (_, mut transfer) in self.transfers.drain() {
            transfer.zeroize_buffers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver(
        table: &mut TransferTable,
        frame: &Frame,
    ) -> Result<Option<MediaEvent>, SessionError> {
        match frame {
            Frame::FileTransferChunk { transfer_id, chunk_index, ciphertext, iv, .. } => {
                table.accept_chunk(transfer_id, *chunk_index, ciphertext, iv)
            }
            Frame::FileTransferComplete { transfer_id, .. } => Ok(table.complete(transfer_id)),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn split_reassemble_roundtrip() {
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let outbound =
            prepare_transfer("0xa", "blob.png", "image/png", &payload, None).unwrap();
        assert_eq!(outbound.meta.total_chunks, 4);

        let mut table = TransferTable::new();
        table.register(outbound.meta.clone()).unwrap();
        for frame in &outbound.chunks {
            deliver(&mut table, frame).unwrap();
        }
        match deliver(&mut table, &outbound.complete).unwrap() {
            Some(MediaEvent::Completed { bytes, .. }) => assert_eq!(bytes, payload),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn reverse_order_finalizes_on_completion() {
        let payload = vec![7u8; CHUNK_SIZE * 2 + 10];
        let outbound =
            prepare_transfer("0xa", "b.png", "image/png", &payload, None).unwrap();

        let mut table = TransferTable::new();
        table.register(outbound.meta.clone()).unwrap();
        for frame in outbound.chunks.iter().rev() {
            deliver(&mut table, frame).unwrap();
        }
        match deliver(&mut table, &outbound.complete).unwrap() {
            Some(MediaEvent::Completed { bytes, .. }) => assert_eq!(bytes, payload),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn late_chunk_finalizes_after_completion_signal() {
        let payload = vec![9u8; CHUNK_SIZE + 1];
        let outbound =
            prepare_transfer("0xa", "b.png", "image/png", &payload, None).unwrap();

        let mut table = TransferTable::new();
        table.register(outbound.meta.clone()).unwrap();
        deliver(&mut table, &outbound.chunks[0]).unwrap();
        assert!(deliver(&mut table, &outbound.complete).unwrap().is_none());

        match deliver(&mut table, &outbound.chunks[1]).unwrap() {
            Some(MediaEvent::Completed { bytes, .. }) => assert_eq!(bytes, payload),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn tampered_chunk_fails_transfer() {
        let payload = vec![1u8; 100];
        let outbound =
            prepare_transfer("0xa", "b.png", "image/png", &payload, None).unwrap();

        let mut table = TransferTable::new();
        table.register(outbound.meta.clone()).unwrap();

        let Frame::FileTransferChunk { transfer_id, chunk_index, iv, .. } = &outbound.chunks[0]
        else {
            unreachable!()
        };
        let forged = STANDARD.encode(b"not the chunk");
        match table.accept_chunk(transfer_id, *chunk_index, &forged, iv).unwrap() {
            Some(MediaEvent::Failed { .. }) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn chunk_without_start_is_dropped() {
        let payload = vec![1u8; 100];
        let outbound =
            prepare_transfer("0xa", "b.png", "image/png", &payload, None).unwrap();

        let mut table = TransferTable::new();
        assert!(deliver(&mut table, &outbound.chunks[0]).unwrap().is_none());
    }

    #[test]
    fn idle_transfer_aborts() {
        let payload = vec![1u8; 100];
        let outbound =
            prepare_transfer("0xa", "b.png", "image/png", &payload, None).unwrap();

        let mut table = TransferTable::new();
        table.register(outbound.meta.clone()).unwrap();
        let events = table.abort_idle(Duration::ZERO);
        assert!(matches!(events.as_slice(), [MediaEvent::Failed { .. }]));

        // Chunks for the aborted transfer are now ignored.
        assert!(deliver(&mut table, &outbound.chunks[0]).unwrap().is_none());
    }

    #[test]
    fn size_and_mime_gates() {
        assert!(matches!(
            validate_media("application/pdf", 10),
            Err(SessionError::UnsupportedMedia(_))
        ));
        assert!(matches!(
            validate_media("image/png", MAX_IMAGE_SIZE + 1),
            Err(SessionError::TransferTooLarge { .. })
        ));
        assert_eq!(validate_media("image/png", 1024).unwrap(), MediaType::Image);
        assert_eq!(
            validate_media("video/mp4", MAX_VIDEO_SIZE).unwrap(),
            MediaType::Video
        );
    }
}
