//! Per-room session orchestration.
//!
//! One `RoomSession` drives the whole protocol for one room: key
//! derivation, handshakes, ratchet dispatch, sender-key distribution, and
//! media transfer bookkeeping. Inputs are relay frames; outputs are frames
//! to send plus events for the host application.
//!
//! Locking (NON-NEGOTIABLE):
//!   - Room bookkeeping lives behind one `tokio::sync::Mutex`. Every
//!     transition is read-compute-commit under that lock; no
//!     `get → await → set` split ever leaves the lock.
//!   - Each Double Ratchet session has its own FIFO mutex. Two concurrent
//!     calls reading the same pre-state and writing after their awaits
//!     would permanently desynchronise the ratchet, so encrypt/decrypt on
//!     one session are strictly serialised while distinct peers progress
//!     concurrently.
//!
//! Handshake tiebreak: only the lexicographically smaller lowercase
//! address initiates X3DH. Without this, simultaneous initiation leaves
//! the two sides on unrelated root keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use vc_crypto::{
    derive::{self, MasterSeed},
    kdf,
    keys::{self, EcdhKeyPair, Jwk, PeerPublicKey},
    ratchet::{DoubleRatchetState, RatchetMessage},
    sender_key::{self, GroupMessage, SealedSenderKey, SenderKeyState},
    x3dh::{self, PendingHandshake},
    CryptoError,
};
use vc_proto::{codec, ChatMessage, ChatPayload, Frame, PaddingMode};

use crate::error::SessionError;
use crate::media::{self, MediaEvent, TransferTable, TRANSFER_IDLE_TIMEOUT};

/// An empty room falls back to `ready` after this long with no peer keys.
pub const HANDSHAKE_FALLBACK: Duration = Duration::from_millis(200);

/// Repeated authentication failures inside this window raise a warning.
pub const AUTH_FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const AUTH_FAILURE_WARN_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    Direct,
    Group,
}

/// Room encryption lifecycle. Only moves forward; `Error` is terminal and
/// reachable from any state but `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    Idle,
    Deriving,
    Handshaking,
    Ready,
    Error,
}

/// What a session operation produced: frames for the relay and events for
/// the host.
#[derive(Debug)]
pub enum Output {
    /// Send this to the relay.
    Frame(Frame),
    /// Decrypted chat text.
    Message { sender: String, body: String },
    /// Media transfer progress.
    Media(MediaEvent),
    /// Encryption status changed.
    Status(EncryptionStatus),
    /// User-visible warning (e.g. repeated authentication failures).
    Warning { peer: String, detail: String },
}

struct RoomState {
    status: EncryptionStatus,
    room_keys: Option<EcdhKeyPair>,
    peers: HashMap<String, PeerPublicKey>,
    pending_x3dh: HashMap<String, PendingHandshake>,
    ratchets: HashMap<String, Arc<Mutex<DoubleRatchetState>>>,
    my_sender_key: Option<SenderKeyState>,
    peer_sender_keys: HashMap<String, SenderKeyState>,
    transfers: TransferTable,
    handshaking_since: Option<Instant>,
    auth_failures: HashMap<String, Vec<Instant>>,
    closed: bool,
}

impl RoomState {
    fn advance_status(&mut self, next: EncryptionStatus) -> Option<Output> {
        use EncryptionStatus::*;
        if self.status == next {
            return None;
        }
        let allowed = matches!(
            (self.status, next),
            (Idle, Deriving) | (Deriving, Handshaking) | (Handshaking, Ready)
        ) || (next == Error && self.status != Ready);
        if !allowed {
            return None;
        }
        debug!(from = ?self.status, to = ?next, "encryption status");
        self.status = next;
        Some(Output::Status(next))
    }

    fn record_auth_failure(&mut self, peer: &str) -> Option<Output> {
        let now = Instant::now();
        let failures = self.auth_failures.entry(peer.to_string()).or_default();
        failures.push(now);
        failures.retain(|at| now.duration_since(*at) <= AUTH_FAILURE_WINDOW);
        if failures.len() >= AUTH_FAILURE_WARN_THRESHOLD {
            Some(Output::Warning {
                peer: peer.to_string(),
                detail: format!(
                    "{} messages failed authentication in the last {}s",
                    failures.len(),
                    AUTH_FAILURE_WINDOW.as_secs()
                ),
            })
        } else {
            None
        }
    }
}

pub struct RoomSession {
    address: String,
    room: String,
    mode: RoomMode,
    state: Mutex<RoomState>,
}

impl RoomSession {
    pub fn new(address: &str, room: &str, mode: RoomMode) -> Self {
        Self {
            address: address.to_lowercase(),
            room: room.to_string(),
            mode,
            state: Mutex::new(RoomState {
                status: EncryptionStatus::Idle,
                room_keys: None,
                peers: HashMap::new(),
                pending_x3dh: HashMap::new(),
                ratchets: HashMap::new(),
                my_sender_key: None,
                peer_sender_keys: HashMap::new(),
                transfers: TransferTable::new(),
                handshaking_since: None,
                auth_failures: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    pub async fn status(&self) -> EncryptionStatus {
        self.state.lock().await.status
    }

    pub async fn public_key_jwk(&self) -> Option<Jwk> {
        self.state.lock().await.room_keys.as_ref().map(|pair| pair.public_jwk())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Derive the room key pair and announce it. `idle → deriving →
    /// handshaking`; a derivation failure is fatal for the room.
    pub async fn begin(&self, seed: &MasterSeed) -> Result<Vec<Output>, SessionError> {
        let mut state = self.state.lock().await;
        let mut outputs = Vec::new();
        outputs.extend(state.advance_status(EncryptionStatus::Deriving));

        let hash = kdf::channel_hash(&self.room);
        let pair = match derive::derive_room_key_pair(seed, &hash) {
            Ok(pair) => pair,
            Err(e) => {
                state.advance_status(EncryptionStatus::Error);
                return Err(SessionError::FatalInit(e.to_string()));
            }
        };

        let jwk = pair.public_jwk();
        state.room_keys = Some(pair);
        outputs.extend(state.advance_status(EncryptionStatus::Handshaking));
        state.handshaking_since = Some(Instant::now());
        outputs.push(Output::Frame(Frame::EncryptionPubkey {
            sender: self.address.clone(),
            public_key: jwk,
        }));

        // Peers observed before our keys existed still need our sender key.
        if self.mode == RoomMode::Group && !state.peers.is_empty() {
            let frames = self.distribute_sender_key(&mut state, None)?;
            outputs.extend(frames);
        }
        Ok(outputs)
    }

    /// Leave the room: drop all key material and in-flight transfers.
    /// In-flight operations observing the closed flag discard their
    /// results; committed ratchet state is never corrupted.
    pub async fn leave(&self) -> Vec<Output> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.peers.clear();
        state.pending_x3dh.clear();
        state.ratchets.clear();
        state.my_sender_key = None;
        state.peer_sender_keys.clear();
        state.transfers.clear();
        vec![Output::Frame(Frame::UserLeft { address: self.address.clone() })]
    }

    /// Promote an empty room to `ready` once the fallback window elapsed
    /// with no peer keys observed.
    pub async fn maybe_fallback_ready(&self) -> Vec<Output> {
        let mut state = self.state.lock().await;
        if state.status == EncryptionStatus::Handshaking
            && state.peers.is_empty()
            && state
                .handshaking_since
                .is_some_and(|since| since.elapsed() >= HANDSHAKE_FALLBACK)
        {
            return state.advance_status(EncryptionStatus::Ready).into_iter().collect();
        }
        vec![]
    }

    /// Sleep through the fallback window, then apply the empty-room check.
    pub async fn run_fallback_timer(&self) -> Vec<Output> {
        tokio::time::sleep(HANDSHAKE_FALLBACK).await;
        self.maybe_fallback_ready().await
    }

    /// Abort inbound transfers with no chunk progress for the idle window.
    pub async fn abort_stale_transfers(&self) -> Vec<Output> {
        self.abort_idle_transfers(TRANSFER_IDLE_TIMEOUT).await
    }

    pub async fn abort_idle_transfers(&self, max_idle: Duration) -> Vec<Output> {
        let mut state = self.state.lock().await;
        state.transfers.abort_idle(max_idle).into_iter().map(Output::Media).collect()
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    pub async fn handle_frame(&self, frame: Frame) -> Result<Vec<Output>, SessionError> {
        if self.state.lock().await.closed {
            return Ok(vec![]);
        }
        match frame {
            Frame::EncryptionPubkey { sender, public_key } => {
                self.observe_peer(&sender, Some(public_key), false).await
            }
            Frame::UserJoined { address, public_key } => {
                self.observe_peer(&address, public_key, true).await
            }
            Frame::IAmHere { address, public_key } => {
                self.observe_peer(&address, public_key, false).await
            }
            Frame::UserLeft { address } => self.peer_left(&address).await,
            Frame::X3dhInit { from_address, identity_public_key, ephemeral_public_key } => {
                self.accept_init(&from_address, &identity_public_key, &ephemeral_public_key)
                    .await
            }
            Frame::X3dhResponse { from_address, identity_public_key, ephemeral_public_key } => {
                self.accept_response(&from_address, &identity_public_key, &ephemeral_public_key)
                    .await
            }
            Frame::SenderKey(envelope) => self.accept_sender_key(envelope).await,
            Frame::Chat(ChatMessage::Direct(msg)) => self.decrypt_direct(msg).await,
            Frame::Chat(ChatMessage::Group(msg)) => self.decrypt_group(msg).await,
            Frame::FileTransferChunk { transfer_id, chunk_index, ciphertext, iv, .. } => {
                let mut state = self.state.lock().await;
                let event = state.transfers.accept_chunk(&transfer_id, chunk_index, &ciphertext, &iv)?;
                Ok(event.into_iter().map(Output::Media).collect())
            }
            Frame::FileTransferComplete { transfer_id, .. } => {
                let mut state = self.state.lock().await;
                Ok(state.transfers.complete(&transfer_id).into_iter().map(Output::Media).collect())
            }
        }
    }

    // ── Presence ─────────────────────────────────────────────────────────

    async fn observe_peer(
        &self,
        address: &str,
        key: Option<Jwk>,
        announce: bool,
    ) -> Result<Vec<Output>, SessionError> {
        let peer = address.to_lowercase();
        if peer == self.address {
            return Ok(vec![]);
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(vec![]);
        }
        let mut outputs = Vec::new();

        if announce {
            if let Some(pair) = state.room_keys.as_ref() {
                outputs.push(Output::Frame(Frame::IAmHere {
                    address: self.address.clone(),
                    public_key: Some(pair.public_jwk()),
                }));
            }
        }

        let Some(jwk) = key else {
            return Ok(outputs);
        };
        let public = keys::import_public_jwk(&jwk)?;
        state.peers.insert(peer.clone(), public);
        debug!(%peer, "peer public key observed");

        match self.mode {
            RoomMode::Direct => {
                if state.ratchets.contains_key(&peer) || state.pending_x3dh.contains_key(&peer) {
                    return Ok(outputs);
                }
                let Some(pair) = state.room_keys.as_ref() else {
                    return Ok(outputs);
                };
                // Tiebreak: the smaller address initiates; the other waits.
                if self.address < peer {
                    let pending = x3dh::initiate();
                    outputs.push(Output::Frame(Frame::X3dhInit {
                        from_address: self.address.clone(),
                        identity_public_key: pair.public_jwk(),
                        ephemeral_public_key: pending.ephemeral.public_jwk(),
                    }));
                    state.pending_x3dh.insert(peer.clone(), pending);
                    debug!(%peer, "initiating x3dh");
                }
            }
            RoomMode::Group => {
                if state.room_keys.is_some() {
                    let frames = self.distribute_sender_key(&mut state, Some(&peer))?;
                    outputs.extend(frames);
                }
            }
        }
        Ok(outputs)
    }

    async fn peer_left(&self, address: &str) -> Result<Vec<Output>, SessionError> {
        let peer = address.to_lowercase();
        let mut state = self.state.lock().await;
        state.peers.remove(&peer);
        state.pending_x3dh.remove(&peer);
        state.ratchets.remove(&peer);
        state.peer_sender_keys.remove(&peer);
        state.auth_failures.remove(&peer);
        debug!(%peer, "peer left");

        // Rekey so the departed member cannot read anything sent from here on.
        if self.mode == RoomMode::Group
            && state.my_sender_key.is_some()
            && state.room_keys.is_some()
        {
            state.my_sender_key = Some(SenderKeyState::create(&self.address));
            let frames = self.distribute_sender_key(&mut state, None)?;
            return Ok(frames);
        }
        Ok(vec![])
    }

    /// Seal our current chain key to `only_to`, or to every known peer.
    ///
    /// The envelope carries no chain index, so a chain that has already
    /// advanced cannot be handed to a newcomer — it is rotated first and
    /// re-distributed to the whole room (membership change forces
    /// rotation).
    fn distribute_sender_key(
        &self,
        state: &mut RoomState,
        only_to: Option<&str>,
    ) -> Result<Vec<Output>, SessionError> {
        let pair = state.room_keys.as_ref().ok_or(SessionError::NotReady)?;

        let rotate = state.my_sender_key.as_ref().is_some_and(|sk| sk.chain_index() > 0);
        if state.my_sender_key.is_none() || (rotate && only_to.is_some()) {
            state.my_sender_key = Some(SenderKeyState::create(&self.address));
        }
        let sender_key = state
            .my_sender_key
            .as_ref()
            .ok_or(SessionError::NotReady)?;
        let rotated = rotate && only_to.is_some();

        let recipients: Vec<(&String, &PeerPublicKey)> = match (only_to, rotated) {
            (Some(peer), false) => state.peers.get_key_value(peer).into_iter().collect(),
            _ => state.peers.iter().collect(),
        };

        let mut outputs = Vec::new();
        for (peer, public) in recipients {
            let envelope = sender_key::seal_chain_key(
                pair,
                &self.address,
                peer,
                public,
                sender_key.chain_key_bytes(),
            )?;
            debug!(%peer, rotated, "sender key sealed");
            outputs.push(Output::Frame(Frame::SenderKey(envelope)));
        }
        Ok(outputs)
    }

    // ── Handshake ────────────────────────────────────────────────────────

    async fn accept_init(
        &self,
        from: &str,
        identity: &Jwk,
        ephemeral: &Jwk,
    ) -> Result<Vec<Output>, SessionError> {
        if self.mode != RoomMode::Direct {
            debug!(%from, "x3dh init in a group room dropped");
            return Ok(vec![]);
        }
        let peer = from.to_lowercase();
        let their_identity = keys::import_public_jwk(identity)?;
        let their_ephemeral = keys::import_public_jwk(ephemeral)?;

        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(vec![]);
        }
        let pair = state.room_keys.as_ref().ok_or(SessionError::NotReady)?;

        let (root, my_ephemeral) = x3dh::respond(pair, &their_identity, &their_ephemeral)?;
        let response = Frame::X3dhResponse {
            from_address: self.address.clone(),
            identity_public_key: pair.public_jwk(),
            ephemeral_public_key: my_ephemeral.public_jwk(),
        };
        let ratchet = DoubleRatchetState::new_responder(&self.address, root, my_ephemeral);

        state.peers.insert(peer.clone(), their_identity);
        state.ratchets.insert(peer.clone(), Arc::new(Mutex::new(ratchet)));
        debug!(%peer, "x3dh init accepted");

        let mut outputs = vec![Output::Frame(response)];
        outputs.extend(state.advance_status(EncryptionStatus::Ready));
        Ok(outputs)
    }

    async fn accept_response(
        &self,
        from: &str,
        identity: &Jwk,
        ephemeral: &Jwk,
    ) -> Result<Vec<Output>, SessionError> {
        if self.mode != RoomMode::Direct {
            debug!(%from, "x3dh response in a group room dropped");
            return Ok(vec![]);
        }
        let peer = from.to_lowercase();
        let their_identity = keys::import_public_jwk(identity)?;
        let their_ephemeral = keys::import_public_jwk(ephemeral)?;

        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(vec![]);
        }
        let pending = state
            .pending_x3dh
            .remove(&peer)
            .ok_or(SessionError::UnexpectedHandshake)?;
        let pair = state.room_keys.as_ref().ok_or(SessionError::NotReady)?;

        let root = x3dh::complete(pair, &pending, &their_identity, &their_ephemeral)?;
        let ratchet = DoubleRatchetState::new_initiator(&self.address, root, &their_ephemeral)?;
        state.ratchets.insert(peer.clone(), Arc::new(Mutex::new(ratchet)));
        debug!(%peer, "x3dh complete");

        Ok(state.advance_status(EncryptionStatus::Ready).into_iter().collect())
    }

    async fn accept_sender_key(&self, envelope: SealedSenderKey) -> Result<Vec<Output>, SessionError> {
        if self.mode != RoomMode::Group {
            debug!(from = %envelope.from_address, "sender key in a direct room dropped");
            return Ok(vec![]);
        }
        let peer = envelope.from_address.to_lowercase();
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(vec![]);
        }
        let Some(pair) = state.room_keys.as_ref() else {
            return Err(SessionError::NotReady);
        };
        let Some(sender_public) = state.peers.get(&peer) else {
            debug!(%peer, "sender key from unknown peer dropped");
            return Ok(vec![]);
        };

        match sender_key::open_chain_key(pair, &self.address, sender_public, &envelope) {
            Ok(chain) => {
                state.peer_sender_keys.insert(peer.clone(), chain);
                debug!(%peer, "sender key installed");
                Ok(state.advance_status(EncryptionStatus::Ready).into_iter().collect())
            }
            Err(CryptoError::InvalidSenderKey) => {
                // Unopenable envelope: the peer is ignored, not the room.
                warn!(%peer, "sender key envelope failed to open; peer ignored");
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Outbound chat ────────────────────────────────────────────────────

    pub async fn send_text(&self, body: &str) -> Result<Vec<Output>, SessionError> {
        self.encrypt_payload(&ChatPayload::Text { body: body.to_string() }).await
    }

    /// Encrypt and announce a media transfer, then emit its chunk stream.
    pub async fn send_media(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
        thumbnail: Option<String>,
    ) -> Result<Vec<Output>, SessionError> {
        let transfer =
            media::prepare_transfer(&self.address, file_name, mime_type, bytes, thumbnail)?;
        let mut outputs = self
            .encrypt_payload(&ChatPayload::FileTransferStart(transfer.meta.clone()))
            .await?;
        outputs.extend(transfer.chunks.into_iter().map(Output::Frame));
        outputs.push(Output::Frame(transfer.complete));
        Ok(outputs)
    }

    async fn encrypt_payload(&self, payload: &ChatPayload) -> Result<Vec<Output>, SessionError> {
        let padded = codec::pad(&serde_json::to_vec(payload)?, PaddingMode::default());

        match self.mode {
            RoomMode::Direct => {
                // 1:1 rooms have a single peer session.
                let session = {
                    let state = self.state.lock().await;
                    if state.closed {
                        return Err(SessionError::NotReady);
                    }
                    state.ratchets.values().next().cloned()
                }
                .ok_or(SessionError::NotReady)?;

                let msg = {
                    let mut ratchet = session.lock().await;
                    ratchet.encrypt(&padded)?
                };

                let mut outputs = vec![Output::Frame(Frame::Chat(ChatMessage::Direct(msg)))];
                let mut state = self.state.lock().await;
                outputs.extend(state.advance_status(EncryptionStatus::Ready));
                Ok(outputs)
            }
            RoomMode::Group => {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(SessionError::NotReady);
                }
                if state.my_sender_key.is_none() {
                    state.my_sender_key = Some(SenderKeyState::create(&self.address));
                }
                let chain = state.my_sender_key.as_mut().ok_or(SessionError::NotReady)?;
                let msg = chain.encrypt(&padded)?;
                let mut outputs = vec![Output::Frame(Frame::Chat(ChatMessage::Group(msg)))];
                outputs.extend(state.advance_status(EncryptionStatus::Ready));
                Ok(outputs)
            }
        }
    }

    // ── Inbound chat ─────────────────────────────────────────────────────

    async fn decrypt_direct(&self, msg: RatchetMessage) -> Result<Vec<Output>, SessionError> {
        let peer = msg.sender.to_lowercase();
        let session = {
            let state = self.state.lock().await;
            state.ratchets.get(&peer).cloned()
        };
        let Some(session) = session else {
            debug!(%peer, "chat frame without a session dropped");
            return Ok(vec![]);
        };

        let result = {
            let mut ratchet = session.lock().await;
            ratchet.decrypt(&msg)
        };

        match result {
            Ok(plaintext) => {
                let payload: ChatPayload = serde_json::from_slice(&codec::unpad(&plaintext)?)?;
                let mut state = self.state.lock().await;
                if state.closed {
                    return Ok(vec![]);
                }
                state.auth_failures.remove(&peer);
                let mut outputs: Vec<Output> =
                    state.advance_status(EncryptionStatus::Ready).into_iter().collect();
                outputs.push(self.deliver_payload(&mut state, &peer, payload)?);
                Ok(outputs)
            }
            Err(CryptoError::AuthenticationFailure) => {
                warn!(%peer, "ratchet decrypt failed authentication; frame dropped");
                let mut state = self.state.lock().await;
                Ok(state.record_auth_failure(&peer).into_iter().collect())
            }
            Err(CryptoError::SkipOverflow { requested, max }) => {
                // The receiving chain is poisoned; tear the session down
                // and re-run the handshake from the tiebreak winner.
                warn!(%peer, requested, max, "skip overflow; session poisoned");
                let mut state = self.state.lock().await;
                state.ratchets.remove(&peer);
                let mut outputs = vec![Output::Warning {
                    peer: peer.clone(),
                    detail: "ratchet desynchronised; renegotiating".to_string(),
                }];
                if self.address < peer {
                    if let Some(pair) = state.room_keys.as_ref() {
                        let pending = x3dh::initiate();
                        outputs.push(Output::Frame(Frame::X3dhInit {
                            from_address: self.address.clone(),
                            identity_public_key: pair.public_jwk(),
                            ephemeral_public_key: pending.ephemeral.public_jwk(),
                        }));
                        state.pending_x3dh.insert(peer, pending);
                    }
                }
                Ok(outputs)
            }
            Err(CryptoError::StaleMessage) => {
                debug!(%peer, "stale chat frame dropped");
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn decrypt_group(&self, msg: GroupMessage) -> Result<Vec<Output>, SessionError> {
        let peer = msg.sender_address.to_lowercase();
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(vec![]);
        }
        let Some(chain) = state.peer_sender_keys.get_mut(&peer) else {
            // No chain key yet: pre-handshake backlog is dropped, never
            // buffered.
            let dropped = SessionError::UnknownSender(peer);
            debug!(%dropped, "group frame dropped");
            return Ok(vec![]);
        };

        match chain.decrypt(&msg) {
            Ok(plaintext) => {
                let payload: ChatPayload = serde_json::from_slice(&codec::unpad(&plaintext)?)?;
                state.auth_failures.remove(&peer);
                let mut outputs: Vec<Output> =
                    state.advance_status(EncryptionStatus::Ready).into_iter().collect();
                outputs.push(self.deliver_payload(&mut state, &peer, payload)?);
                Ok(outputs)
            }
            Err(CryptoError::AuthenticationFailure) => {
                warn!(%peer, "group decrypt failed authentication; frame dropped");
                Ok(state.record_auth_failure(&peer).into_iter().collect())
            }
            Err(CryptoError::StaleMessage) => {
                debug!(%peer, "stale group frame dropped");
                Ok(vec![])
            }
            Err(CryptoError::SkipOverflow { requested, max }) => {
                warn!(%peer, requested, max, "group frame beyond skip window dropped");
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }

    fn deliver_payload(
        &self,
        state: &mut RoomState,
        peer: &str,
        payload: ChatPayload,
    ) -> Result<Output, SessionError> {
        match payload {
            ChatPayload::Text { body } => {
                Ok(Output::Message { sender: peer.to_string(), body })
            }
            ChatPayload::FileTransferStart(meta) => {
                debug!(%peer, transfer = %meta.transfer_id, "transfer announced");
                Ok(Output::Media(state.transfers.register(meta)?))
            }
        }
    }
}
