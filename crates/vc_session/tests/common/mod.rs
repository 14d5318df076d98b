//! Shared helpers for session integration tests.
#![allow(dead_code)]

use vc_crypto::derive::MasterSeed;
use vc_proto::Frame;
use vc_session::{EncryptionStatus, Output, RoomSession};

pub fn seed(byte: u8) -> MasterSeed {
    MasterSeed::from_wallet_signature(&[byte; 65]).unwrap()
}

pub fn take_frames(outputs: Vec<Output>) -> Vec<Frame> {
    outputs
        .into_iter()
        .filter_map(|out| match out {
            Output::Frame(frame) => Some(frame),
            _ => None,
        })
        .collect()
}

pub fn messages(outputs: &[Output]) -> Vec<(String, String)> {
    outputs
        .iter()
        .filter_map(|out| match out {
            Output::Message { sender, body } => Some((sender.clone(), body.clone())),
            _ => None,
        })
        .collect()
}

pub fn warnings(outputs: &[Output]) -> usize {
    outputs
        .iter()
        .filter(|out| matches!(out, Output::Warning { .. }))
        .count()
}

pub async fn deliver(to: &RoomSession, frames: Vec<Frame>) -> Vec<Output> {
    let mut outputs = Vec::new();
    for frame in frames {
        outputs.extend(to.handle_frame(frame).await.unwrap());
    }
    outputs
}

/// Run the announce → init → response exchange to completion.
pub async fn establish_direct(
    a: &RoomSession,
    b: &RoomSession,
    seed_a: &MasterSeed,
    seed_b: &MasterSeed,
) {
    let announce_a = take_frames(a.begin(seed_a).await.unwrap());
    let announce_b = take_frames(b.begin(seed_b).await.unwrap());

    let mut to_a = take_frames(deliver(b, announce_a).await);
    let mut to_b = take_frames(deliver(a, announce_b).await);
    while !(to_a.is_empty() && to_b.is_empty()) {
        let from_b = take_frames(deliver(b, std::mem::take(&mut to_b)).await);
        let from_a = take_frames(deliver(a, std::mem::take(&mut to_a)).await);
        to_a = from_b;
        to_b = from_a;
    }

    assert_eq!(a.status().await, EncryptionStatus::Ready);
    assert_eq!(b.status().await, EncryptionStatus::Ready);
}
