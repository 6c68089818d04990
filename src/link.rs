//! The link adapter contract and two in-repo adapters used by tests and
//! demos: [`LoopbackLink`] (lossless) and [`HarnessLink`] (configurable
//! drop/corrupt, for the retransmission and CRC-rejection tests in the
//! testable-properties section of the spec).
//!
//! Wiring this trait to a real BLE GATT stack is out of scope for this
//! crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Two fire-and-forget write sinks and two notification sources, the thin
/// contract the protocol core talks to.
#[async_trait]
pub trait LinkAdapter: Send + Sync {
    fn mtu(&self) -> u16;
    async fn write_data(&self, frame: Bytes) -> Result<()>;
    async fn write_control(&self, frame: Bytes) -> Result<()>;
    /// Registers the channel that inbound data-channel frames are forwarded
    /// to. A link has exactly one subscriber; calling this twice replaces
    /// nothing and simply drops the second subscription's forwarding task
    /// once the underlying receiver has already been taken.
    fn subscribe_data(&self, sender: mpsc::UnboundedSender<Bytes>);
    fn subscribe_control(&self, sender: mpsc::UnboundedSender<Bytes>);
    fn is_connected(&self) -> bool;
}

/// A zero-loss, in-memory link connecting two `Session`s in the same
/// process. `LoopbackLink::pair` returns both ends.
pub struct LoopbackLink {
    mtu: u16,
    data_tx: mpsc::UnboundedSender<Bytes>,
    control_tx: mpsc::UnboundedSender<Bytes>,
    data_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    connected: AtomicBool,
}

impl LoopbackLink {
    pub fn pair(mtu: u16) -> (Self, Self) {
        let (a_data_tx, b_data_rx) = mpsc::unbounded_channel();
        let (b_data_tx, a_data_rx) = mpsc::unbounded_channel();
        let (a_control_tx, b_control_rx) = mpsc::unbounded_channel();
        let (b_control_tx, a_control_rx) = mpsc::unbounded_channel();

        let a = LoopbackLink {
            mtu,
            data_tx: a_data_tx,
            control_tx: a_control_tx,
            data_rx: Mutex::new(Some(a_data_rx)),
            control_rx: Mutex::new(Some(a_control_rx)),
            connected: AtomicBool::new(true),
        };
        let b = LoopbackLink {
            mtu,
            data_tx: b_data_tx,
            control_tx: b_control_tx,
            data_rx: Mutex::new(Some(b_data_rx)),
            control_rx: Mutex::new(Some(b_control_rx)),
            connected: AtomicBool::new(true),
        };
        (a, b)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

fn forward(mut rx: mpsc::UnboundedReceiver<Bytes>, tx: mpsc::UnboundedSender<Bytes>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if tx.send(frame).is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl LinkAdapter for LoopbackLink {
    fn mtu(&self) -> u16 {
        self.mtu
    }

    async fn write_data(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.data_tx
            .send(frame)
            .map_err(|_| Error::LinkWriteFailed("data channel receiver dropped".into()))
    }

    async fn write_control(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.control_tx
            .send(frame)
            .map_err(|_| Error::LinkWriteFailed("control channel receiver dropped".into()))
    }

    fn subscribe_data(&self, sender: mpsc::UnboundedSender<Bytes>) {
        if let Some(rx) = self.data_rx.lock().unwrap().take() {
            forward(rx, sender);
        }
    }

    fn subscribe_control(&self, sender: mpsc::UnboundedSender<Bytes>) {
        if let Some(rx) = self.control_rx.lock().unwrap().take() {
            forward(rx, sender);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// What a [`HarnessLink`] filter does with one outbound frame.
pub enum FrameAction {
    Pass,
    Drop,
    Mutate(Bytes),
}

/// A stateful per-frame rule. Receives the frame about to be written and the
/// 0-based call count seen so far (so tests can express "drop the first `k`
/// ACKs").
pub type FrameFilter = Arc<dyn Fn(&Bytes, u32) -> FrameAction + Send + Sync>;

/// Wraps a [`LoopbackLink`] with configurable, deterministic drop/corrupt
/// rules on outbound frames — used to exercise retransmission bounds and CRC
/// rejection without relying on a real, flaky link.
pub struct HarnessLink {
    inner: LoopbackLink,
    data_filter: Mutex<Option<FrameFilter>>,
    control_filter: Mutex<Option<FrameFilter>>,
    data_calls: Mutex<HashMap<u32, u32>>,
    control_calls: Mutex<HashMap<u32, u32>>,
}

impl HarnessLink {
    pub fn wrap(inner: LoopbackLink) -> Self {
        HarnessLink {
            inner,
            data_filter: Mutex::new(None),
            control_filter: Mutex::new(None),
            data_calls: Mutex::new(HashMap::new()),
            control_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_data_filter(&self, filter: FrameFilter) {
        *self.data_filter.lock().unwrap() = Some(filter);
    }

    pub fn set_control_filter(&self, filter: FrameFilter) {
        *self.control_filter.lock().unwrap() = Some(filter);
    }

    /// Drops the first `k` control frames whose `chunk_number` field (bytes
    /// 1..5 of an ACK message) equals `chunk_num`; every other frame passes.
    pub fn drop_first_k_acks_for_chunk(&self, chunk_num: u32, k: u32) {
        let counts: Mutex<HashMap<u32, u32>> = Mutex::new(HashMap::new());
        self.set_control_filter(Arc::new(move |frame, _call| {
            if frame.len() < 5 {
                return FrameAction::Pass;
            }
            let this_chunk = u32::from_le_bytes(frame[1..5].try_into().unwrap());
            if this_chunk != chunk_num {
                return FrameAction::Pass;
            }
            let mut guard = counts.lock().unwrap();
            let seen = guard.entry(this_chunk).or_insert(0);
            if *seen < k {
                *seen += 1;
                FrameAction::Drop
            } else {
                FrameAction::Pass
            }
        }));
    }

    /// Drops every control frame, simulating a peer that never ACKs.
    pub fn drop_all_acks(&self) {
        self.set_control_filter(Arc::new(|_frame, _call| FrameAction::Drop));
    }

    /// Flips one payload byte of the data frame whose `chunk_num` field
    /// equals `chunk_num`, without touching `chunk_crc32` — i.e. corrupts the
    /// chunk in flight exactly once.
    pub fn corrupt_chunk_payload(&self, chunk_num: u16, byte_offset_in_payload: usize) {
        let done = Mutex::new(false);
        self.set_data_filter(Arc::new(move |frame, _call| {
            if frame.len() < crate::framer::HEADER_SIZE + 1 {
                return FrameAction::Pass;
            }
            let this_chunk = u16::from_le_bytes(frame[0..2].try_into().unwrap());
            if this_chunk != chunk_num || *done.lock().unwrap() {
                return FrameAction::Pass;
            }
            let idx = crate::framer::HEADER_SIZE + byte_offset_in_payload;
            if idx >= frame.len() {
                return FrameAction::Pass;
            }
            let mut mutated = frame.to_vec();
            mutated[idx] ^= 0xFF;
            *done.lock().unwrap() = true;
            FrameAction::Mutate(Bytes::from(mutated))
        }));
    }

    fn apply(filter: &Mutex<Option<FrameFilter>>, calls: &Mutex<HashMap<u32, u32>>, frame: Bytes) -> Option<Bytes> {
        let guard = filter.lock().unwrap();
        match guard.as_ref() {
            None => Some(frame),
            Some(f) => {
                let mut calls = calls.lock().unwrap();
                let n = calls.entry(0).or_insert(0);
                let call = *n;
                *n += 1;
                drop(calls);
                match f(&frame, call) {
                    FrameAction::Pass => Some(frame),
                    FrameAction::Drop => None,
                    FrameAction::Mutate(b) => Some(b),
                }
            }
        }
    }
}

#[async_trait]
impl LinkAdapter for HarnessLink {
    fn mtu(&self) -> u16 {
        self.inner.mtu()
    }

    async fn write_data(&self, frame: Bytes) -> Result<()> {
        match Self::apply(&self.data_filter, &self.data_calls, frame) {
            Some(frame) => self.inner.write_data(frame).await,
            None => Ok(()),
        }
    }

    async fn write_control(&self, frame: Bytes) -> Result<()> {
        match Self::apply(&self.control_filter, &self.control_calls, frame) {
            Some(frame) => self.inner.write_control(frame).await,
            None => Ok(()),
        }
    }

    fn subscribe_data(&self, sender: mpsc::UnboundedSender<Bytes>) {
        self.inner.subscribe_data(sender)
    }

    fn subscribe_control(&self, sender: mpsc::UnboundedSender<Bytes>) {
        self.inner.subscribe_control(sender)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_delivers_data_and_control() {
        let (a, b) = LoopbackLink::pair(185);
        let (data_tx, mut data_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        b.subscribe_data(data_tx);
        b.subscribe_control(control_tx);

        a.write_data(Bytes::from_static(b"chunk")).await.unwrap();
        a.write_control(Bytes::from_static(b"ack")).await.unwrap();

        assert_eq!(data_rx.recv().await.unwrap(), Bytes::from_static(b"chunk"));
        assert_eq!(control_rx.recv().await.unwrap(), Bytes::from_static(b"ack"));
    }

    #[tokio::test]
    async fn harness_drops_configured_acks() {
        let (a, b) = LoopbackLink::pair(185);
        let harness = HarnessLink::wrap(a);
        harness.drop_first_k_acks_for_chunk(1, 2);

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        b.subscribe_control(control_tx);

        let ack = crate::framer::encode_ack(crate::framer::AckType::ChunkReceived, 1, 3, 0);
        harness.write_control(ack.clone()).await.unwrap();
        harness.write_control(ack.clone()).await.unwrap();
        harness.write_control(ack.clone()).await.unwrap();

        let got = control_rx.recv().await.unwrap();
        assert_eq!(got, ack);
        assert!(control_rx.try_recv().is_err());
    }
}
