//! The `Transfer` entity shared by [`crate::sender`] and [`crate::receiver`]:
//! a send-side pre-framed chunk buffer and a receive-side reassembly slot
//! array, each scoped to the lifetime of one transfer.

use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::framer::{self, crc32};

/// The Sender's view of one outbound transfer: every chunk pre-framed once
/// up front so a retransmit never recomputes a CRC.
pub(crate) struct SendTransfer {
    pub(crate) frames: Vec<Bytes>,
    pub(crate) total_chunks: u16,
    pub(crate) global_crc32: u32,
    pub(crate) total_data_size: u32,
}

impl SendTransfer {
    pub(crate) fn build(payload: &[u8], chunk_size: usize) -> Result<Self> {
        let total_chunks = payload.len().div_ceil(chunk_size).max(1);
        let global_crc32 = crc32(payload);
        let total_data_size = payload.len() as u32;

        let mut frames = Vec::with_capacity(total_chunks);
        for i in 0..total_chunks {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            let chunk_num = (i + 1) as u16;
            let frame = framer::encode_chunk(
                chunk_num,
                total_chunks as u16,
                global_crc32,
                total_data_size,
                &payload[start..end],
                chunk_size,
            )?;
            frames.push(frame);
        }

        Ok(SendTransfer {
            frames,
            total_chunks: total_chunks as u16,
            global_crc32,
            total_data_size,
        })
    }
}

/// The Receiver's view of one inbound transfer: an ordered slot array filled
/// as chunks arrive, in any order, and concatenated once complete.
pub(crate) struct RecvTransfer {
    pub(crate) slots: Vec<Option<Bytes>>,
    pub(crate) total_chunks: u16,
    pub(crate) global_crc32: u32,
    pub(crate) total_data_size: u32,
    pub(crate) received_count: usize,
    pub(crate) last_activity: Instant,
}

impl RecvTransfer {
    pub(crate) fn new(total_chunks: u16, global_crc32: u32, total_data_size: u32) -> Self {
        RecvTransfer {
            slots: vec![None; total_chunks as usize],
            total_chunks,
            global_crc32,
            total_data_size,
            received_count: 0,
            last_activity: Instant::now(),
        }
    }

    /// Returns `true` if this is a fresh fill (not a duplicate).
    pub(crate) fn fill(&mut self, chunk_num: u16, payload: Bytes) -> bool {
        let idx = (chunk_num - 1) as usize;
        if self.slots[idx].is_some() {
            return false;
        }
        self.slots[idx] = Some(payload);
        self.received_count += 1;
        self.last_activity = Instant::now();
        true
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks as usize
    }

    pub(crate) fn assemble(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.total_data_size as usize);
        for slot in &self.slots {
            let payload = slot.as_ref().expect("assemble called before completion");
            buf.extend_from_slice(payload);
        }
        let assembled = buf.freeze();
        if crc32(&assembled) != self.global_crc32 {
            return Err(Error::GlobalCrcMismatch);
        }
        Ok(assembled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_transfer_chunks_evenly() {
        let payload = vec![0xAB; 500];
        let t = SendTransfer::build(&payload, 168).unwrap();
        assert_eq!(t.total_chunks, 3);
        assert_eq!(t.frames.len(), 3);
    }

    #[test]
    fn recv_transfer_duplicate_fill_is_noop() {
        let mut t = RecvTransfer::new(2, 0, 10);
        assert!(t.fill(1, Bytes::from_static(b"a")));
        assert!(!t.fill(1, Bytes::from_static(b"b")));
        assert_eq!(t.received_count, 1);
    }

    #[test]
    fn recv_transfer_assemble_detects_crc_mismatch() {
        let mut t = RecvTransfer::new(1, 0xDEAD_BEEF, 3);
        t.fill(1, Bytes::from_static(b"abc"));
        assert_eq!(t.assemble().unwrap_err(), Error::GlobalCrcMismatch);
    }

    #[test]
    fn recv_transfer_assemble_succeeds_on_matching_crc() {
        let payload = b"hello";
        let mut t = RecvTransfer::new(1, crc32(payload), payload.len() as u32);
        t.fill(1, Bytes::copy_from_slice(payload));
        assert_eq!(&t.assemble().unwrap()[..], payload);
    }
}
