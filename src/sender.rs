//! Drives one outbound transfer: chunk, write, await ACK, retransmit on NAK
//! or timeout, then wait for the whole-transfer ACK.

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::framer::{self, AckMessage, AckType};
use crate::link::LinkAdapter;
use crate::config::TransportConfig;
use crate::stats::Statistics;
use crate::transfer::SendTransfer;

/// What the peer's whole-transfer ACK told the Sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalAck {
    /// `TRANSFER_COMPLETE`: the peer has every chunk and intends to respond.
    Complete,
    /// `TRANSFER_SUCCESS`: the peer has every chunk, transfer fully done.
    Success,
}

async fn next_matching_ack(
    control_rx: &mut mpsc::UnboundedReceiver<Bytes>,
    deadline: std::time::Duration,
    matches: impl Fn(&AckMessage) -> bool,
) -> Option<AckMessage> {
    let wait = async {
        loop {
            let frame = control_rx.recv().await?;
            match framer::decode_ack(&frame) {
                Ok(ack) if matches(&ack) => return Some(ack),
                Ok(_) => continue, // stray ACK for a different chunk, drop silently
                Err(_) => continue,
            }
        }
    };
    timeout(deadline, wait).await.unwrap_or(None)
}

/// Runs one send transfer to completion, reporting per-chunk progress via
/// `on_progress(current, total, sending=false)`.
///
/// `handoff`: when set, the transfer finalizes on the first `TRANSFER_COMPLETE`
/// (the peer has every chunk and a response is expected next, per `exchange`'s
/// request leg). When unset, a plain send only finalizes on `TRANSFER_SUCCESS`;
/// an intervening `TRANSFER_COMPLETE` is a stray ack and is dropped silently.
pub(crate) async fn run_send(
    link: &dyn LinkAdapter,
    config: &TransportConfig,
    stats: &Statistics,
    payload: &[u8],
    control_rx: &mut mpsc::UnboundedReceiver<Bytes>,
    handoff: bool,
    mut on_progress: impl FnMut(u32, u32, bool),
) -> Result<FinalAck> {
    if payload.len() > config.max_total_data_size() {
        return Err(Error::PayloadTooLarge {
            size: payload.len(),
            max: config.max_total_data_size(),
        });
    }

    let transfer = SendTransfer::build(payload, config.chunk_size())?;
    if transfer.total_chunks as usize > config.max_chunks_per_transfer() {
        return Err(Error::TooManyChunks {
            chunks: transfer.total_chunks as usize,
            max: config.max_chunks_per_transfer(),
        });
    }

    debug!(
        "[SEND] starting transfer: {} bytes, {} chunks",
        payload.len(),
        transfer.total_chunks
    );

    for (idx, frame) in transfer.frames.iter().enumerate() {
        let chunk_num = (idx + 1) as u16;
        let mut retries: u32 = 0;

        loop {
            debug!("[CHUNK] writing chunk {}/{}", chunk_num, transfer.total_chunks);
            link.write_data(frame.clone()).await?;
            stats.add_data_sent(frame.len());

            let ack = next_matching_ack(control_rx, config.ack_timeout(), |ack| {
                ack.chunk_number == chunk_num as u32
                    && matches!(ack.ack_type, AckType::ChunkReceived | AckType::ChunkError)
            })
            .await;

            match ack {
                Some(ack) if ack.ack_type == AckType::ChunkReceived => {
                    debug!("[ACK] chunk {} acknowledged", chunk_num);
                    break;
                }
                Some(_) => {
                    warn!("[RETRANSMIT] chunk {} NAKed by peer", chunk_num);
                }
                None => {
                    warn!("[TIMEOUT] no ACK for chunk {} within ack_timeout", chunk_num);
                    stats.inc_ack_timeouts();
                }
            }

            retries += 1;
            if retries >= config.max_retries() {
                return Err(Error::AckExhausted { chunk_num });
            }
            stats.inc_retransmissions();
        }

        on_progress(chunk_num as u32, transfer.total_chunks as u32, false);
        if idx + 1 < transfer.frames.len() {
            tokio::time::sleep(config.inter_chunk_delay()).await;
        }
    }

    debug!("[TRANSFER] all chunks acknowledged, awaiting final ACK");
    let final_ack = next_matching_ack(control_rx, config.ack_timeout(), |ack| {
        if handoff {
            matches!(
                ack.ack_type,
                AckType::TransferComplete | AckType::TransferSuccess | AckType::TransferFailed
            )
        } else {
            matches!(ack.ack_type, AckType::TransferSuccess | AckType::TransferFailed)
        }
    })
    .await;

    match final_ack {
        Some(ack) if ack.ack_type == AckType::TransferComplete => Ok(FinalAck::Complete),
        Some(ack) if ack.ack_type == AckType::TransferSuccess => Ok(FinalAck::Success),
        Some(_) => {
            stats.inc_crc_errors();
            Err(Error::GlobalCrcMismatch)
        }
        None => {
            stats.inc_timeouts();
            Err(Error::FinalAckTimeout)
        }
    }
}
