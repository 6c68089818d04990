//! Accepts inbound chunks on the data channel: decode, verify, dedupe,
//! reassemble, and ACK.

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::framer::{self, AckType};
use crate::link::LinkAdapter;
use crate::stats::Statistics;
use crate::transfer::RecvTransfer;

/// Runs one receive transfer to completion: consumes data-channel frames
/// from `data_rx` until a whole payload is reassembled (or the transfer is
/// aborted), emitting per-chunk ACKs on the control channel as it goes.
pub(crate) async fn run_receive(
    link: &dyn LinkAdapter,
    config: &TransportConfig,
    stats: &Statistics,
    data_rx: &mut mpsc::UnboundedReceiver<Bytes>,
    mut on_progress: impl FnMut(u32, u32, bool),
) -> Result<Bytes> {
    let mut transfer: Option<RecvTransfer> = None;

    loop {
        let frame = match (&transfer, config.chunk_timeout()) {
            (Some(_), Some(dur)) => match timeout(dur, data_rx.recv()).await {
                Ok(Some(f)) => f,
                Ok(None) => return Err(Error::Disconnected),
                Err(_) => {
                    warn!("[TIMEOUT] no chunk within chunk_timeout, aborting transfer");
                    stats.inc_timeouts();
                    return Err(Error::ChunkTimeout);
                }
            },
            _ => data_rx.recv().await.ok_or(Error::Disconnected)?,
        };

        let (header, payload) = match framer::decode_chunk(&frame) {
            Ok(v) => v,
            Err(e) => {
                warn!("[CHUNK] dropping undecodable frame: {e}");
                let _ = link
                    .write_control(framer::encode_ack(AckType::ChunkError, 0, 0, 0))
                    .await;
                continue;
            }
        };

        if header.data_size as usize > config.chunk_size() {
            warn!("[CHUNK] chunk {} exceeds configured chunk_size", header.chunk_num);
            let _ = link
                .write_control(framer::encode_ack(
                    AckType::ChunkError,
                    header.chunk_num as u32,
                    header.total_chunks as u32,
                    header.global_crc32,
                ))
                .await;
            continue;
        }

        if framer::crc32(&payload) != header.chunk_crc32 {
            warn!("[CRC] chunk {} failed per-chunk CRC check", header.chunk_num);
            stats.inc_crc_errors();
            let _ = link
                .write_control(framer::encode_ack(
                    AckType::ChunkError,
                    header.chunk_num as u32,
                    header.total_chunks as u32,
                    header.global_crc32,
                ))
                .await;
            continue;
        }

        match &transfer {
            None => {
                if header.total_chunks as usize > config.max_chunks_per_transfer() {
                    warn!("[CHUNK] rejecting transfer exceeding max_chunks_per_transfer");
                    let _ = link
                        .write_control(framer::encode_ack(
                            AckType::ChunkError,
                            header.chunk_num as u32,
                            header.total_chunks as u32,
                            header.global_crc32,
                        ))
                        .await;
                    return Err(Error::TooManyChunks {
                        chunks: header.total_chunks as usize,
                        max: config.max_chunks_per_transfer(),
                    });
                }
                if header.total_data_size as usize > config.max_total_data_size() {
                    warn!("[CHUNK] rejecting transfer exceeding max_total_data_size");
                    let _ = link
                        .write_control(framer::encode_ack(
                            AckType::ChunkError,
                            header.chunk_num as u32,
                            header.total_chunks as u32,
                            header.global_crc32,
                        ))
                        .await;
                    return Err(Error::PayloadTooLarge {
                        size: header.total_data_size as usize,
                        max: config.max_total_data_size(),
                    });
                }
                transfer = Some(RecvTransfer::new(
                    header.total_chunks,
                    header.global_crc32,
                    header.total_data_size,
                ));
            }
            Some(active) => {
                if active.total_chunks != header.total_chunks
                    || active.global_crc32 != header.global_crc32
                {
                    warn!("[CHUNK] chunk {} inconsistent with active transfer", header.chunk_num);
                    let _ = link
                        .write_control(framer::encode_ack(
                            AckType::ChunkError,
                            header.chunk_num as u32,
                            header.total_chunks as u32,
                            header.global_crc32,
                        ))
                        .await;
                    return Err(Error::Inconsistent);
                }
            }
        }

        let active = transfer.as_mut().expect("initialized above");
        let is_fresh = active.fill(header.chunk_num, payload);
        if is_fresh {
            stats.add_data_received(header.data_size as usize);
        }

        debug!("[ACK] acknowledging chunk {}", header.chunk_num);
        link.write_control(framer::encode_ack(
            AckType::ChunkReceived,
            header.chunk_num as u32,
            header.total_chunks as u32,
            header.global_crc32,
        ))
        .await?;

        if is_fresh {
            on_progress(
                active.received_count as u32,
                active.total_chunks as u32,
                true,
            );
        }

        if active.is_complete() {
            let total_chunks = active.total_chunks as u32;
            let global_crc32 = active.global_crc32;
            match active.assemble() {
                Ok(assembled) => {
                    debug!("[TRANSFER] reassembly complete, {} bytes", assembled.len());
                    let _ = link
                        .write_control(framer::encode_ack(
                            AckType::TransferComplete,
                            0,
                            total_chunks,
                            global_crc32,
                        ))
                        .await;
                    let _ = link
                        .write_control(framer::encode_ack(
                            AckType::TransferSuccess,
                            0,
                            total_chunks,
                            global_crc32,
                        ))
                        .await;
                    stats.mark_successful_transfer();
                    return Ok(assembled);
                }
                Err(e) => {
                    warn!("[CRC] whole-transfer CRC mismatch on reassembly");
                    stats.inc_crc_errors();
                    let ack_type = e.final_ack_kind().unwrap_or(AckType::TransferFailed);
                    let _ = link
                        .write_control(framer::encode_ack(ack_type, 0, total_chunks, global_crc32))
                        .await;
                    return Err(e);
                }
            }
        }
    }
}
