//! Host-side chunked reliable transport over a two-channel, MTU-bounded link.
//!
//! This crate implements the transport side of a chunked-transfer protocol
//! used to exchange arbitrary-sized binary payloads with a constrained peer
//! across a link whose native datagram size is bounded (≈185 bytes) and
//! whose only primitives are fire-and-forget writes and notification-based
//! reads on two logical channels (data and control).
//!
//! [`Session`] is the entry point: pair it with a [`LinkAdapter`]
//! implementation and drive transfers with `send`/`receive`/`exchange`.

#![warn(rust_2018_idioms)]

mod config;
mod error;
mod framer;
mod link;
mod receiver;
mod sender;
mod session;
mod stats;
mod transfer;

pub use config::{
    TransportConfig, DEFAULT_MAX_CHUNKS_PER_TRANSFER, DEFAULT_MAX_TOTAL_DATA_SIZE,
};
pub use error::{Error, Result};
pub use framer::{
    crc32, decode_ack, decode_chunk, encode_ack, encode_chunk, AckMessage, AckType, ChunkHeader,
    ACK_MESSAGE_SIZE, HEADER_SIZE,
};
pub use link::{FrameAction, FrameFilter, HarnessLink, LinkAdapter, LoopbackLink};
pub use session::{Session, DEFAULT_EXCHANGE_TIMEOUT};
pub use stats::Statistics;
