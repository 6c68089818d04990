use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Categorical transport failures.
///
/// Variants are grouped to match the error taxonomy: validation, integrity,
/// liveness, exhaustion, link, busy/cancel, and configuration.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    // --- Validation: pre-flight or framing, no wire effect ---
    #[error("payload of {size} bytes exceeds max_total_data_size ({max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("transfer would need {chunks} chunks, exceeds max_chunks_per_transfer ({max})")]
    TooManyChunks { chunks: usize, max: usize },
    #[error("chunk payload of {size} bytes exceeds the frame's chunk size budget")]
    FrameTooLarge { size: usize },

    // --- Framing errors surfaced by the Framer ---
    #[error("frame shorter than the minimum header size")]
    FrameTooShort,
    #[error("frame length does not match header's declared data_size")]
    FrameSizeMismatch,
    #[error("frame header field out of range")]
    FrameFieldOutOfRange,

    // --- Integrity: ACK CHUNK_ERROR / TRANSFER_FAILED emitted, transfer cancelled ---
    #[error("reassembled payload failed whole-transfer CRC-32 validation")]
    GlobalCrcMismatch,
    #[error("chunk header inconsistent with the active transfer (total_chunks or global_crc32 changed)")]
    Inconsistent,

    // --- Liveness: transfer cancelled, no further wire traffic ---
    #[error("no inbound chunk before chunk_timeout elapsed")]
    ChunkTimeout,
    #[error("no final transfer ACK before ack_timeout")]
    FinalAckTimeout,
    #[error("deadline elapsed waiting for a receive transfer to complete")]
    Timeout,

    // --- Exhaustion ---
    #[error("chunk {chunk_num} exhausted max_retries without a successful ACK")]
    AckExhausted { chunk_num: u16 },

    // --- Link ---
    #[error("link adapter rejected a write: {0}")]
    LinkWriteFailed(String),
    #[error("link adapter reports not connected")]
    Disconnected,

    // --- Busy / cancel ---
    #[error("session is not idle; a transfer is already in flight")]
    Busy,
    #[error("operation cancelled")]
    Cancelled,

    // --- Configuration ---
    #[error("invalid transport configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns the final peer-facing ACK this error should produce, if any.
    ///
    /// Validation errors never touch the wire; integrity/liveness errors do.
    pub(crate) fn final_ack_kind(&self) -> Option<crate::framer::AckType> {
        use crate::framer::AckType;
        match self {
            Error::GlobalCrcMismatch => Some(AckType::TransferFailed),
            _ => None,
        }
    }
}
