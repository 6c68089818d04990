//! Stateless chunk and ACK framing.
//!
//! Wire format (little-endian, no alignment padding):
//!
//! Chunk header (17 bytes): chunk_num(2) + total_chunks(2) + data_size(1) +
//! chunk_crc32(4) + global_crc32(4) + total_data_size(4).
//!
//! ACK message (13 bytes): ack_type(1) + chunk_number(4) + total_chunks(4) +
//! global_crc32(4).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

/// IEEE 802.3 CRC-32 (the same polynomial as `zlib.crc32` on the peer).
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

pub const HEADER_SIZE: usize = 17;
pub const ACK_MESSAGE_SIZE: usize = 13;

/// Parsed chunk header, as unpacked from the first [`HEADER_SIZE`] bytes of a
/// chunk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_num: u16,
    pub total_chunks: u16,
    pub data_size: u8,
    pub chunk_crc32: u32,
    pub global_crc32: u32,
    pub total_data_size: u32,
}

impl ChunkHeader {
    fn validate(&self, frame_len: usize) -> Result<()> {
        if self.chunk_num == 0 || self.chunk_num > self.total_chunks {
            return Err(Error::FrameFieldOutOfRange);
        }
        if frame_len != HEADER_SIZE + self.data_size as usize {
            return Err(Error::FrameSizeMismatch);
        }
        Ok(())
    }
}

/// Encode one chunk frame: header followed by `payload`.
///
/// Fails with [`Error::FrameTooLarge`] if `payload.len()` exceeds `chunk_size`
/// (the caller's `mtu - HEADER_SIZE`) or the 1-byte `data_size` field's range.
pub fn encode_chunk(
    chunk_num: u16,
    total_chunks: u16,
    global_crc32: u32,
    total_data_size: u32,
    payload: &[u8],
    chunk_size: usize,
) -> Result<Bytes> {
    if payload.len() > chunk_size || payload.len() > u8::MAX as usize {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
        });
    }

    let mut writer = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    writer.put_u16_le(chunk_num);
    writer.put_u16_le(total_chunks);
    writer.put_u8(payload.len() as u8);
    writer.put_u32_le(crc32(payload));
    writer.put_u32_le(global_crc32);
    writer.put_u32_le(total_data_size);
    writer.extend_from_slice(payload);
    Ok(writer.freeze())
}

/// Decode a chunk frame into its header and payload slice.
pub fn decode_chunk(frame: &[u8]) -> Result<(ChunkHeader, Bytes)> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::FrameTooShort);
    }

    let mut reader = &frame[..HEADER_SIZE];
    let chunk_num = reader.get_u16_le();
    let total_chunks = reader.get_u16_le();
    let data_size = reader.get_u8();
    let chunk_crc32 = reader.get_u32_le();
    let global_crc32 = reader.get_u32_le();
    let total_data_size = reader.get_u32_le();

    let header = ChunkHeader {
        chunk_num,
        total_chunks,
        data_size,
        chunk_crc32,
        global_crc32,
        total_data_size,
    };
    header.validate(frame.len())?;

    let payload = Bytes::copy_from_slice(&frame[HEADER_SIZE..]);
    Ok((header, payload))
}

/// ACK type, matching the wire's single `ack_type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckType {
    ChunkReceived = 0x01,
    ChunkError = 0x02,
    TransferComplete = 0x03,
    TransferSuccess = 0x04,
    TransferFailed = 0x05,
}

impl AckType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(AckType::ChunkReceived),
            0x02 => Ok(AckType::ChunkError),
            0x03 => Ok(AckType::TransferComplete),
            0x04 => Ok(AckType::TransferSuccess),
            0x05 => Ok(AckType::TransferFailed),
            _ => Err(Error::FrameFieldOutOfRange),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    pub ack_type: AckType,
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub global_crc32: u32,
}

pub fn encode_ack(
    ack_type: AckType,
    chunk_number: u32,
    total_chunks: u32,
    global_crc32: u32,
) -> Bytes {
    let mut writer = BytesMut::with_capacity(ACK_MESSAGE_SIZE);
    writer.put_u8(ack_type as u8);
    writer.put_u32_le(chunk_number);
    writer.put_u32_le(total_chunks);
    writer.put_u32_le(global_crc32);
    writer.freeze()
}

pub fn decode_ack(frame: &[u8]) -> Result<AckMessage> {
    if frame.len() < ACK_MESSAGE_SIZE {
        return Err(Error::FrameTooShort);
    }
    let mut reader = &frame[..ACK_MESSAGE_SIZE];
    let ack_type = AckType::from_u8(reader.get_u8())?;
    let chunk_number = reader.get_u32_le();
    let total_chunks = reader.get_u32_le();
    let global_crc32 = reader.get_u32_le();
    Ok(AckMessage {
        ack_type,
        chunk_number,
        total_chunks,
        global_crc32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // "123456789" -> 0xCBF43926 is the standard CRC-32/IEEE check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn chunk_round_trip() {
        let payload = b"hello world";
        let gcrc = crc32(payload);
        let frame = encode_chunk(1, 3, gcrc, 100, payload, 168).unwrap();
        let (header, decoded_payload) = decode_chunk(&frame).unwrap();
        assert_eq!(header.chunk_num, 1);
        assert_eq!(header.total_chunks, 3);
        assert_eq!(header.data_size as usize, payload.len());
        assert_eq!(header.chunk_crc32, gcrc);
        assert_eq!(header.global_crc32, gcrc);
        assert_eq!(header.total_data_size, 100);
        assert_eq!(&decoded_payload[..], payload);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; 200];
        let err = encode_chunk(1, 1, 0, 200, &payload, 168).unwrap_err();
        assert_eq!(err, Error::FrameTooLarge { size: 200 });
    }

    #[test]
    fn decode_rejects_short_frame() {
        let err = decode_chunk(&[0u8; 5]).unwrap_err();
        assert_eq!(err, Error::FrameTooShort);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let payload = b"abc";
        let mut frame = encode_chunk(1, 1, crc32(payload), 3, payload, 168)
            .unwrap()
            .to_vec();
        frame.push(0xFF); // trailing garbage byte not reflected in data_size
        let err = decode_chunk(&frame).unwrap_err();
        assert_eq!(err, Error::FrameSizeMismatch);
    }

    #[test]
    fn decode_rejects_chunk_num_out_of_range() {
        let payload = b"abc";
        let frame = encode_chunk(0, 1, crc32(payload), 3, payload, 168).unwrap();
        let err = decode_chunk(&frame).unwrap_err();
        assert_eq!(err, Error::FrameFieldOutOfRange);

        let frame2 = encode_chunk(2, 1, crc32(payload), 3, payload, 168).unwrap();
        let err2 = decode_chunk(&frame2).unwrap_err();
        assert_eq!(err2, Error::FrameFieldOutOfRange);
    }

    #[test]
    fn ack_round_trip() {
        let frame = encode_ack(AckType::ChunkReceived, 5, 10, 0xDEAD_BEEF);
        let ack = decode_ack(&frame).unwrap();
        assert_eq!(ack.ack_type, AckType::ChunkReceived);
        assert_eq!(ack.chunk_number, 5);
        assert_eq!(ack.total_chunks, 10);
        assert_eq!(ack.global_crc32, 0xDEAD_BEEF);
    }

    #[test]
    fn ack_decode_rejects_unknown_type() {
        let mut frame = encode_ack(AckType::ChunkReceived, 0, 0, 0).to_vec();
        frame[0] = 0x99;
        let err = decode_ack(&frame).unwrap_err();
        assert_eq!(err, Error::FrameFieldOutOfRange);
    }
}
