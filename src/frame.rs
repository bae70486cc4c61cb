//! RFC 6455 §5.2 frame header codec.
//!
//! This module only deals with the 2-to-14-byte frame header; payload bytes are read/written by
//! whoever holds the header (see [`crate::read`]/[`crate::write`] for the streaming path and
//! [`read_control_frame`]/[`write_control_frame`] below for the small, unfragmented control
//! frames the connection engine reads and writes inline).

use crate::error::Error;
use crate::mask;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a single frame's payload_length (16 MiB) — see [`crate::config::WebSocketConfig`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A decoded/to-be-encoded frame header, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload_length: u64,
    pub mask_key: [u8; 4],
}

impl FrameHeader {
    pub fn data(fin: bool, opcode: OpCode, payload_length: u64, mask_key: Option<[u8; 4]>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: mask_key.is_some(),
            payload_length,
            mask_key: mask_key.unwrap_or([0; 4]),
        }
    }
}

/// A fully-buffered frame (header + payload). Only used for control frames, which RFC 6455
/// requires to be unfragmented and at most 125 bytes, so buffering the whole thing is cheap and
/// keeps the connection engine's control-frame handling a single read/write call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Reads one frame header off `reader`. Does not validate fin/opcode/rsv/mask-direction
/// invariants — that's the caller's job, since the right error (and whether it's fatal to the
/// connection) depends on context the codec doesn't have (server vs. client, negotiated
/// extensions, control vs. data).
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<FrameHeader, Error> {
    let mut first_two = [0u8; 2];
    reader.read_exact(&mut first_two).await?;

    let fin = (first_two[0] & 0b1000_0000) != 0;
    let rsv1 = (first_two[0] & 0b0100_0000) != 0;
    let rsv2 = (first_two[0] & 0b0010_0000) != 0;
    let rsv3 = (first_two[0] & 0b0001_0000) != 0;
    let opcode = OpCode::from_u8(first_two[0] & 0b0000_1111)?;

    let masked = (first_two[1] & 0b1000_0000) != 0;
    let mut payload_length = (first_two[1] & 0b0111_1111) as u64;

    if payload_length == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        payload_length = u16::from_be_bytes(ext) as u64;
    } else if payload_length == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        payload_length = u64::from_be_bytes(ext);
        // RFC 6455 §5.2: the most significant bit of the 64-bit length MUST be zero.
        if payload_length & (1 << 63) != 0 {
            return Err(Error::InvalidPayloadLength);
        }
    }

    let mut mask_key = [0u8; 4];
    if masked {
        reader.read_exact(&mut mask_key).await?;
    }

    Ok(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        masked,
        payload_length,
        mask_key,
    })
}

/// Writes one frame header to `writer`.
pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &FrameHeader,
) -> Result<(), Error> {
    let first_byte = (header.fin as u8) << 7
        | (header.rsv1 as u8) << 6
        | (header.rsv2 as u8) << 5
        | (header.rsv3 as u8) << 4
        | header.opcode.as_u8();

    let mask_bit = (header.masked as u8) << 7;

    let mut out = Vec::with_capacity(14);
    out.push(first_byte);

    if header.payload_length <= 125 {
        out.push(mask_bit | header.payload_length as u8);
    } else if header.payload_length <= u16::MAX as u64 {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(header.payload_length as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&header.payload_length.to_be_bytes());
    }

    if header.masked {
        out.extend_from_slice(&header.mask_key);
    }

    writer.write_all(&out).await?;
    Ok(())
}

/// Reads a whole control frame (header + payload). Callers must have already confirmed the
/// header describes a control opcode with `payload_length <= 125`.
pub async fn read_control_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    header: &FrameHeader,
) -> Result<Vec<u8>, Error> {
    let mut payload = vec![0u8; header.payload_length as usize];
    reader.read_exact(&mut payload).await?;
    if header.masked {
        mask::mask(&mut payload, header.mask_key, 0);
    }
    Ok(payload)
}

/// Writes a whole control frame (header + payload) atomically from the caller's perspective —
/// the caller is expected to hold the write-frame lock across this call (see
/// [`crate::connection`]).
pub async fn write_control_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: OpCode,
    mut payload: Vec<u8>,
    mask_key: Option<[u8; 4]>,
) -> Result<(), Error> {
    debug_assert!(payload.len() <= 125);
    let header = FrameHeader::data(true, opcode, payload.len() as u64, mask_key);
    write_header(writer, &header).await?;
    if let Some(key) = mask_key {
        mask::mask(&mut payload, key, 0);
    }
    writer.write_all(&payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn round_trip(header: FrameHeader) -> FrameHeader {
        let mut buf = Vec::new();
        write_header(&mut buf, &header).await.unwrap();
        let mut cursor = Cursor::new(buf);
        read_header(&mut cursor).await.unwrap()
    }

    #[tokio::test]
    async fn header_round_trips_at_length_boundaries() {
        for len in [0u64, 125, 126, 127, 65535, 65536, 65537] {
            let header = FrameHeader::data(true, OpCode::Binary, len, None);
            let got = round_trip(header).await;
            assert_eq!(got.payload_length, len);
            assert_eq!(got.opcode, OpCode::Binary);
            assert!(got.fin);
            assert!(!got.masked);
        }
    }

    #[tokio::test]
    async fn header_round_trips_huge_length_without_payload() {
        let header = FrameHeader::data(true, OpCode::Binary, (1u64 << 63) - 1, None);
        let got = round_trip(header).await;
        assert_eq!(got.payload_length, (1u64 << 63) - 1);
    }

    #[tokio::test]
    async fn header_round_trips_masked() {
        let header = FrameHeader::data(false, OpCode::Text, 10, Some([1, 2, 3, 4]));
        let got = round_trip(header).await;
        assert!(got.masked);
        assert_eq!(got.mask_key, [1, 2, 3, 4]);
        assert!(!got.fin);
    }

    #[tokio::test]
    async fn high_bit_of_64_bit_length_is_rejected() {
        let mut buf = Vec::new();
        buf.push(0b1000_0010); // fin=1, opcode=binary
        buf.push(127); // unmasked, extended 64-bit length
        buf.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(read_header(&mut cursor).await.is_err());
    }

    #[test]
    fn opcode_round_trips() {
        for byte in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let op = OpCode::from_u8(byte).unwrap();
            assert_eq!(op.as_u8(), byte);
        }
        assert!(OpCode::from_u8(0x3).is_err());
        assert!(OpCode::from_u8(0xB).is_err());
    }

    #[test]
    fn control_opcodes_are_identified() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(!OpCode::Continuation.is_control());
    }
}
