//! Length-delimited framing for stream-oriented transports (raw TCP, or a
//! future UDP-class session per spec §9). The WebSocket-class session does
//! not need this: a WS message is already a discrete frame. This mirrors
//! the teacher's own length-delimited `PacketDecoder`/`PacketEncoder`
//! (`valence_protocol`), generalized from a VarInt length prefix to a fixed
//! `u32` prefix since our payload schema is far smaller than a Minecraft
//! chunk packet and doesn't need VarInt's space savings.

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::{self, CodecError, WireFormat};
use crate::envelope::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the configured maximum of {1} bytes")]
    TooLarge(usize, usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub fn encode_frame(envelope: &Envelope, format: WireFormat, out: &mut BytesMut) -> Result<(), CodecError> {
    let body = codec::encode(envelope, format)?;
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
    Ok(())
}

/// Attempt to pull one complete frame out of `buf`. Returns `Ok(None)` when
/// more bytes are needed. `buf` is left untouched unless a full frame (or a
/// fatal oversize condition) was found.
pub fn try_decode_frame(
    buf: &mut BytesMut,
    format: WireFormat,
    max_message_size_bytes: usize,
) -> Result<Option<Envelope>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
    if len > max_message_size_bytes {
        return Err(FrameError::TooLarge(len, max_message_size_bytes));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(len);
    let envelope = codec::decode(&body, format)?;
    Ok(Some(envelope))
}
