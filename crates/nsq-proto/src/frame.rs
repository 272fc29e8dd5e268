//! NSQ wire frame format.
//!
//! Every frame nsqd sends is `[4-byte size][4-byte frame type][data]`, where
//! `size` covers everything after itself. Frame type `0` is a response
//! (including the special `_heartbeat_` payload), `1` is an error, and `2` is
//! a message. This module only decodes/encodes that envelope — it knows
//! nothing about sockets.

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const FRAME_TYPE_RESPONSE: i32 = 0;
pub const FRAME_TYPE_ERROR: i32 = 1;
pub const FRAME_TYPE_MESSAGE: i32 = 2;

/// Payload nsqd sends in place of a response frame every `heartbeat_interval`.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Payload nsqd sends in reply to a successful command.
pub const OK: &[u8] = b"OK";

/// Minimum size of a message frame's fixed-width header: 8-byte timestamp,
/// 2-byte attempts, 16-byte message id.
const MESSAGE_HEADER_LEN: usize = 8 + 2 + 16;

/// A single message delivered on a frame-type-2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub timestamp: i64,
    pub attempts: u16,
    pub id: [u8; 16],
    pub body: Bytes,
}

/// A decoded NSQ frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(MessageFrame),
}

impl Frame {
    /// True for the `_heartbeat_` response frame.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT)
    }

    /// True for the plain `OK` response frame.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == OK)
    }
}

/// Decode one complete frame from the front of `buf`, if one is present.
///
/// Returns `Ok(None)` when `buf` doesn't yet hold a full frame (the caller
/// should read more bytes and retry) and never consumes a partial frame.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let size = i32::from_be_bytes(buf[..4].try_into().unwrap());
    if size < 4 {
        return Err(FrameError::InvalidFrameSize(size));
    }
    let total_len = 4 + size as usize;
    if buf.len() < total_len {
        buf.reserve(total_len - buf.len());
        return Ok(None);
    }

    buf.advance(4);
    let mut frame_buf = buf.split_to(size as usize);
    let frame_type = frame_buf.get_i32();

    let frame = match frame_type {
        FRAME_TYPE_RESPONSE => Frame::Response(frame_buf.freeze()),
        FRAME_TYPE_ERROR => Frame::Error(frame_buf.freeze()),
        FRAME_TYPE_MESSAGE => {
            if frame_buf.len() < MESSAGE_HEADER_LEN {
                return Err(FrameError::ShortMessageFrame {
                    expected: MESSAGE_HEADER_LEN,
                    actual: frame_buf.len(),
                });
            }
            let timestamp = frame_buf.get_i64();
            let attempts = frame_buf.get_u16();
            let mut id = [0u8; 16];
            frame_buf.copy_to_slice(&mut id);
            let body = frame_buf.freeze();
            Frame::Message(MessageFrame {
                timestamp,
                attempts,
                id,
                body,
            })
        }
        other => return Err(FrameError::UnknownFrameType(other)),
    };

    Ok(Some(frame))
}

/// Decoder/Encoder pair for the NSQ wire protocol.
///
/// Decoding yields [`Frame`]s read from a connection. Encoding accepts raw
/// command bytes (already built by the `command` module) and writes them
/// through unchanged — NSQ commands have no further framing of their own.
#[derive(Debug, Default)]
pub struct NsqCodec;

impl Decoder for NsqCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src)
    }
}

impl Encoder<Bytes> for NsqCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.put_slice(&item);
        Ok(())
    }
}
