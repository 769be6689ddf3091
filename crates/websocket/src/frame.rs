//! RFC 6455 frames and their codec.
//!
//! The codec decodes client frames (which must be masked) and encodes server frames
//! (never masked).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{CloseCode, WsError};

/// Largest payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) >= 0x8
    }
}

/// One frame with its payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// Set on compressed frames
    pub rsv1: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: Bytes, fin: bool) -> Self {
        Self { fin, rsv1: false, opcode, payload }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, payload.into(), true)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, payload.into(), true)
    }

    /// A close frame carrying `code` and `reason`, or an empty one when there is no code.
    pub fn close(code: Option<CloseCode>, reason: &str) -> Self {
        let Some(code) = code else {
            return Self::new(OpCode::Close, Bytes::new(), true);
        };
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.as_u16());
        payload.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload.freeze(), true)
    }

    /// Splits a message into frames of at most `fragment_length` bytes. An empty message is a
    /// single empty frame.
    pub fn fragments(mut opcode: OpCode, mut payload: Bytes, fragment_length: usize) -> Vec<Self> {
        let fragment_length = fragment_length.max(1);
        let mut frames = Vec::with_capacity(payload.len() / fragment_length + 1);
        loop {
            let chunk = payload.split_to(payload.len().min(fragment_length));
            let fin = payload.is_empty();
            frames.push(Self::new(opcode, chunk, fin));
            if fin {
                return frames;
            }
            opcode = OpCode::Continuation;
        }
    }

    /// Parses the payload of a close frame.
    ///
    /// An empty payload means no status code ([`CloseCode::NO_STATUS`]).
    pub fn close_payload(&self) -> Result<(CloseCode, String), WsError> {
        match self.payload.len() {
            0 => Ok((CloseCode::NO_STATUS, String::new())),
            1 => Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "close frame payload of one byte")),
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([self.payload[0], self.payload[1]]));
                if !code.is_valid_on_wire() {
                    return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, format!("invalid close code {code}")));
                }
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|e| WsError::protocol(CloseCode::INVALID_PAYLOAD, format!("close reason is not utf-8: {e}")))?;
                Ok((code, reason.to_string()))
            }
        }
    }
}

/// Frame codec of the server side of a session.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let (b0, b1) = (src[0], src[1]);

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        if b0 & 0x30 != 0 {
            return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "reserved bits must be zero"));
        }
        let opcode = OpCode::from_u8(b0 & 0x0F)
            .ok_or_else(|| WsError::protocol(CloseCode::POLICY_VIOLATION, format!("unsupported opcode {:#x}", b0 & 0x0F)))?;
        if b1 & 0x80 == 0 {
            return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "client frames must be masked"));
        }

        let (length, offset) = match b1 & 0x7F {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(bytes), 10)
            }
            length => (u64::from(length), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "control frames must not be fragmented"));
            }
            if length > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "control frame payload longer than 125 bytes"));
            }
        }
        let length = match usize::try_from(length) {
            Ok(length) if length <= self.max_frame_size => length,
            _ => return Err(WsError::protocol(CloseCode::MESSAGE_TOO_BIG, format!("frame of {length} bytes is too large"))),
        };

        let frame_size = offset + 4 + length;
        if src.len() < frame_size {
            src.reserve(frame_size - src.len());
            return Ok(None);
        }

        src.advance(offset);
        let mask = [src[0], src[1], src[2], src[3]];
        src.advance(4);
        let mut payload = src.split_to(length);
        apply_mask(&mut payload, mask);

        trace!(?opcode, fin, length, "decoded frame");
        Ok(Some(Frame { fin, rsv1, opcode, payload: payload.freeze() }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = frame.payload.len();
        dst.reserve(length + 10);
        write_header(&frame, None, dst);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

fn write_header(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
    let mut b0 = frame.opcode as u8;
    if frame.fin {
        b0 |= 0x80;
    }
    if frame.rsv1 {
        b0 |= 0x40;
    }
    dst.put_u8(b0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match frame.payload.len() {
        length @ 0..=125 => dst.put_u8(mask_bit | u8::try_from(length).unwrap_or(125)),
        length @ 126..=0xFFFF => {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(u16::try_from(length).unwrap_or(u16::MAX));
        }
        length => {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(length as u64);
        }
    }
    if let Some(mask) = mask {
        dst.put_slice(&mask);
    }
}

fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Writes `frame` the way a client does: masked with `mask`.
#[cfg(test)]
pub(crate) fn encode_client_frame(frame: &Frame, mask: [u8; 4], dst: &mut BytesMut) {
    write_header(frame, Some(mask), dst);
    let mut payload = frame.payload.to_vec();
    apply_mask(&mut payload, mask);
    dst.put_slice(&payload);
}
