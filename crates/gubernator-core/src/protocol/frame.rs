//! Binary RPC frame parsing (panic-free).
//!
//! Layout on the wire, after a u32 big-endian length prefix covering the
//! rest of the frame:
//!
//! ```text
//! request:  op:u8         id:u32be  body...
//! response: op|0x80:u8    id:u32be  status:u8  body...
//! ```
//!
//! Bodies are JSON renderings of the operation's message structs.
//!
//! Parsing rules:
//! - Never index (`buf[0]`) — always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, GubernatorError, Result};

/// Maximum frame payload, length prefix excluded.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// High bit of the op byte marks a response frame.
pub const RESPONSE_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    GetRateLimits,
    GetPeerRateLimits,
    UpdatePeerGlobals,
    HealthCheck,
}

impl Op {
    pub fn as_u8(self) -> u8 {
        match self {
            Op::GetRateLimits => 0x01,
            Op::GetPeerRateLimits => 0x02,
            Op::UpdatePeerGlobals => 0x03,
            Op::HealthCheck => 0x04,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Op::GetRateLimits),
            0x02 => Some(Op::GetPeerRateLimits),
            0x03 => Some(Op::UpdatePeerGlobals),
            0x04 => Some(Op::HealthCheck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub op: Op,
    pub id: u32,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub op: Op,
    pub id: u32,
    pub code: ErrorCode,
    pub body: Bytes,
}

/// A decoded frame payload (length prefix already stripped).
#[derive(Debug, Clone)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

/// Encode a request frame, length prefix included.
pub fn encode_request(op: Op, id: u32, body: &[u8]) -> Result<Bytes> {
    let payload_len = 1 + 4 + body.len();
    if payload_len > MAX_FRAME_LEN {
        return Err(GubernatorError::Transport(format!(
            "frame body of {} bytes exceeds the {MAX_FRAME_LEN} byte cap",
            body.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + payload_len);
    buf.put_u32(payload_len as u32);
    buf.put_u8(op.as_u8());
    buf.put_u32(id);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Encode a response frame, length prefix included.
pub fn encode_response(op: Op, id: u32, code: ErrorCode, body: &[u8]) -> Result<Bytes> {
    let payload_len = 1 + 4 + 1 + body.len();
    if payload_len > MAX_FRAME_LEN {
        return Err(GubernatorError::Transport(format!(
            "frame body of {} bytes exceeds the {MAX_FRAME_LEN} byte cap",
            body.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + payload_len);
    buf.put_u32(payload_len as u32);
    buf.put_u8(op.as_u8() | RESPONSE_BIT);
    buf.put_u32(id);
    buf.put_u8(code.as_u8());
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Decode a frame payload (the bytes after the length prefix).
pub fn decode(mut buf: Bytes) -> Result<Frame> {
    // Minimum header: op, id
    if buf.remaining() < 5 {
        return Err(GubernatorError::Transport("frame too short".into()));
    }

    let tag = buf.get_u8();
    let op = Op::from_u8(tag & !RESPONSE_BIT)
        .ok_or_else(|| GubernatorError::Transport(format!("unknown op 0x{:02x}", tag)))?;
    let id = buf.get_u32();

    if tag & RESPONSE_BIT == 0 {
        let body = buf.copy_to_bytes(buf.remaining());
        return Ok(Frame::Request(RequestFrame { op, id, body }));
    }

    if buf.remaining() < 1 {
        return Err(GubernatorError::Transport(
            "response frame missing status byte".into(),
        ));
    }
    let status = buf.get_u8();
    let code = ErrorCode::from_u8(status)
        .ok_or_else(|| GubernatorError::Transport(format!("unknown status 0x{status:02x}")))?;
    let body = buf.copy_to_bytes(buf.remaining());
    Ok(Frame::Response(ResponseFrame { op, id, code, body }))
}
