// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;
use std::fmt;

/// Opcode byte for a `Data` frame.
pub const OP_DATA: u8 = 0x01;
/// Opcode byte for a `Resize` frame.
pub const OP_RESIZE: u8 = 0x02;
/// Opcode byte for a `Close` frame.
pub const OP_CLOSE: u8 = 0x03;

/// A single frame on the helper's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw bytes to write to the PTY master. Preceded on the wire by a
    /// big-endian u32 payload length. Zero-length payloads are legal.
    Data(Bytes),
    /// New terminal dimensions, two big-endian u16 values (cols, rows).
    Resize { cols: u16, rows: u16 },
    /// Graceful teardown request; the helper drains and exits.
    Close,
}

impl Frame {
    /// Append the wire encoding of this frame to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Data(payload) => {
                out.push(OP_DATA);
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(payload);
            }
            Frame::Resize { cols, rows } => {
                out.push(OP_RESIZE);
                out.extend_from_slice(&cols.to_be_bytes());
                out.extend_from_slice(&rows.to_be_bytes());
            }
            Frame::Close => out.push(OP_CLOSE),
        }
    }

    /// Wire encoding as a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(match self {
            Frame::Data(p) => 5 + p.len(),
            Frame::Resize { .. } => 5,
            Frame::Close => 1,
        });
        self.encode(&mut out);
        out
    }
}

/// A malformed frame. Any decode error is fatal to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The opcode byte is not one of `0x01`/`0x02`/`0x03`.
    UnknownOpcode(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode(op) => write!(f, "unknown frame opcode 0x{op:02x}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Incremental frame decoder.
///
/// Feed arbitrary byte chunks with [`push`](Decoder::push), then drain
/// complete frames with [`next`](Decoder::next). Bytes belonging to an
/// incomplete frame stay buffered until more input arrives.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw input bytes to the decode buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next(&mut self) -> Result<Option<Frame>, DecodeError> {
        let Some(&op) = self.buf.first() else {
            return Ok(None);
        };
        match op {
            OP_DATA => {
                if self.buf.len() < 5 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]])
                    as usize;
                if self.buf.len() < 5 + len {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&self.buf[5..5 + len]);
                self.buf.drain(..5 + len);
                Ok(Some(Frame::Data(payload)))
            }
            OP_RESIZE => {
                if self.buf.len() < 5 {
                    return Ok(None);
                }
                let cols = u16::from_be_bytes([self.buf[1], self.buf[2]]);
                let rows = u16::from_be_bytes([self.buf[3], self.buf[4]]);
                self.buf.drain(..5);
                Ok(Some(Frame::Resize { cols, rows }))
            }
            OP_CLOSE => {
                self.buf.drain(..1);
                Ok(Some(Frame::Close))
            }
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
