// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed opcode protocol spoken on the PTY helper's stdin.
//!
//! The helper's stdin carries a concatenation of frames; its stdout is the
//! raw PTY output with no framing at all.

pub mod frame;

pub use frame::{Decoder, DecodeError, Frame};
