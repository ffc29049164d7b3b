// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted terminal-query responder.
//!
//! Hooks on the snapshot oracle route CSI/OSC/DCS queries here; replies
//! are deterministic, computed from configured colors and the current
//! geometry, so the child's terminal detection converges quickly.

use tracing::debug;

use crate::term::palette::format_osc_color;
use crate::term::{OscTerminator, TerminalQuery};

/// Assumed cell size for the window-size reports (pixels).
const CELL_WIDTH_PX: u16 = 8;
const CELL_HEIGHT_PX: u16 = 16;

/// Colors used for OSC 10/11/12 replies. `HARNESS_TERM_FG` and
/// `HARNESS_TERM_BG` override the configured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponderColors {
    pub foreground: (u8, u8, u8),
    pub background: (u8, u8, u8),
    pub cursor: (u8, u8, u8),
}

impl Default for ResponderColors {
    fn default() -> Self {
        Self {
            foreground: (0xe5, 0xe5, 0xe5),
            background: (0x1e, 0x1e, 0x1e),
            cursor: (0xe5, 0xe5, 0xe5),
        }
    }
}

impl ResponderColors {
    /// Apply `HARNESS_TERM_FG`/`HARNESS_TERM_BG` hex overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(fg) = std::env::var("HARNESS_TERM_FG").ok().as_deref().and_then(parse_hex) {
            self.foreground = fg;
        }
        if let Some(bg) = std::env::var("HARNESS_TERM_BG").ok().and_then(|v| parse_hex(&v)) {
            self.background = bg;
        }
        self
    }
}

/// Parse a `#rrggbb` or `rrggbb` hex color.
pub fn parse_hex(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

#[derive(Debug, Clone)]
pub struct QueryResponder {
    colors: ResponderColors,
}

impl QueryResponder {
    pub fn new(colors: ResponderColors) -> Self {
        Self { colors }
    }

    /// Produce the scripted reply for a query, or `None` when the query
    /// has no answer. Unknown queries are observed but never answered.
    pub fn respond(&self, query: &TerminalQuery) -> Option<Vec<u8>> {
        match query {
            TerminalQuery::PrimaryDeviceAttributes => Some(b"\x1b[?62;4;6;22c".to_vec()),
            TerminalQuery::SecondaryDeviceAttributes => Some(b"\x1b[>1;10;0c".to_vec()),
            TerminalQuery::DeviceStatus => Some(b"\x1b[0n".to_vec()),
            TerminalQuery::CursorPosition { row, col } => {
                Some(format!("\x1b[{row};{col}R").into_bytes())
            }
            TerminalQuery::WindowSizePixels { rows, cols } => Some(
                format!("\x1b[4;{};{}t", rows * CELL_HEIGHT_PX, cols * CELL_WIDTH_PX)
                    .into_bytes(),
            ),
            TerminalQuery::CellSizePixels => {
                Some(format!("\x1b[6;{CELL_HEIGHT_PX};{CELL_WIDTH_PX}t").into_bytes())
            }
            TerminalQuery::WindowSizeChars { rows, cols } => {
                Some(format!("\x1b[8;{rows};{cols}t").into_bytes())
            }
            TerminalQuery::KittyKeyboard => Some(b"\x1b[?0u".to_vec()),
            TerminalQuery::ForegroundColor { terminator } => {
                Some(osc_color_reply(10, self.colors.foreground, *terminator))
            }
            TerminalQuery::BackgroundColor { terminator } => {
                Some(osc_color_reply(11, self.colors.background, *terminator))
            }
            TerminalQuery::CursorColor { terminator } => {
                Some(osc_color_reply(12, self.colors.cursor, *terminator))
            }
            TerminalQuery::PaletteColor { index, default, terminator } => {
                let mut reply = format!("\x1b]4;{index};{}", format_osc_color(*default))
                    .into_bytes();
                reply.extend_from_slice(terminator_bytes(*terminator));
                Some(reply)
            }
            TerminalQuery::Dcs { data } => {
                debug!(sequence = %format!("DCS {data}"), handled = false, "codex.terminal-query");
                None
            }
            TerminalQuery::Unknown { sequence } => {
                debug!(sequence = %sequence, handled = false, "codex.terminal-query");
                None
            }
        }
    }
}

/// The reply terminator mirrors the query's.
fn terminator_bytes(terminator: OscTerminator) -> &'static [u8] {
    match terminator {
        OscTerminator::Bell => b"\x07",
        OscTerminator::St => b"\x1b\\",
    }
}

fn osc_color_reply(code: u16, color: (u8, u8, u8), terminator: OscTerminator) -> Vec<u8> {
    let mut reply = format!("\x1b]{code};{}", format_osc_color(color)).into_bytes();
    reply.extend_from_slice(terminator_bytes(terminator));
    reply
}

/// The startup handshake written to the child right after spawn: color
/// queries, device attributes, cursor position, and the char-size report.
pub fn startup_handshake() -> Vec<u8> {
    let mut probe = Vec::new();
    probe.extend_from_slice(b"\x1b]10;?\x07");
    probe.extend_from_slice(b"\x1b]11;?\x07");
    probe.extend_from_slice(b"\x1b[c");
    probe.extend_from_slice(b"\x1b[6n");
    probe.extend_from_slice(b"\x1b[18t");
    probe
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
