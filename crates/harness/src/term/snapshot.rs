// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::cell::Style;

/// Which screen buffer is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveScreen {
    Primary,
    Alternate,
}

/// Cursor shape set via DECSCUSR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorShape {
    #[default]
    Block,
    Underline,
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorStyle {
    pub shape: CursorShape,
    pub blinking: bool,
}

impl Default for CursorStyle {
    fn default() -> Self {
        Self { shape: CursorShape::Block, blinking: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
    pub style: CursorStyle,
}

/// Tracked terminal modes exposed to renderers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeFlags {
    pub bracketed_paste: bool,
    pub mouse_x10: bool,
    pub mouse_button_event: bool,
    pub mouse_any_event: bool,
    pub focus_tracking: bool,
    pub mouse_sgr_encoding: bool,
}

/// Where the viewport sits over scrollback + screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    /// Absolute row index of the first visible line.
    pub top: u64,
    /// Scrollback rows plus screen rows.
    pub total_rows: u64,
    /// True when the viewport hugs the bottom and tracks new output.
    pub follow_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichCell {
    pub glyph: String,
    pub width: u8,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continued: bool,
    #[serde(default, skip_serializing_if = "Style::is_default")]
    pub style: Style,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichLine {
    pub cells: Vec<RichCell>,
}

/// A deterministic, hashable capture of the terminal state.
///
/// Equal frames yield equal hashes: the hash is a SHA-256 digest over the
/// canonical JSON form of the frame with `frame_hash` absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrame {
    pub rows: u16,
    pub cols: u16,
    pub active_screen: ActiveScreen,
    pub modes: ModeFlags,
    pub cursor: CursorState,
    pub viewport: Viewport,
    pub lines: Vec<String>,
    pub rich_lines: Vec<RichLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_hash: Option<String>,
}

impl SnapshotFrame {
    /// Compute the canonical hash of this frame, ignoring any hash
    /// already present.
    pub fn compute_hash(&self) -> String {
        let mut unhashed = self.clone();
        unhashed.frame_hash = None;
        let canonical = serde_json::to_vec(&unhashed).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    /// Fill `frame_hash` in place.
    pub fn with_hash(mut self) -> Self {
        self.frame_hash = Some(self.compute_hash());
        self
    }
}

/// Result of `buffer_tail`: the last rows of scrollback + screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferTail {
    /// Absolute row index of the first returned line.
    pub start_row: u64,
    pub lines: Vec<String>,
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
