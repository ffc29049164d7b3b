// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// A cell color: terminal default, 256-palette index, or true color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// SGR attributes in effect for a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dim: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inverse: bool,
    #[serde(default, skip_serializing_if = "Color::is_default")]
    pub fg: Color,
    #[serde(default, skip_serializing_if = "Color::is_default")]
    pub bg: Color,
}

impl Color {
    pub fn is_default(&self) -> bool {
        matches!(self, Color::Default)
    }
}

impl Style {
    pub fn is_default(&self) -> bool {
        *self == Style::default()
    }
}

/// One grid cell. Wide glyphs occupy two cells: the glyph cell (width 2)
/// followed by a continuation cell (width 0, `continued = true`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub glyph: String,
    pub width: u8,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continued: bool,
    #[serde(default, skip_serializing_if = "Style::is_default")]
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self { glyph: " ".to_owned(), width: 1, continued: false, style: Style::default() }
    }
}

impl Cell {
    /// A blank cell carrying the given style (erase fills use the current
    /// background).
    pub fn blank(style: Style) -> Self {
        Self { glyph: " ".to_owned(), width: 1, continued: false, style }
    }

    /// A wide-glyph continuation cell.
    pub fn continuation(style: Style) -> Self {
        Self { glyph: String::new(), width: 0, continued: true, style }
    }

    /// Whether this cell contributes nothing to trimmed output.
    pub fn is_blank(&self) -> bool {
        self.glyph == " " && self.style.is_default() && !self.continued
    }

    /// Append a combining mark to the glyph.
    pub fn attach_combining(&mut self, ch: char) {
        self.glyph.push(ch);
    }
}
