// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The 256-color palette used for OSC 4 replies, with OSC 4 overrides and
//! OSC 104 reset.
//!
//! Defaults follow the standard xterm table: 16 ANSI colors, a 6×6×6 cube
//! with channel levels {0, 95, 135, 175, 215, 255}, and a 24-step
//! grayscale ramp starting at 8.

/// The 16 ANSI base colors (xterm defaults).
const ANSI_16: [(u8, u8, u8); 16] = [
    (0x00, 0x00, 0x00),
    (0xcd, 0x00, 0x00),
    (0x00, 0xcd, 0x00),
    (0xcd, 0xcd, 0x00),
    (0x00, 0x00, 0xee),
    (0xcd, 0x00, 0xcd),
    (0x00, 0xcd, 0xcd),
    (0xe5, 0xe5, 0xe5),
    (0x7f, 0x7f, 0x7f),
    (0xff, 0x00, 0x00),
    (0x00, 0xff, 0x00),
    (0xff, 0xff, 0x00),
    (0x5c, 0x5c, 0xff),
    (0xff, 0x00, 0xff),
    (0x00, 0xff, 0xff),
    (0xff, 0xff, 0xff),
];

/// The default color for a palette index.
pub fn default_color(index: u8) -> (u8, u8, u8) {
    match index {
        0..=15 => ANSI_16[index as usize],
        16..=231 => {
            let n = index - 16;
            let levels = [0u8, 95, 135, 175, 215, 255];
            let r = levels[(n / 36) as usize];
            let g = levels[((n / 6) % 6) as usize];
            let b = levels[(n % 6) as usize];
            (r, g, b)
        }
        232..=255 => {
            let v = 8 + 10 * (index - 232);
            (v, v, v)
        }
    }
}

/// Palette with per-index overrides.
#[derive(Debug, Clone)]
pub struct Palette {
    overrides: Box<[Option<(u8, u8, u8)>; 256]>,
}

impl Default for Palette {
    fn default() -> Self {
        Self { overrides: Box::new([None; 256]) }
    }
}

impl Palette {
    /// Current color for an index, override first.
    pub fn color(&self, index: u8) -> (u8, u8, u8) {
        self.overrides[index as usize].unwrap_or_else(|| default_color(index))
    }

    pub fn set(&mut self, index: u8, rgb: (u8, u8, u8)) {
        self.overrides[index as usize] = Some(rgb);
    }

    /// Reset one index, or every override when `index` is `None`.
    pub fn reset(&mut self, index: Option<u8>) {
        match index {
            Some(i) => self.overrides[i as usize] = None,
            None => self.overrides = Box::new([None; 256]),
        }
    }

    pub fn has_overrides(&self) -> bool {
        self.overrides.iter().any(Option::is_some)
    }
}

/// Parse an OSC color spec: `rgb:RR/GG/BB` (1–4 hex digits per channel,
/// scaled) or `#RRGGBB`.
pub fn parse_color_spec(spec: &str) -> Option<(u8, u8, u8)> {
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        return Some((r, g, b));
    }

    let body = spec.strip_prefix("rgb:")?;
    let mut parts = body.split('/');
    let r = scale_channel(parts.next()?)?;
    let g = scale_channel(parts.next()?)?;
    let b = scale_channel(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

/// Scale a 1–4 hex digit channel to 8 bits, X11-style: the value is
/// interpreted against the maximum for its digit count.
fn scale_channel(hex: &str) -> Option<u8> {
    if hex.is_empty() || hex.len() > 4 {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    let max = (1u32 << (4 * hex.len() as u32)) - 1;
    Some(((value * 255 + max / 2) / max) as u8)
}

/// Format a color the way OSC replies expect: `rgb:rrrr/gggg/bbbb`
/// (each 8-bit channel doubled to 16 bits).
pub fn format_osc_color((r, g, b): (u8, u8, u8)) -> String {
    format!(
        "rgb:{:04x}/{:04x}/{:04x}",
        (r as u16) << 8 | r as u16,
        (g as u16) << 8 | g as u16,
        (b as u16) << 8 | b as u16,
    )
}

#[cfg(test)]
#[path = "palette_tests.rs"]
mod tests;
