// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-sequence interpreter: owns the two screens, modes, palette,
//! viewport, and query routing; implements [`Perform`] for the parser.

use unicode_width::UnicodeWidthChar;

use super::cell::{Color, Style};
use super::grid::{Grid, SavedCursor};
use super::palette::{parse_color_spec, Palette};
use super::parser::Perform;
use super::snapshot::{
    ActiveScreen, BufferTail, CursorShape, CursorState, CursorStyle, ModeFlags, RichLine,
    SnapshotFrame, Viewport,
};

/// How the query that produced a reply was terminated; replies mirror it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscTerminator {
    Bell,
    St,
}

/// A terminal query routed to the responder hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalQuery {
    /// `CSI c`
    PrimaryDeviceAttributes,
    /// `CSI > c`
    SecondaryDeviceAttributes,
    /// `CSI 5 n`
    DeviceStatus,
    /// `CSI 6 n`; position is 1-based and origin-relative.
    CursorPosition { row: u16, col: u16 },
    /// `CSI 14 t`
    WindowSizePixels { rows: u16, cols: u16 },
    /// `CSI 16 t`
    CellSizePixels,
    /// `CSI 18 t`
    WindowSizeChars { rows: u16, cols: u16 },
    /// `CSI ? u`
    KittyKeyboard,
    /// `OSC 10 ; ?`
    ForegroundColor { terminator: OscTerminator },
    /// `OSC 11 ; ?`
    BackgroundColor { terminator: OscTerminator },
    /// `OSC 12 ; ?`
    CursorColor { terminator: OscTerminator },
    /// `OSC 4 ; n ; ?`
    PaletteColor { index: u8, default: (u8, u8, u8), terminator: OscTerminator },
    /// Any DCS string.
    Dcs { data: String },
    /// Query-shaped sequence with no scripted reply.
    Unknown { sequence: String },
}

pub type QueryHook = Box<dyn FnMut(&TerminalQuery) -> Option<Vec<u8>> + Send>;

/// A point in the combined scrollback + screen buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferPoint {
    pub row: u64,
    pub col: u16,
}

pub struct Term {
    primary: Grid,
    alternate: Grid,
    active: ActiveScreen,
    style: Style,
    saved_primary: Option<SavedCursor>,
    saved_alternate: Option<SavedCursor>,
    /// Cursor saved by DECSET 1048/1049 on the primary screen.
    alt_switch_saved: Option<SavedCursor>,
    cursor_visible: bool,
    cursor_style: CursorStyle,
    modes: ModeFlags,
    palette: Palette,
    scroll_offset: usize,
    replies: Vec<Vec<u8>>,
    query_hook: Option<QueryHook>,
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Term")
            .field("active", &self.active)
            .field("cursor_visible", &self.cursor_visible)
            .field("modes", &self.modes)
            .finish()
    }
}

impl Term {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            primary: Grid::new(cols, rows, scrollback_limit, true),
            alternate: Grid::new(cols, rows, 0, false),
            active: ActiveScreen::Primary,
            style: Style::default(),
            saved_primary: None,
            saved_alternate: None,
            alt_switch_saved: None,
            cursor_visible: true,
            cursor_style: CursorStyle::default(),
            modes: ModeFlags::default(),
            palette: Palette::default(),
            scroll_offset: 0,
            replies: Vec::new(),
            query_hook: None,
        }
    }

    pub fn set_query_hook(&mut self, hook: QueryHook) {
        self.query_hook = Some(hook);
    }

    /// Drain reply bytes produced by query hooks since the last call.
    pub fn take_replies(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.replies)
    }

    fn grid(&self) -> &Grid {
        match self.active {
            ActiveScreen::Primary => &self.primary,
            ActiveScreen::Alternate => &self.alternate,
        }
    }

    fn grid_mut(&mut self) -> &mut Grid {
        match self.active {
            ActiveScreen::Primary => &mut self.primary,
            ActiveScreen::Alternate => &mut self.alternate,
        }
    }

    fn query(&mut self, query: TerminalQuery) {
        if let Some(ref mut hook) = self.query_hook {
            if let Some(reply) = hook(&query) {
                self.replies.push(reply);
            }
        }
    }

    // -- Snapshots ------------------------------------------------------------

    pub fn snapshot(&mut self, include_hash: bool) -> SnapshotFrame {
        let active = self.active;
        let cursor = CursorState {
            row: self.grid().cursor_row,
            col: self.grid().cursor_col,
            visible: self.cursor_visible,
            style: self.cursor_style,
        };
        let modes = self.modes;
        let offset = self.scroll_offset.min(self.grid().scrollback.len());

        let grid = self.grid_mut();
        let rows = grid.rows();
        let cols = grid.cols();
        let scrollback_len = grid.scrollback.len();
        let total_rows = (scrollback_len + rows as usize) as u64;
        let top = (scrollback_len - offset) as u64;

        let mut lines = Vec::with_capacity(rows as usize);
        let mut rich_lines = Vec::with_capacity(rows as usize);
        for i in 0..rows as usize {
            let abs = top as usize + i;
            let line = if abs < scrollback_len {
                grid.scrollback.get_mut(abs)
            } else {
                grid.line_mut((abs - scrollback_len) as u16)
            };
            match line {
                Some(line) => {
                    lines.push(line.trimmed_text());
                    rich_lines.push(line.rich());
                }
                None => {
                    lines.push(String::new());
                    rich_lines.push(RichLine::default());
                }
            }
        }

        let frame = SnapshotFrame {
            rows,
            cols,
            active_screen: active,
            modes,
            cursor,
            viewport: Viewport { top, total_rows, follow_output: offset == 0 },
            lines,
            rich_lines,
            frame_hash: None,
        };
        if include_hash {
            frame.with_hash()
        } else {
            frame
        }
    }

    /// Scroll the viewport by `delta` rows (negative = toward history).
    /// The viewport re-follows output once it reaches the bottom.
    pub fn scroll_viewport(&mut self, delta: i64) {
        let len = self.grid().scrollback.len() as i64;
        let offset = (self.scroll_offset as i64 - delta).clamp(0, len);
        self.scroll_offset = offset as usize;
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.primary.resize(cols, rows);
        self.alternate.resize(cols, rows);
        self.scroll_offset = self.scroll_offset.min(self.grid().scrollback.len());
    }

    /// Text between two buffer points, continuation cells skipped, rows
    /// joined by newlines. Both endpoints are inclusive.
    pub fn selection_text(&self, start: BufferPoint, end: BufferPoint) -> String {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let grid = self.grid();
        let scrollback_len = grid.scrollback.len() as u64;
        let total = scrollback_len + grid.rows() as u64;

        let mut rows = Vec::new();
        let mut row = start.row;
        while row <= end.row && row < total {
            let line = if row < scrollback_len {
                grid.scrollback.get(row as usize)
            } else {
                grid.line((row - scrollback_len) as u16)
            };
            let Some(line) = line else {
                break;
            };
            let from = if row == start.row { start.col } else { 0 };
            let to = if row == end.row { end.col } else { grid.cols() - 1 };
            let mut text = String::new();
            for col in from..=to.min(grid.cols() - 1) {
                if let Some(cell) = line.cell(col) {
                    if cell.continued {
                        continue;
                    }
                    text.push_str(&cell.glyph);
                }
            }
            rows.push(text.trim_end().to_owned());
            row += 1;
        }
        rows.join("\n")
    }

    /// The last `n` trimmed rows of scrollback + screen (all when `None`).
    pub fn buffer_tail(&mut self, n: Option<usize>) -> BufferTail {
        let grid = self.grid_mut();
        let rows = grid.rows() as usize;
        let scrollback_len = grid.scrollback.len();
        let total = scrollback_len + rows;
        let take = n.unwrap_or(total).min(total);
        let start_row = (total - take) as u64;

        let mut lines = Vec::with_capacity(take);
        for abs in (total - take)..total {
            let line = if abs < scrollback_len {
                grid.scrollback.get(abs)
            } else {
                grid.line((abs - scrollback_len) as u16)
            };
            lines.push(line.map(|l| l.trimmed_text()).unwrap_or_default());
        }
        BufferTail { start_row, lines }
    }

    // -- Resets & modes -------------------------------------------------------

    /// ESC c: both screens, modes, tab stops, cursor, style, palette.
    fn hard_reset(&mut self) {
        self.primary.reset();
        self.alternate.reset();
        self.active = ActiveScreen::Primary;
        self.style = Style::default();
        self.saved_primary = None;
        self.saved_alternate = None;
        self.alt_switch_saved = None;
        self.cursor_visible = true;
        self.cursor_style = CursorStyle::default();
        self.modes = ModeFlags::default();
        self.palette.reset(None);
        self.scroll_offset = 0;
    }

    fn enter_alternate(&mut self, save_cursor: bool, clear: bool) {
        if save_cursor && self.active == ActiveScreen::Primary {
            self.alt_switch_saved = Some(self.primary.save_cursor(self.style));
        }
        self.active = ActiveScreen::Alternate;
        if clear {
            self.alternate.reset();
        }
    }

    fn leave_alternate(&mut self, restore_cursor: bool) {
        self.active = ActiveScreen::Primary;
        if restore_cursor {
            if let Some(saved) = self.alt_switch_saved.take() {
                self.primary.restore_cursor(&saved);
                self.style = saved.style;
            }
        }
    }

    fn set_dec_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            6 => {
                let grid = self.grid_mut();
                grid.origin_mode = enable;
                grid.goto(0, 0);
            }
            25 => self.cursor_visible = enable,
            47 => {
                if enable {
                    self.enter_alternate(false, false);
                } else {
                    self.leave_alternate(false);
                }
            }
            1000 => self.modes.mouse_x10 = enable,
            1002 => self.modes.mouse_button_event = enable,
            1003 => self.modes.mouse_any_event = enable,
            1004 => self.modes.focus_tracking = enable,
            1006 => self.modes.mouse_sgr_encoding = enable,
            1047 => {
                if enable {
                    self.enter_alternate(false, false);
                } else {
                    if self.active == ActiveScreen::Alternate {
                        self.alternate.reset();
                    }
                    self.leave_alternate(false);
                }
            }
            1048 => {
                if enable {
                    let style = self.style;
                    self.alt_switch_saved = Some(self.grid_mut().save_cursor(style));
                } else if let Some(saved) = self.alt_switch_saved.take() {
                    let style = saved.style;
                    self.grid_mut().restore_cursor(&saved);
                    self.style = style;
                }
            }
            1049 => {
                if enable {
                    self.enter_alternate(true, true);
                } else {
                    self.leave_alternate(true);
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {}
        }
    }

    // -- SGR ------------------------------------------------------------------

    fn apply_sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.style = Style::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.style = Style::default(),
                1 => self.style.bold = true,
                2 => self.style.dim = true,
                3 => self.style.italic = true,
                4 => self.style.underline = true,
                7 => self.style.inverse = true,
                22 => {
                    self.style.bold = false;
                    self.style.dim = false;
                }
                23 => self.style.italic = false,
                24 => self.style.underline = false,
                27 => self.style.inverse = false,
                30..=37 => self.style.fg = Color::Indexed((params[i] - 30) as u8),
                38 => {
                    if let Some((color, consumed)) = extended_color(&params[i + 1..]) {
                        self.style.fg = color;
                        i += consumed;
                    }
                }
                39 => self.style.fg = Color::Default,
                40..=47 => self.style.bg = Color::Indexed((params[i] - 40) as u8),
                48 => {
                    if let Some((color, consumed)) = extended_color(&params[i + 1..]) {
                        self.style.bg = color;
                        i += consumed;
                    }
                }
                49 => self.style.bg = Color::Default,
                90..=97 => self.style.fg = Color::Indexed((params[i] - 90 + 8) as u8),
                100..=107 => self.style.bg = Color::Indexed((params[i] - 100 + 8) as u8),
                _ => {}
            }
            i += 1;
        }
    }

    // -- OSC ------------------------------------------------------------------

    fn handle_osc(&mut self, data: &str, terminator: OscTerminator) {
        let (code, rest) = match data.split_once(';') {
            Some((code, rest)) => (code, rest),
            None => (data, ""),
        };
        match code {
            "4" => self.handle_osc_palette(rest, terminator),
            "104" => {
                if rest.is_empty() {
                    self.palette.reset(None);
                } else {
                    for part in rest.split(';') {
                        if let Ok(index) = part.parse::<u8>() {
                            self.palette.reset(Some(index));
                        }
                    }
                }
            }
            "10" => {
                if rest == "?" {
                    self.query(TerminalQuery::ForegroundColor { terminator });
                }
            }
            "11" => {
                if rest == "?" {
                    self.query(TerminalQuery::BackgroundColor { terminator });
                }
            }
            "12" => {
                if rest == "?" {
                    self.query(TerminalQuery::CursorColor { terminator });
                }
            }
            _ => {}
        }
    }

    /// OSC 4 payload: `index;spec` pairs. A `?` spec queries; anything
    /// else sets. Invalid and non-numeric indices produce no reply.
    fn handle_osc_palette(&mut self, rest: &str, terminator: OscTerminator) {
        let mut parts = rest.split(';');
        while let (Some(index), Some(spec)) = (parts.next(), parts.next()) {
            let Ok(index) = index.parse::<u8>() else {
                continue;
            };
            if spec == "?" {
                self.query(TerminalQuery::PaletteColor {
                    index,
                    default: self.palette.color(index),
                    terminator,
                });
            } else if let Some(rgb) = parse_color_spec(spec) {
                self.palette.set(index, rgb);
            }
        }
    }

    // -- CSI ------------------------------------------------------------------

    fn handle_csi(
        &mut self,
        params: &[u16],
        intermediates: &[u8],
        private: Option<u8>,
        action: char,
    ) {
        let p = |i: usize, default: u16| params.get(i).copied().filter(|&v| v != 0).unwrap_or(default);
        let raw = |i: usize| params.get(i).copied().unwrap_or(0);

        if intermediates == b" " && action == 'q' {
            self.cursor_style = decscusr(raw(0));
            return;
        }
        if !intermediates.is_empty() {
            return;
        }

        match (private, action) {
            (None, 'A') => self.grid_mut().move_rel(-(p(0, 1) as i32), 0),
            (None, 'B') => self.grid_mut().move_rel(p(0, 1) as i32, 0),
            (None, 'C') => self.grid_mut().move_rel(0, p(0, 1) as i32),
            (None, 'D') => self.grid_mut().move_rel(0, -(p(0, 1) as i32)),
            (None, 'G') => {
                // Column move only; the row (and origin mapping) is untouched.
                let col = p(0, 1) - 1;
                let grid = self.grid_mut();
                grid.pending_wrap = false;
                grid.cursor_col = col.min(grid.cols() - 1);
            }
            (None, 'H') | (None, 'f') => self.grid_mut().goto(p(0, 1) - 1, p(1, 1) - 1),
            (None, 'J') => {
                let style = self.style;
                self.grid_mut().erase_display(raw(0), style);
            }
            (None, 'K') => {
                let style = self.style;
                self.grid_mut().erase_line(raw(0), style);
            }
            (None, '@') => {
                let style = self.style;
                self.grid_mut().insert_chars(p(0, 1), style);
            }
            (None, 'P') => {
                let style = self.style;
                self.grid_mut().delete_chars(p(0, 1), style);
            }
            (None, 'L') => self.grid_mut().insert_lines(p(0, 1)),
            (None, 'M') => self.grid_mut().delete_lines(p(0, 1)),
            (None, 'S') => self.grid_mut().scroll_up(p(0, 1)),
            (None, 'T') => self.grid_mut().scroll_down(p(0, 1)),
            (None, 'r') => {
                let top = p(0, 1) - 1;
                let bottom = p(1, self.grid().rows()) - 1;
                self.grid_mut().set_scroll_region(top, bottom);
            }
            (None, 's') => {
                let style = self.style;
                let saved = self.grid_mut().save_cursor(style);
                match self.active {
                    ActiveScreen::Primary => self.saved_primary = Some(saved),
                    ActiveScreen::Alternate => self.saved_alternate = Some(saved),
                }
            }
            (None, 'u') => {
                let saved = match self.active {
                    ActiveScreen::Primary => self.saved_primary,
                    ActiveScreen::Alternate => self.saved_alternate,
                };
                if let Some(saved) = saved {
                    self.grid_mut().restore_cursor(&saved);
                    self.style = saved.style;
                }
            }
            (None, 'g') => self.grid_mut().clear_tab_stops(raw(0)),
            (None, 'm') => self.apply_sgr(params),
            (None, 'c') => self.query(TerminalQuery::PrimaryDeviceAttributes),
            (Some(b'>'), 'c') => self.query(TerminalQuery::SecondaryDeviceAttributes),
            (None, 'n') => match raw(0) {
                5 => self.query(TerminalQuery::DeviceStatus),
                6 => {
                    let grid = self.grid();
                    let (top, _) = grid.scroll_region();
                    let row = if grid.origin_mode {
                        grid.cursor_row - top + 1
                    } else {
                        grid.cursor_row + 1
                    };
                    let col = grid.cursor_col + 1;
                    self.query(TerminalQuery::CursorPosition { row, col });
                }
                other => self.query(TerminalQuery::Unknown {
                    sequence: format!("CSI {other} n"),
                }),
            },
            (None, 't') => {
                let grid = self.grid();
                let (rows, cols) = (grid.rows(), grid.cols());
                match raw(0) {
                    14 => self.query(TerminalQuery::WindowSizePixels { rows, cols }),
                    16 => self.query(TerminalQuery::CellSizePixels),
                    18 => self.query(TerminalQuery::WindowSizeChars { rows, cols }),
                    other => self.query(TerminalQuery::Unknown {
                        sequence: format!("CSI {other} t"),
                    }),
                }
            }
            (Some(b'?'), 'h') => {
                for &mode in params {
                    self.set_dec_mode(mode, true);
                }
            }
            (Some(b'?'), 'l') => {
                for &mode in params {
                    self.set_dec_mode(mode, false);
                }
            }
            (Some(b'?'), 'u') => {
                // With parameters this is a progressive-enhancement reply
                // (possibly our own, echoed), not a query.
                if params.is_empty() {
                    self.query(TerminalQuery::KittyKeyboard);
                }
            }
            // Kitty keyboard enable/disable flags: accepted, no reply.
            (Some(b'>'), 'u') | (Some(b'>'), 'm') | (Some(b'<'), 'u') => {}
            (Some(marker), action) => self.query(TerminalQuery::Unknown {
                sequence: format!("CSI {} .. {action}", marker as char),
            }),
            _ => {}
        }
    }
}

/// Decode a DECSCUSR parameter.
fn decscusr(param: u16) -> CursorStyle {
    match param {
        0 | 1 => CursorStyle { shape: CursorShape::Block, blinking: true },
        2 => CursorStyle { shape: CursorShape::Block, blinking: false },
        3 => CursorStyle { shape: CursorShape::Underline, blinking: true },
        4 => CursorStyle { shape: CursorShape::Underline, blinking: false },
        5 => CursorStyle { shape: CursorShape::Bar, blinking: true },
        6 => CursorStyle { shape: CursorShape::Bar, blinking: false },
        _ => CursorStyle::default(),
    }
}

/// Parse `38;5;n` / `38;2;r;g;b` tails. Returns the color and how many
/// params were consumed.
fn extended_color(params: &[u16]) -> Option<(Color, usize)> {
    match params.first()? {
        5 => {
            let index = *params.get(1)?;
            Some((Color::Indexed(index.min(255) as u8), 2))
        }
        2 => {
            let r = *params.get(1)?;
            let g = *params.get(2)?;
            let b = *params.get(3)?;
            Some((Color::Rgb(r.min(255) as u8, g.min(255) as u8, b.min(255) as u8), 4))
        }
        _ => None,
    }
}

impl Perform for Term {
    fn print(&mut self, ch: char) {
        let width = match ch.width() {
            Some(w) => w,
            None => return,
        };
        if width == 0 {
            self.grid_mut().attach_combining(ch);
            return;
        }
        let mut buf = [0u8; 4];
        let glyph = ch.encode_utf8(&mut buf);
        let style = self.style;
        let glyph = glyph.to_owned();
        self.grid_mut().put(&glyph, width.min(2) as u8, style);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x08 => self.grid_mut().backspace(),
            0x09 => self.grid_mut().tab(),
            0x0a => self.grid_mut().linefeed(),
            0x0d => self.grid_mut().carriage_return(),
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        if !intermediates.is_empty() {
            // Charset designations and similar have no render effect here.
            return;
        }
        match byte {
            b'7' => {
                let style = self.style;
                let saved = self.grid_mut().save_cursor(style);
                match self.active {
                    ActiveScreen::Primary => self.saved_primary = Some(saved),
                    ActiveScreen::Alternate => self.saved_alternate = Some(saved),
                }
            }
            b'8' => {
                let saved = match self.active {
                    ActiveScreen::Primary => self.saved_primary,
                    ActiveScreen::Alternate => self.saved_alternate,
                };
                if let Some(saved) = saved {
                    self.grid_mut().restore_cursor(&saved);
                    self.style = saved.style;
                }
            }
            b'c' => self.hard_reset(),
            b'D' => self.grid_mut().linefeed(),
            b'E' => {
                self.grid_mut().carriage_return();
                self.grid_mut().linefeed();
            }
            b'M' => self.grid_mut().reverse_linefeed(),
            b'H' => self.grid_mut().set_tab_stop(),
            _ => {}
        }
    }

    fn csi_dispatch(
        &mut self,
        params: &[u16],
        intermediates: &[u8],
        private: Option<u8>,
        action: char,
    ) {
        self.handle_csi(params, intermediates, private, action);
    }

    fn osc_dispatch(&mut self, data: &str, bell_terminated: bool) {
        let terminator = if bell_terminated { OscTerminator::Bell } else { OscTerminator::St };
        self.handle_osc(data, terminator);
    }

    fn dcs_dispatch(&mut self, data: &str) {
        self.query(TerminalQuery::Dcs { data: data.to_owned() });
    }
}
