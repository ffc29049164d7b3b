// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Screen grid: lines, cursor, scroll region, tab stops, and (on the
//! primary screen) scrollback.

use std::collections::VecDeque;

use super::cell::{Cell, Style};
use super::snapshot::{RichCell, RichLine};

/// One screen or scrollback line with a revision counter driving the
/// rich-line cache.
#[derive(Debug, Clone)]
pub struct Line {
    cells: Vec<Cell>,
    revision: u64,
    cache: Option<(u64, RichLine)>,
}

impl Line {
    pub fn blank(cols: u16) -> Self {
        Self { cells: vec![Cell::default(); cols as usize], revision: 0, cache: None }
    }

    pub fn cell(&self, col: u16) -> Option<&Cell> {
        self.cells.get(col as usize)
    }

    pub fn set_cell(&mut self, col: u16, cell: Cell) {
        if let Some(slot) = self.cells.get_mut(col as usize) {
            *slot = cell;
            self.revision += 1;
        }
    }

    pub fn cell_mut(&mut self, col: u16) -> Option<&mut Cell> {
        self.revision += 1;
        self.cells.get_mut(col as usize)
    }

    fn fill(&mut self, range: std::ops::Range<usize>, style: Style) {
        let end = range.end.min(self.cells.len());
        for cell in &mut self.cells[range.start.min(end)..end] {
            *cell = Cell::blank(style);
        }
        self.revision += 1;
    }

    fn insert_cells(&mut self, col: usize, n: usize, style: Style) {
        let width = self.cells.len();
        if col >= width {
            return;
        }
        for _ in 0..n.min(width - col) {
            self.cells.insert(col, Cell::blank(style));
            self.cells.pop();
        }
        self.revision += 1;
    }

    fn delete_cells(&mut self, col: usize, n: usize, style: Style) {
        let width = self.cells.len();
        if col >= width {
            return;
        }
        for _ in 0..n.min(width - col) {
            self.cells.remove(col);
            self.cells.push(Cell::blank(style));
        }
        self.revision += 1;
    }

    fn set_width(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::default());
        self.revision += 1;
    }

    /// The line's text with trailing blanks trimmed; continuation cells
    /// contribute nothing.
    pub fn trimmed_text(&self) -> String {
        let mut out = String::new();
        for cell in &self.cells {
            if cell.continued {
                continue;
            }
            out.push_str(&cell.glyph);
        }
        out.trim_end().to_owned()
    }

    /// Rich cells with trailing default blanks trimmed, cached until the
    /// line's revision changes.
    pub fn rich(&mut self) -> RichLine {
        if let Some((revision, ref cached)) = self.cache {
            if revision == self.revision {
                return cached.clone();
            }
        }
        let trimmed_len = self
            .cells
            .iter()
            .rposition(|c| !c.is_blank())
            .map(|i| i + 1)
            .unwrap_or(0);
        let cells = self.cells[..trimmed_len]
            .iter()
            .map(|c| RichCell {
                glyph: c.glyph.clone(),
                width: c.width,
                continued: c.continued,
                style: c.style,
            })
            .collect();
        let line = RichLine { cells };
        self.cache = Some((self.revision, line.clone()));
        line
    }
}

/// Cursor state saved by ESC 7 / CSI s and the alt-screen switches.
#[derive(Debug, Clone, Copy)]
pub struct SavedCursor {
    pub row: u16,
    pub col: u16,
    pub style: Style,
    pub origin_mode: bool,
    pub pending_wrap: bool,
}

#[derive(Debug)]
pub struct Grid {
    cols: u16,
    rows: u16,
    lines: Vec<Line>,
    pub scrollback: VecDeque<Line>,
    scrollback_limit: usize,
    /// Primary screens accrue scrollback; the alternate screen does not.
    use_scrollback: bool,
    pub cursor_row: u16,
    pub cursor_col: u16,
    pub pending_wrap: bool,
    pub origin_mode: bool,
    scroll_top: u16,
    scroll_bottom: u16,
    tab_stops: Vec<bool>,
}

fn default_tab_stops(cols: u16) -> Vec<bool> {
    (0..cols).map(|c| c != 0 && c % 8 == 0).collect()
}

impl Grid {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize, use_scrollback: bool) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            lines: (0..rows).map(|_| Line::blank(cols)).collect(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            use_scrollback,
            cursor_row: 0,
            cursor_col: 0,
            pending_wrap: false,
            origin_mode: false,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            tab_stops: default_tab_stops(cols),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn line(&self, row: u16) -> Option<&Line> {
        self.lines.get(row as usize)
    }

    pub fn line_mut(&mut self, row: u16) -> Option<&mut Line> {
        self.lines.get_mut(row as usize)
    }

    // -- Writing --------------------------------------------------------------

    /// Write one glyph at the cursor under the pending-wrap discipline.
    pub fn put(&mut self, glyph: &str, width: u8, style: Style) {
        if self.pending_wrap {
            self.wrap();
        }
        // A wide glyph that would not fit wraps immediately.
        if width == 2 && self.cursor_col + 1 >= self.cols {
            self.wrap();
        }
        let (row, col) = (self.cursor_row, self.cursor_col);
        if let Some(line) = self.lines.get_mut(row as usize) {
            line.set_cell(
                col,
                Cell { glyph: glyph.to_owned(), width, continued: false, style },
            );
            if width == 2 {
                line.set_cell(col + 1, Cell::continuation(style));
            }
        }
        let next = col as u32 + width as u32;
        if next >= self.cols as u32 {
            self.cursor_col = self.cols - 1;
            self.pending_wrap = true;
        } else {
            self.cursor_col = next as u16;
        }
    }

    fn wrap(&mut self) {
        self.pending_wrap = false;
        self.cursor_col = 0;
        self.linefeed();
    }

    /// Attach a zero-width combining mark to the preceding glyph cell.
    pub fn attach_combining(&mut self, ch: char) {
        let row = self.cursor_row;
        let mut col = if self.pending_wrap {
            self.cursor_col
        } else if self.cursor_col > 0 {
            self.cursor_col - 1
        } else {
            return;
        };
        // Step over a wide-glyph continuation cell.
        if let Some(line) = self.lines.get(row as usize) {
            if line.cell(col).map(|c| c.continued).unwrap_or(false) && col > 0 {
                col -= 1;
            }
        }
        if let Some(line) = self.lines.get_mut(row as usize) {
            if let Some(cell) = line.cell_mut(col) {
                cell.attach_combining(ch);
            }
        }
    }

    // -- Cursor motion --------------------------------------------------------

    pub fn carriage_return(&mut self) {
        self.cursor_col = 0;
        self.pending_wrap = false;
    }

    pub fn backspace(&mut self) {
        self.pending_wrap = false;
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        }
    }

    pub fn tab(&mut self) {
        self.pending_wrap = false;
        let mut col = self.cursor_col;
        while col + 1 < self.cols {
            col += 1;
            if self.tab_stops.get(col as usize).copied().unwrap_or(false) {
                break;
            }
        }
        self.cursor_col = col.min(self.cols - 1);
    }

    pub fn set_tab_stop(&mut self) {
        if let Some(slot) = self.tab_stops.get_mut(self.cursor_col as usize) {
            *slot = true;
        }
    }

    /// CSI g: 0 clears at cursor, 3 clears all.
    pub fn clear_tab_stops(&mut self, mode: u16) {
        match mode {
            0 => {
                if let Some(slot) = self.tab_stops.get_mut(self.cursor_col as usize) {
                    *slot = false;
                }
            }
            3 => self.tab_stops.iter_mut().for_each(|s| *s = false),
            _ => {}
        }
    }

    /// Line feed honoring the scroll region; scrolling at the region
    /// bottom, moving down elsewhere.
    pub fn linefeed(&mut self) {
        if self.cursor_row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
        }
    }

    /// Reverse line feed (ESC M).
    pub fn reverse_linefeed(&mut self) {
        if self.cursor_row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
        }
    }

    /// Absolute move; `row` is region-relative when origin mode is set.
    /// Inputs are 0-based and clamp to the screen (or region).
    pub fn goto(&mut self, row: u16, col: u16) {
        self.pending_wrap = false;
        let (min_row, max_row) = if self.origin_mode {
            (self.scroll_top, self.scroll_bottom)
        } else {
            (0, self.rows - 1)
        };
        self.cursor_row = (min_row + row).min(max_row);
        self.cursor_col = col.min(self.cols - 1);
    }

    pub fn move_rel(&mut self, d_row: i32, d_col: i32) {
        self.pending_wrap = false;
        // Vertical motion stops at the region edge when inside the region.
        let (min_row, max_row) = if self.cursor_row >= self.scroll_top
            && self.cursor_row <= self.scroll_bottom
        {
            (self.scroll_top, self.scroll_bottom)
        } else {
            (0, self.rows - 1)
        };
        let row = (self.cursor_row as i32 + d_row).clamp(min_row as i32, max_row as i32);
        let col = (self.cursor_col as i32 + d_col).clamp(0, self.cols as i32 - 1);
        self.cursor_row = row as u16;
        self.cursor_col = col as u16;
    }

    pub fn save_cursor(&mut self, style: Style) -> SavedCursor {
        SavedCursor {
            row: self.cursor_row,
            col: self.cursor_col,
            style,
            origin_mode: self.origin_mode,
            pending_wrap: self.pending_wrap,
        }
    }

    pub fn restore_cursor(&mut self, saved: &SavedCursor) {
        self.cursor_row = saved.row.min(self.rows - 1);
        self.cursor_col = saved.col.min(self.cols - 1);
        self.origin_mode = saved.origin_mode;
        self.pending_wrap = saved.pending_wrap && saved.col == self.cursor_col;
    }

    // -- Scrolling ------------------------------------------------------------

    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        if top < bottom && bottom < self.rows {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }
        self.goto(0, 0);
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        (self.scroll_top, self.scroll_bottom)
    }

    /// Scroll the region up; lines leaving a top-anchored region on a
    /// primary screen land in scrollback.
    pub fn scroll_up(&mut self, n: u16) {
        for _ in 0..n.min(self.rows) {
            let removed = self.lines.remove(self.scroll_top as usize);
            if self.use_scrollback && self.scroll_top == 0 && self.scrollback_limit > 0 {
                self.scrollback.push_back(removed);
                while self.scrollback.len() > self.scrollback_limit {
                    self.scrollback.pop_front();
                }
            }
            self.lines.insert(self.scroll_bottom as usize, Line::blank(self.cols));
        }
    }

    pub fn scroll_down(&mut self, n: u16) {
        for _ in 0..n.min(self.rows) {
            self.lines.remove(self.scroll_bottom as usize);
            self.lines.insert(self.scroll_top as usize, Line::blank(self.cols));
        }
    }

    // -- Erase & edit ---------------------------------------------------------

    /// CSI J. Mode 3 also clears scrollback.
    pub fn erase_display(&mut self, mode: u16, style: Style) {
        let row = self.cursor_row as usize;
        let col = self.cursor_col as usize;
        match mode {
            0 => {
                if let Some(line) = self.lines.get_mut(row) {
                    line.fill(col..self.cols as usize, style);
                }
                for line in self.lines.iter_mut().skip(row + 1) {
                    line.fill(0..self.cols as usize, style);
                }
            }
            1 => {
                for line in self.lines.iter_mut().take(row) {
                    line.fill(0..self.cols as usize, style);
                }
                if let Some(line) = self.lines.get_mut(row) {
                    line.fill(0..col + 1, style);
                }
            }
            2 => {
                for line in self.lines.iter_mut() {
                    line.fill(0..self.cols as usize, style);
                }
            }
            3 => self.scrollback.clear(),
            _ => {}
        }
    }

    /// CSI K.
    pub fn erase_line(&mut self, mode: u16, style: Style) {
        let col = self.cursor_col as usize;
        let cols = self.cols as usize;
        if let Some(line) = self.lines.get_mut(self.cursor_row as usize) {
            match mode {
                0 => line.fill(col..cols, style),
                1 => line.fill(0..col + 1, style),
                2 => line.fill(0..cols, style),
                _ => {}
            }
        }
    }

    /// CSI @.
    pub fn insert_chars(&mut self, n: u16, style: Style) {
        let col = self.cursor_col as usize;
        if let Some(line) = self.lines.get_mut(self.cursor_row as usize) {
            line.insert_cells(col, n.max(1) as usize, style);
        }
    }

    /// CSI P.
    pub fn delete_chars(&mut self, n: u16, style: Style) {
        let col = self.cursor_col as usize;
        if let Some(line) = self.lines.get_mut(self.cursor_row as usize) {
            line.delete_cells(col, n.max(1) as usize, style);
        }
    }

    /// CSI L: effective only while the cursor is inside the scroll region.
    pub fn insert_lines(&mut self, n: u16) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        for _ in 0..n.max(1).min(self.rows) {
            self.lines.remove(self.scroll_bottom as usize);
            self.lines.insert(self.cursor_row as usize, Line::blank(self.cols));
        }
        self.cursor_col = 0;
        self.pending_wrap = false;
    }

    /// CSI M.
    pub fn delete_lines(&mut self, n: u16) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        for _ in 0..n.max(1).min(self.rows) {
            self.lines.remove(self.cursor_row as usize);
            self.lines.insert(self.scroll_bottom as usize, Line::blank(self.cols));
        }
        self.cursor_col = 0;
        self.pending_wrap = false;
    }

    // -- Resize & reset -------------------------------------------------------

    /// Content-preserving resize: lines keep their prefix, the cursor
    /// clamps, tab stops re-derive, an invalid scroll region resets, and
    /// pending wrap clears once the cursor is off the right margin.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        for line in &mut self.lines {
            line.set_width(cols);
        }
        for line in &mut self.scrollback {
            line.set_width(cols);
        }
        if rows > self.rows {
            for _ in self.rows..rows {
                self.lines.push(Line::blank(cols));
            }
        } else {
            self.lines.truncate(rows as usize);
        }

        self.cols = cols;
        self.rows = rows;
        self.cursor_row = self.cursor_row.min(rows - 1);
        self.cursor_col = self.cursor_col.min(cols - 1);
        self.tab_stops = default_tab_stops(cols);
        if self.scroll_top >= self.scroll_bottom || self.scroll_bottom >= rows {
            self.scroll_top = 0;
            self.scroll_bottom = rows - 1;
        }
        if self.pending_wrap && self.cursor_col + 1 < cols {
            self.pending_wrap = false;
        }
    }

    /// Hard-reset this screen: blank lines, home cursor, full region,
    /// default tab stops, no scrollback.
    pub fn reset(&mut self) {
        self.lines = (0..self.rows).map(|_| Line::blank(self.cols)).collect();
        self.scrollback.clear();
        self.cursor_row = 0;
        self.cursor_col = 0;
        self.pending_wrap = false;
        self.origin_mode = false;
        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
        self.tab_stops = default_tab_stops(self.cols);
    }
}

#[cfg(test)]
#[path = "grid_tests.rs"]
mod tests;
