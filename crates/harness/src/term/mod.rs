// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot oracle: a deterministic VT/ANSI emulator producing hashable
//! frames, with query hooks for the scripted responder.

pub mod cell;
pub mod grid;
pub mod interp;
pub mod palette;
pub mod parser;
pub mod snapshot;

pub use cell::{Cell, Color, Style};
pub use interp::{BufferPoint, OscTerminator, QueryHook, Term, TerminalQuery};
pub use snapshot::{
    ActiveScreen, BufferTail, CursorShape, CursorState, CursorStyle, ModeFlags, RichCell,
    RichLine, SnapshotFrame, Viewport,
};

use parser::Parser;

/// The emulator: a parser driving a [`Term`]. Single-threaded per
/// session; the owning session feeds it from its reader task.
pub struct Emulator {
    parser: Parser,
    term: Term,
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator").field("term", &self.term).finish()
    }
}

impl Emulator {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self { parser: Parser::new(), term: Term::new(cols, rows, scrollback_limit) }
    }

    /// Ingest raw PTY output.
    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            self.parser.advance(&mut self.term, byte);
        }
    }

    pub fn set_query_hook(&mut self, hook: QueryHook) {
        self.term.set_query_hook(hook);
    }

    /// Drain scripted reply bytes to write back to the PTY.
    pub fn take_replies(&mut self) -> Vec<Vec<u8>> {
        self.term.take_replies()
    }

    pub fn snapshot(&mut self) -> SnapshotFrame {
        self.term.snapshot(true)
    }

    /// Hash-less variant for consumers that do not need frame identity.
    pub fn snapshot_unhashed(&mut self) -> SnapshotFrame {
        self.term.snapshot(false)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.term.resize(cols, rows);
    }

    pub fn scroll_viewport(&mut self, delta: i64) {
        self.term.scroll_viewport(delta);
    }

    pub fn selection_text(&self, start: BufferPoint, end: BufferPoint) -> String {
        self.term.selection_text(start, end)
    }

    pub fn buffer_tail(&mut self, n: Option<usize>) -> BufferTail {
        self.term.buffer_tail(n)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
