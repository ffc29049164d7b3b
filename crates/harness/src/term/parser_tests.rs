// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

/// Test performer that records dispatched actions.
#[derive(Debug, Default)]
struct Recorder {
    actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Print(char),
    Execute(u8),
    Esc(Vec<u8>, u8),
    Csi(Vec<u16>, Vec<u8>, Option<u8>, char),
    Osc(String, bool),
    Dcs(String),
}

impl Perform for Recorder {
    fn print(&mut self, ch: char) {
        self.actions.push(Action::Print(ch));
    }
    fn execute(&mut self, byte: u8) {
        self.actions.push(Action::Execute(byte));
    }
    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        self.actions.push(Action::Esc(intermediates.to_vec(), byte));
    }
    fn csi_dispatch(&mut self, params: &[u16], intermediates: &[u8], private: Option<u8>, action: char) {
        self.actions.push(Action::Csi(params.to_vec(), intermediates.to_vec(), private, action));
    }
    fn osc_dispatch(&mut self, data: &str, bell_terminated: bool) {
        self.actions.push(Action::Osc(data.to_owned(), bell_terminated));
    }
    fn dcs_dispatch(&mut self, data: &str) {
        self.actions.push(Action::Dcs(data.to_owned()));
    }
}

fn feed(input: &[u8]) -> Vec<Action> {
    let mut parser = Parser::new();
    let mut recorder = Recorder::default();
    for &b in input {
        parser.advance(&mut recorder, b);
    }
    recorder.actions
}

#[test]
fn plain_text_prints() {
    assert_eq!(feed(b"hi"), vec![Action::Print('h'), Action::Print('i')]);
}

#[test]
fn c0_bytes_execute() {
    assert_eq!(
        feed(b"a\r\n"),
        vec![Action::Print('a'), Action::Execute(0x0d), Action::Execute(0x0a)]
    );
}

#[test]
fn csi_with_params() {
    assert_eq!(feed(b"\x1b[1;31m"), vec![Action::Csi(vec![1, 31], vec![], None, 'm')]);
}

#[test]
fn csi_empty_params() {
    assert_eq!(feed(b"\x1b[;5H"), vec![Action::Csi(vec![0, 5], vec![], None, 'H')]);
    // No digits at all: dispatched with no params.
    assert_eq!(feed(b"\x1b[H"), vec![Action::Csi(vec![], vec![], None, 'H')]);
}

#[test]
fn csi_private_marker() {
    assert_eq!(
        feed(b"\x1b[?1049h"),
        vec![Action::Csi(vec![1049], vec![], Some(b'?'), 'h')]
    );
    assert_eq!(feed(b"\x1b[>c"), vec![Action::Csi(vec![], vec![], Some(b'>'), 'c')]);
}

#[test]
fn bare_query_and_parameterized_reply_stay_distinct() {
    assert_eq!(feed(b"\x1b[?u"), vec![Action::Csi(vec![], vec![], Some(b'?'), 'u')]);
    assert_eq!(feed(b"\x1b[?0u"), vec![Action::Csi(vec![0], vec![], Some(b'?'), 'u')]);
}

#[test]
fn csi_intermediates() {
    assert_eq!(
        feed(b"\x1b[2 q"),
        vec![Action::Csi(vec![2], vec![b' '], None, 'q')]
    );
}

#[test]
fn esc_dispatch_plain_and_intermediate() {
    assert_eq!(feed(b"\x1b7"), vec![Action::Esc(vec![], b'7')]);
    assert_eq!(feed(b"\x1b(B"), vec![Action::Esc(vec![b'('], b'B')]);
}

#[test]
fn osc_bell_terminated() {
    assert_eq!(
        feed(b"\x1b]10;?\x07"),
        vec![Action::Osc("10;?".into(), true)]
    );
}

#[test]
fn osc_st_terminated() {
    assert_eq!(
        feed(b"\x1b]11;?\x1b\\"),
        vec![Action::Osc("11;?".into(), false)]
    );
}

#[test]
fn osc_aborted_by_new_sequence() {
    // ESC not followed by `\` abandons the OSC and starts a new sequence.
    assert_eq!(feed(b"\x1b]0;title\x1b[1m"), vec![Action::Csi(vec![1], vec![], None, 'm')]);
}

#[test]
fn dcs_collects_until_st() {
    assert_eq!(feed(b"\x1bPq=?\x1b\\"), vec![Action::Dcs("q=?".into())]);
}

#[test]
fn utf8_across_chunk_boundaries() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::default();
    let bytes = "é".as_bytes();
    parser.advance(&mut recorder, bytes[0]);
    assert!(recorder.actions.is_empty());
    parser.advance(&mut recorder, bytes[1]);
    assert_eq!(recorder.actions, vec![Action::Print('é')]);
}

#[test]
fn four_byte_utf8() {
    assert_eq!(feed("🦀".as_bytes()), vec![Action::Print('🦀')]);
}

#[test]
fn invalid_utf8_prints_replacement() {
    // Lead byte followed by ASCII: replacement char, then the ASCII byte.
    assert_eq!(
        feed(&[0xc3, b'x']),
        vec![Action::Print(char::REPLACEMENT_CHARACTER), Action::Print('x')]
    );
}

#[test]
fn csi_split_across_feeds() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::default();
    for &b in b"\x1b[38;5;1" {
        parser.advance(&mut recorder, b);
    }
    assert!(recorder.actions.is_empty());
    for &b in b"2m" {
        parser.advance(&mut recorder, b);
    }
    assert_eq!(recorder.actions, vec![Action::Csi(vec![38, 5, 12], vec![], None, 'm')]);
}

#[test]
fn c0_inside_csi_executes_immediately() {
    assert_eq!(
        feed(b"\x1b[1\x0a;2m"),
        vec![Action::Execute(0x0a), Action::Csi(vec![1, 2], vec![], None, 'm')]
    );
}
