// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use bytes::Bytes;

#[test]
fn data_round_trip() {
    let frame = Frame::Data(Bytes::from_static(b"hello"));
    let mut decoder = Decoder::new();
    decoder.push(&frame.to_bytes());
    assert_eq!(decoder.next(), Ok(Some(frame)));
    assert_eq!(decoder.next(), Ok(None));
}

#[test]
fn empty_data_round_trip() {
    let frame = Frame::Data(Bytes::new());
    let mut decoder = Decoder::new();
    decoder.push(&frame.to_bytes());
    assert_eq!(decoder.next(), Ok(Some(Frame::Data(Bytes::new()))));
}

#[test]
fn resize_round_trip() {
    let frame = Frame::Resize { cols: 120, rows: 40 };
    let mut decoder = Decoder::new();
    decoder.push(&frame.to_bytes());
    assert_eq!(decoder.next(), Ok(Some(frame)));
}

#[test]
fn close_round_trip() {
    let mut decoder = Decoder::new();
    decoder.push(&Frame::Close.to_bytes());
    assert_eq!(decoder.next(), Ok(Some(Frame::Close)));
}

#[test]
fn resize_wire_format_is_big_endian() {
    let bytes = Frame::Resize { cols: 0x0102, rows: 0x0304 }.to_bytes();
    assert_eq!(bytes, vec![0x02, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn data_length_prefix_is_big_endian() {
    let bytes = Frame::Data(Bytes::from_static(b"ab")).to_bytes();
    assert_eq!(bytes, vec![0x01, 0, 0, 0, 2, b'a', b'b']);
}

#[test]
fn split_delivery_waits_for_completion() {
    let frame = Frame::Data(Bytes::from_static(b"split across reads"));
    let wire = frame.to_bytes();
    let mut decoder = Decoder::new();

    decoder.push(&wire[..3]);
    assert_eq!(decoder.next(), Ok(None));
    decoder.push(&wire[3..7]);
    assert_eq!(decoder.next(), Ok(None));
    decoder.push(&wire[7..]);
    assert_eq!(decoder.next(), Ok(Some(frame)));
}

#[test]
fn back_to_back_frames_drain_in_order() {
    let mut wire = Vec::new();
    Frame::Data(Bytes::from_static(b"one")).encode(&mut wire);
    Frame::Resize { cols: 80, rows: 24 }.encode(&mut wire);
    Frame::Close.encode(&mut wire);

    let mut decoder = Decoder::new();
    decoder.push(&wire);
    assert_eq!(decoder.next(), Ok(Some(Frame::Data(Bytes::from_static(b"one")))));
    assert_eq!(decoder.next(), Ok(Some(Frame::Resize { cols: 80, rows: 24 })));
    assert_eq!(decoder.next(), Ok(Some(Frame::Close)));
    assert_eq!(decoder.next(), Ok(None));
}

#[test]
fn unknown_opcode_is_fatal() {
    let mut decoder = Decoder::new();
    decoder.push(&[0x7f, 0, 0]);
    assert_eq!(decoder.next(), Err(DecodeError::UnknownOpcode(0x7f)));
}
