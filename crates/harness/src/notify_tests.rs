// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::io::Write;

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

#[yare::parameterized(
    turn_complete = { json!({"type": "agent-turn-complete"}), NotifyClass::TurnCompleted },
    turn_completed_dotted = { json!({"type": "agent.turn-completed"}), NotifyClass::TurnCompleted },
    approval = {
        json!({"type": "item/file-change/request-approval"}),
        NotifyClass::Attention(AttentionReason::Approval)
    },
    approval_subtype = {
        json!({"type": "item/file-change/request-approval/patch"}),
        NotifyClass::Attention(AttentionReason::Approval)
    },
    user_input = {
        json!({"type": "item/tool/request-input"}),
        NotifyClass::Attention(AttentionReason::UserInput)
    },
    other = { json!({"type": "session/started"}), NotifyClass::Raw },
    untyped = { json!({"message": "hi"}), NotifyClass::Raw },
)]
fn classification(payload: serde_json::Value, expected: NotifyClass) {
    assert_eq!(classify(&payload), expected);
}

#[test]
fn missing_file_polls_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = NotifyReader::new(dir.path().join("notify.jsonl"));
    assert!(reader.poll().is_empty());
}

#[test]
fn reads_only_new_bytes_each_poll() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notify.jsonl");
    let mut reader = NotifyReader::new(&path);

    append(&path, "{\"ts\":\"t1\",\"payload\":{\"type\":\"a\"}}\n");
    let first = reader.poll();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].ts, "t1");

    assert!(reader.poll().is_empty());

    append(&path, "{\"ts\":\"t2\",\"payload\":{\"type\":\"b\"}}\n");
    let second = reader.poll();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].ts, "t2");
}

#[test]
fn partial_line_waits_for_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notify.jsonl");
    let mut reader = NotifyReader::new(&path);

    append(&path, "{\"ts\":\"t1\",\"payl");
    assert!(reader.poll().is_empty());

    append(&path, "oad\":{\"type\":\"x\"}}\n");
    let records = reader.poll();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, json!({"type": "x"}));
}

#[test]
fn malformed_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notify.jsonl");
    let mut reader = NotifyReader::new(&path);

    append(&path, "not json at all\n{\"ts\":\"ok\",\"payload\":{}}\n\n");
    let records = reader.poll();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ts, "ok");
}

#[test]
fn multiple_records_in_one_poll_keep_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notify.jsonl");
    let mut reader = NotifyReader::new(&path);

    append(
        &path,
        "{\"ts\":\"1\",\"payload\":{}}\n{\"ts\":\"2\",\"payload\":{}}\n{\"ts\":\"3\",\"payload\":{}}\n",
    );
    let ts: Vec<String> = reader.poll().into_iter().map(|r| r.ts).collect();
    assert_eq!(ts, vec!["1", "2", "3"]);
}
