// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    api_request = { "codex.api_request", true },
    tool_decision = { "codex.tool_decision", true },
    sse_event = { "codex.sse_event", true },
    unknown_event = { "codex.user_prompt", false },
    empty = { "", false },
)]
fn running_hint_event_names(name: &str, expected: bool) {
    assert_eq!(is_running_hint(name, Some(StatusHint::Running)), expected);
}

#[test]
fn non_running_hints_never_match() {
    assert!(!is_running_hint("codex.api_request", Some(StatusHint::Completed)));
    assert!(!is_running_hint("codex.api_request", Some(StatusHint::NeedsInput)));
    assert!(!is_running_hint("codex.api_request", None));
}

#[yare::parameterized(
    cr = { b"x\r".as_slice(), true },
    lf = { b"x\n".as_slice(), true },
    plain = { b"hello".as_slice(), false },
    empty = { b"".as_slice(), false },
)]
fn turn_submission_detection(data: &[u8], expected: bool) {
    assert_eq!(input_submits_turn(data), expected);
}

#[test]
fn work_update_replaces_when_at_least_as_strong() {
    let mut current = Some(WorkText {
        text: "Running tests".into(),
        class: WorkClass::Running,
        observed_at: 100,
    });
    let changed = apply_work_update(
        &mut current,
        WorkUpdate {
            summary: Some("Executing tool call".into()),
            observed_at: 200,
            heartbeat_only: false,
        },
    );
    assert!(changed);
    assert_eq!(current.as_ref().unwrap().text, "Executing tool call");
}

#[test]
fn weaker_text_does_not_replace_stronger() {
    let mut current = Some(WorkText {
        text: "Running tests".into(),
        class: WorkClass::Running,
        observed_at: 100,
    });
    let changed = apply_work_update(
        &mut current,
        WorkUpdate { summary: Some("done".into()), observed_at: 200, heartbeat_only: false },
    );
    assert!(!changed);
    assert_eq!(current.as_ref().unwrap().text, "Running tests");
}

#[test]
fn stale_observed_at_is_ignored() {
    let mut current = Some(WorkText {
        text: "Running tests".into(),
        class: WorkClass::Running,
        observed_at: 100,
    });
    let changed = apply_work_update(
        &mut current,
        WorkUpdate {
            summary: Some("Running build".into()),
            observed_at: 50,
            heartbeat_only: false,
        },
    );
    assert!(!changed);
    assert_eq!(current.as_ref().unwrap().observed_at, 100);
}

#[test]
fn heartbeat_bumps_timestamp_only_while_running() {
    let mut current = Some(WorkText {
        text: "Running tests".into(),
        class: WorkClass::Running,
        observed_at: 100,
    });
    assert!(apply_work_update(
        &mut current,
        WorkUpdate { summary: None, observed_at: 150, heartbeat_only: true },
    ));
    let stored = current.clone().unwrap();
    assert_eq!(stored.observed_at, 150);
    assert_eq!(stored.text, "Running tests");

    let mut completed = Some(WorkText {
        text: "done".into(),
        class: WorkClass::Completed,
        observed_at: 100,
    });
    assert!(!apply_work_update(
        &mut completed,
        WorkUpdate { summary: None, observed_at: 150, heartbeat_only: true },
    ));
    assert_eq!(completed.unwrap().observed_at, 100);
}

#[test]
fn first_update_always_lands() {
    let mut current = None;
    assert!(apply_work_update(
        &mut current,
        WorkUpdate { summary: Some("anything".into()), observed_at: 1, heartbeat_only: false },
    ));
    assert_eq!(current.unwrap().class, WorkClass::Unclassified);
}

#[test]
fn status_wire_strings() {
    assert_eq!(serde_json::to_string(&SessionStatus::NeedsInput).unwrap(), "\"needs-input\"");
    assert_eq!(serde_json::to_string(&AttentionReason::UserInput).unwrap(), "\"user-input\"");
    assert_eq!(serde_json::to_string(&ControllerType::Automation).unwrap(), "\"automation\"");
}
