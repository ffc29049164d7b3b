// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn obj(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn adapter_state_merges_per_top_level_key() {
    let mut state = obj(json!({"codex": {"thread": "t1"}, "claude": {"resume": "r1"}}));
    merge_adapter_state(&mut state, obj(json!({"codex": {"thread": "t2"}})));

    assert_eq!(state["codex"], json!({"thread": "t2"}));
    assert_eq!(state["claude"], json!({"resume": "r1"}));
}

#[test]
fn adapter_state_null_removes_key() {
    let mut state = obj(json!({"codex": {"thread": "t1"}}));
    merge_adapter_state(&mut state, obj(json!({"codex": null})));
    assert!(state.is_empty());
}

#[test]
fn scope_serializes_camel_case_and_skips_none() {
    let scope = Scope {
        tenant_id: Some("t".into()),
        user_id: None,
        workspace_id: Some("w".into()),
        worktree_id: None,
    };
    let json = serde_json::to_value(&scope).unwrap();
    assert_eq!(json, json!({"tenantId": "t", "workspaceId": "w"}));
}

#[test]
fn directory_round_trips_with_flattened_scope() {
    let dir = Directory {
        id: "d1".into(),
        scope: Scope { tenant_id: Some("t".into()), ..Default::default() },
        name: "repo".into(),
        path: "/src/repo".into(),
        created_at: 1,
        updated_at: 2,
        archived_at: None,
    };
    let json = serde_json::to_value(&dir).unwrap();
    assert_eq!(json["tenantId"], "t");
    let back: Directory = serde_json::from_value(json).unwrap();
    assert_eq!(back, dir);
}

#[test]
fn task_status_wire_strings() {
    assert_eq!(serde_json::to_string(&TaskStatus::InProgress).unwrap(), "\"in-progress\"");
    assert_eq!(serde_json::to_string(&TaskStatus::Draft).unwrap(), "\"draft\"");
}

#[test]
fn repository_metadata_keeps_extra_keys() {
    let json = json!({"homePriority": 3, "color": "teal"});
    let meta: RepositoryMetadata = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(meta.home_priority, 3);
    assert_eq!(serde_json::to_value(&meta).unwrap(), json);
}
