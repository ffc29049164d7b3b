// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the real `harness` binary.

use std::io::Write as _;
use std::time::{Duration, Instant};

use harness::error::ErrorCode;
use harness::protocol::{
    decode_base64, Command, PtyStartParams, ServerEnvelope, SessionListParams, SessionSort,
};
use harness::records::Scope;
use serde_json::json;
use specs::{wait_for, HarnessProcess};

fn cat_session(session_id: &str, notify_path: Option<String>) -> Command {
    Command::PtyStart(PtyStartParams {
        session_id: session_id.into(),
        command: vec!["/bin/cat".into()],
        cwd: None,
        env: None,
        initial_cols: 80,
        initial_rows: 24,
        scope: Scope { tenant_id: Some("t1".into()), ..Default::default() },
        directory_id: None,
        conversation_id: None,
        notify_path,
        ingest_snapshots: true,
    })
}

async fn status_of(client: &harness::client::StreamClient, session_id: &str) -> serde_json::Value {
    client
        .send_command(Command::SessionStatus { session_id: session_id.into() })
        .await
        .expect("session.status")
}

#[tokio::test]
async fn start_echo_and_roundtrip_probe() {
    let process = HarnessProcess::builder().perf_log().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("echo-1", None)).await.unwrap();
    client
        .send_command(Command::PtyAttach { session_id: "echo-1".into(), since_cursor: None })
        .await
        .unwrap();

    let mut envelopes = client.subscribe();
    client.input("echo-1", b"ping\n");

    // Expect the echo (cat on a PTY upgrades \n to \r\n) on pty.output.
    let mut echoed = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let envelope =
            tokio::time::timeout(Duration::from_secs(5), envelopes.recv()).await;
        let Ok(Ok(envelope)) = envelope else { break };
        if let ServerEnvelope::PtyOutput { session_id, chunk_base64, .. } = envelope {
            assert_eq!(session_id, "echo-1");
            echoed.extend_from_slice(&decode_base64(&chunk_base64).unwrap());
            let text = String::from_utf8_lossy(&echoed);
            if text.contains("ping\n") || text.contains("ping\r\n") {
                break;
            }
        }
    }
    let text = String::from_utf8_lossy(&echoed);
    assert!(text.contains("ping"), "no echo seen, got: {text:?}");

    // The keystroke probe completed and landed in the perf log.
    let perf_path = process.perf_log().unwrap().to_path_buf();
    let seen = wait_for(Duration::from_secs(5), move || {
        std::fs::read_to_string(&perf_path)
            .map(|s| s.contains("pty.keystroke.roundtrip"))
            .unwrap_or(false)
    })
    .await;
    assert!(seen, "no pty.keystroke.roundtrip observation recorded");
}

#[tokio::test]
async fn needs_input_sticks_across_session_restart() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    let notify = process.scratch("x.notify.jsonl");
    client
        .send_command(cat_session("x", Some(notify.to_string_lossy().into_owned())))
        .await
        .unwrap();

    // The notify hook reports an approval request.
    let mut file = std::fs::File::create(&notify).unwrap();
    writeln!(
        file,
        "{}",
        json!({"ts": "t1", "payload": {"type": "item/file-change/request-approval"}})
    )
    .unwrap();
    drop(file);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = status_of(&client, "x").await;
        if status["status"] == "needs-input" {
            assert_eq!(status["attentionReason"], "approval");
            break;
        }
        assert!(Instant::now() < deadline, "session never reached needs-input: {status}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Close the helper, then start the same id again.
    client.send_command(Command::PtyClose { session_id: "x".into() }).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = status_of(&client, "x").await;
        if status["live"] == false {
            break;
        }
        assert!(Instant::now() < deadline, "session never exited");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    client.send_command(cat_session("x", None)).await.unwrap();
    let status = status_of(&client, "x").await;
    assert_eq!(status["status"], "needs-input");
    assert_eq!(status["attentionReason"], "approval");
    assert_eq!(status["live"], true);
}

#[tokio::test]
async fn attention_first_ordering() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("a", None)).await.unwrap();
    let notify_b = process.scratch("b.notify.jsonl");
    client
        .send_command(cat_session("b", Some(notify_b.to_string_lossy().into_owned())))
        .await
        .unwrap();

    let mut file = std::fs::File::create(&notify_b).unwrap();
    writeln!(
        file,
        "{}",
        json!({"ts": "t1", "payload": {"type": "item/tool/request-input"}})
    )
    .unwrap();
    drop(file);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = status_of(&client, "b").await;
        if status["status"] == "needs-input" {
            break;
        }
        assert!(Instant::now() < deadline, "b never reached needs-input");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let result = client
        .send_command(Command::SessionList(SessionListParams {
            sort: SessionSort::AttentionFirst,
            ..Default::default()
        }))
        .await
        .unwrap();
    let sessions = result["sessions"].as_array().unwrap();
    assert_eq!(sessions[0]["sessionId"], "b");
    assert_eq!(sessions[0]["status"], "needs-input");
    assert_eq!(sessions[1]["sessionId"], "a");

    // The attention queue agrees.
    let attention = client
        .send_command(Command::AttentionList(SessionListParams::default()))
        .await
        .unwrap();
    let queue = attention["sessions"].as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["sessionId"], "b");
}

#[tokio::test]
async fn snapshot_reflects_session_output() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("snap", None)).await.unwrap();
    client.input("snap", b"hello-snapshot\n");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let result = client
            .send_command(Command::SessionSnapshot {
                session_id: "snap".into(),
                include_hash: true,
            })
            .await
            .unwrap();
        let lines = result["frame"]["lines"].as_array().unwrap();
        let joined: String =
            lines.iter().filter_map(|l| l.as_str()).collect::<Vec<_>>().join("\n");
        if joined.contains("hello-snapshot") {
            assert!(result["frame"]["frameHash"].is_string());
            break;
        }
        assert!(Instant::now() < deadline, "snapshot never showed output: {joined:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn auth_gates_commands() {
    let process = HarnessProcess::builder().auth_token("secret").spawn().await.unwrap();

    // Unauthenticated commands fail closed.
    let raw = process.raw_client().await.unwrap();
    let err = raw
        .send_command(Command::SessionList(SessionListParams::default()))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthenticationRequired);

    // The authenticated client works.
    let client = process.client().await.unwrap();
    let result =
        client.send_command(Command::SessionList(SessionListParams::default())).await.unwrap();
    assert!(result["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn live_session_id_collision_is_rejected() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("dup", None)).await.unwrap();
    let err = client.send_command(cat_session("dup", None)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn signals_to_dead_sessions_are_rejected() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    let err = client
        .send_command(Command::SessionInterrupt { session_id: "ghost".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    client.send_command(cat_session("sig", None)).await.unwrap();
    client.send_command(Command::PtyClose { session_id: "sig".into() }).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = status_of(&client, "sig").await;
        if status["live"] == false {
            break;
        }
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let err = client
        .send_command(Command::SessionInterrupt { session_id: "sig".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PreconditionFailed);
    assert!(err.message.contains("not live"));
}

#[tokio::test]
async fn claim_takeover_and_respond_enforcement() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("claimed", None)).await.unwrap();
    client
        .send_command(Command::SessionClaim {
            session_id: "claimed".into(),
            controller: harness::protocol::ControllerParams {
                controller_id: "agent-1".into(),
                controller_type: harness::status::ControllerType::Agent,
                controller_label: "planner".into(),
            },
            takeover: false,
        })
        .await
        .unwrap();

    // A second claim without takeover fails and names the claimant.
    let err = client
        .send_command(Command::SessionClaim {
            session_id: "claimed".into(),
            controller: harness::protocol::ControllerParams {
                controller_id: "agent-2".into(),
                controller_type: harness::status::ControllerType::Agent,
                controller_label: "executor".into(),
            },
            takeover: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PreconditionFailed);
    assert!(err.message.contains("planner"));

    // Respond from another controller fails too.
    let err = client
        .send_command(Command::SessionRespond {
            session_id: "claimed".into(),
            text: "hello".into(),
            submit: true,
            controller_id: Some("agent-2".into()),
        })
        .await
        .unwrap_err();
    assert!(err.message.contains("planner"));

    // Takeover replaces the controller.
    let result = client
        .send_command(Command::SessionClaim {
            session_id: "claimed".into(),
            controller: harness::protocol::ControllerParams {
                controller_id: "agent-2".into(),
                controller_type: harness::status::ControllerType::Agent,
                controller_label: "executor".into(),
            },
            takeover: true,
        })
        .await
        .unwrap();
    assert_eq!(result["controller"]["controllerId"], "agent-2");

    // Now the claimant can respond.
    client
        .send_command(Command::SessionRespond {
            session_id: "claimed".into(),
            text: "hello".into(),
            submit: true,
            controller_id: Some("agent-2".into()),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn stream_subscription_sees_session_lifecycle() {
    let process = HarnessProcess::builder().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    let sub = client
        .send_command(Command::StreamSubscribe { filter: Default::default(), after_cursor: None })
        .await
        .unwrap();
    let subscription_id = sub["subscriptionId"].as_str().unwrap().to_owned();

    let mut envelopes = client.subscribe();
    client.send_command(cat_session("streamed", None)).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let envelope =
            tokio::time::timeout(Duration::from_secs(5), envelopes.recv()).await;
        let Ok(Ok(envelope)) = envelope else {
            panic!("no stream.event before timeout")
        };
        if let ServerEnvelope::StreamEvent { subscription_id: sid, cursor, event } = envelope {
            assert_eq!(sid, subscription_id);
            assert!(cursor >= 1);
            let value = serde_json::to_value(&event).unwrap();
            if value["type"] == "session-status" {
                assert_eq!(value["sessionId"], "streamed");
                break;
            }
        }
        assert!(Instant::now() < deadline);
    }
}

#[tokio::test]
async fn tombstone_ttl_zero_destroys_on_exit() {
    let process = HarnessProcess::builder().tombstone_ttl_ms(0).spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client.send_command(cat_session("gone", None)).await.unwrap();
    client.send_command(Command::PtyClose { session_id: "gone".into() }).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let result = client
            .send_command(Command::SessionStatus { session_id: "gone".into() })
            .await;
        match result {
            Err(err) => {
                assert_eq!(err.code, ErrorCode::NotFound);
                break;
            }
            Ok(_) => {
                assert!(Instant::now() < deadline, "tombstone was not destroyed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
