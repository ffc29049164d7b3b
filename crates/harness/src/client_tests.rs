// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

/// A scripted one-connection server for client tests.
async fn scripted_server(
    respond: impl Fn(serde_json::Value) -> Vec<String> + Send + 'static,
) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            for reply in respond(value) {
                write_half.write_all(reply.as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
        }
    });
    port
}

#[tokio::test]
async fn commands_correlate_by_id() {
    let port = scripted_server(|value| {
        let id = value["commandId"].as_str().unwrap().to_owned();
        vec![
            json!({"kind": "command.accepted", "commandId": id}).to_string(),
            json!({"kind": "command.completed", "commandId": id, "result": {"ok": true}})
                .to_string(),
        ]
    })
    .await;

    let client = StreamClient::connect(ClientConfig::new("127.0.0.1", port)).await.unwrap();
    let result = client
        .send_command(Command::SessionStatus { session_id: "s1".into() })
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true}));
}

#[tokio::test]
async fn failed_commands_carry_typed_errors() {
    let port = scripted_server(|value| {
        let id = value["commandId"].as_str().unwrap().to_owned();
        vec![json!({
            "kind": "command.failed",
            "commandId": id,
            "error": {"code": "not-found", "message": "no such session: ghost"},
        })
        .to_string()]
    })
    .await;

    let client = StreamClient::connect(ClientConfig::new("127.0.0.1", port)).await.unwrap();
    let err = client
        .send_command(Command::SessionStatus { session_id: "ghost".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::NotFound);
    assert!(err.message.contains("ghost"));
}

#[tokio::test]
async fn commands_time_out() {
    let port = scripted_server(|_| vec![]).await;
    let mut config = ClientConfig::new("127.0.0.1", port);
    config.command_timeout = Duration::from_millis(50);
    let client = StreamClient::connect(config).await.unwrap();
    let err = client
        .send_command(Command::SessionStatus { session_id: "s1".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::Timeout);
}

#[tokio::test]
async fn auth_handshake_succeeds() {
    let port = scripted_server(|value| {
        assert_eq!(value["kind"], "auth");
        assert_eq!(value["token"], "secret");
        vec![json!({"kind": "auth.ok"}).to_string()]
    })
    .await;

    let mut config = ClientConfig::new("127.0.0.1", port);
    config.auth_token = Some("secret".into());
    assert!(StreamClient::connect(config).await.is_ok());
}

#[tokio::test]
async fn auth_handshake_failure_is_an_error() {
    let port = scripted_server(|_| {
        vec![json!({"kind": "auth.error", "message": "invalid token"}).to_string()]
    })
    .await;

    let mut config = ClientConfig::new("127.0.0.1", port);
    config.auth_token = Some("wrong".into());
    let err = StreamClient::connect(config).await.unwrap_err();
    assert!(err.to_string().contains("authentication failed"));
}

#[tokio::test]
async fn push_envelopes_reach_subscribers() {
    let port = scripted_server(|value| {
        let id = value["commandId"].as_str().unwrap().to_owned();
        vec![
            json!({
                "kind": "pty.output",
                "sessionId": "s1",
                "chunkBase64": encode_base64(b"hello"),
                "cursor": 1,
            })
            .to_string(),
            json!({"kind": "command.completed", "commandId": id, "result": {}}).to_string(),
        ]
    })
    .await;

    let client = StreamClient::connect(ClientConfig::new("127.0.0.1", port)).await.unwrap();
    let mut envelopes = client.subscribe();
    client
        .send_command(Command::PtyAttach { session_id: "s1".into(), since_cursor: None })
        .await
        .unwrap();

    loop {
        match envelopes.recv().await.unwrap() {
            ServerEnvelope::PtyOutput { session_id, chunk_base64, cursor } => {
                assert_eq!(session_id, "s1");
                assert_eq!(chunk_base64, encode_base64(b"hello"));
                assert_eq!(cursor, 1);
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn close_rejects_pending_commands() {
    let port = scripted_server(|_| vec![]).await;
    let client =
        Arc::new(StreamClient::connect(ClientConfig::new("127.0.0.1", port)).await.unwrap());

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client.send_command(Command::SessionStatus { session_id: "s1".into() }).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close();
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::Internal);
}

#[tokio::test]
async fn fire_and_forget_helpers_encode_envelopes() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(serde_json::from_str(&line).unwrap());
            }
        });
        port
    };

    let client = StreamClient::connect(ClientConfig::new("127.0.0.1", port)).await.unwrap();
    client.input("s1", b"hi");
    client.resize("s1", 120, 40);
    client.signal("s1", PtySignal::Interrupt);

    let input = rx.recv().await.unwrap();
    assert_eq!(input["kind"], "pty.input");
    assert_eq!(input["dataBase64"], encode_base64(b"hi"));

    let resize = rx.recv().await.unwrap();
    assert_eq!(resize["kind"], "pty.resize");
    assert_eq!(resize["cols"], 120);

    let signal = rx.recv().await.unwrap();
    assert_eq!(signal["kind"], "pty.signal");
    assert_eq!(signal["signal"], "interrupt");
}
