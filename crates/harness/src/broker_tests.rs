// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pty::{HostConfig, PtyHost};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Mutex as StdMutex;

async fn test_broker(dir: &std::path::Path) -> Broker {
    let helper = dir.join("fake-helper");
    std::fs::write(&helper, "#!/bin/sh\nexec cat\n").unwrap();
    let mut perms = std::fs::metadata(&helper).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&helper, perms).unwrap();

    let (host, _events) = PtyHost::spawn(HostConfig {
        helper,
        command: vec!["/bin/true".into()],
        cwd: None,
        env: HashMap::new(),
        cols: 80,
        rows: 24,
        session_id: "s1".into(),
    })
    .await
    .unwrap();
    Broker::new(host, 16)
}

fn recording_handlers(
    chunks: Arc<StdMutex<Vec<(u64, Vec<u8>)>>>,
    exits: Arc<StdMutex<Vec<ExitStatus>>>,
) -> AttachHandlers {
    AttachHandlers {
        on_data: Box::new(move |cursor, chunk| {
            chunks.lock().unwrap().push((cursor, chunk.to_vec()));
        }),
        on_exit: Box::new(move |exit| {
            exits.lock().unwrap().push(exit);
        }),
    }
}

#[tokio::test]
async fn cursors_are_strictly_increasing() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;
    assert_eq!(broker.latest_cursor(), 0);
    assert_eq!(broker.ingest(Bytes::from_static(b"a")), 1);
    assert_eq!(broker.ingest(Bytes::from_static(b"b")), 2);
    assert_eq!(broker.latest_cursor(), 2);
}

#[tokio::test]
async fn attach_replays_then_delivers_live() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;
    broker.ingest(Bytes::from_static(b"one"));
    broker.ingest(Bytes::from_static(b"two"));

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    broker.attach(recording_handlers(Arc::clone(&chunks), Arc::clone(&exits)), 0);
    assert_eq!(
        *chunks.lock().unwrap(),
        vec![(1, b"one".to_vec()), (2, b"two".to_vec())]
    );

    broker.ingest(Bytes::from_static(b"three"));
    assert_eq!(chunks.lock().unwrap().last().unwrap(), &(3, b"three".to_vec()));
}

#[tokio::test]
async fn attach_since_cursor_skips_older_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;
    broker.ingest(Bytes::from_static(b"one"));
    broker.ingest(Bytes::from_static(b"two"));

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    broker.attach(recording_handlers(Arc::clone(&chunks), Arc::clone(&exits)), 1);
    assert_eq!(*chunks.lock().unwrap(), vec![(2, b"two".to_vec())]);
}

#[tokio::test]
async fn attach_at_latest_cursor_gets_no_replay_but_next_live_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;
    broker.ingest(Bytes::from_static(b"old"));

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    broker.attach(recording_handlers(Arc::clone(&chunks), Arc::clone(&exits)), 5);
    assert!(chunks.lock().unwrap().is_empty());

    broker.ingest(Bytes::from_static(b"live"));
    assert_eq!(*chunks.lock().unwrap(), vec![(2, b"live".to_vec())]);
}

#[tokio::test]
async fn replay_window_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;
    for i in 0..20 {
        broker.ingest(Bytes::from(format!("c{i}")));
    }

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    broker.attach(recording_handlers(Arc::clone(&chunks), Arc::clone(&exits)), 0);
    // Window holds 16 chunks: cursors 5..=20.
    let replayed = chunks.lock().unwrap();
    assert_eq!(replayed.len(), 16);
    assert_eq!(replayed.first().unwrap().0, 5);
    assert_eq!(replayed.last().unwrap().0, 20);
}

#[tokio::test]
async fn detach_is_idempotent_and_stops_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    let id = broker.attach(recording_handlers(Arc::clone(&chunks), Arc::clone(&exits)), 0);

    broker.detach(id);
    broker.detach(id);
    broker.detach(999);

    broker.ingest(Bytes::from_static(b"after"));
    assert!(chunks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fanout_is_in_registration_order() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;

    let order = Arc::new(StdMutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        broker.attach(
            AttachHandlers {
                on_data: Box::new(move |_, _| order.lock().unwrap().push(label)),
                on_exit: Box::new(|_| {}),
            },
            0,
        );
    }
    broker.ingest(Bytes::from_static(b"x"));
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn exit_reaches_attachments_and_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;

    let chunks = Arc::new(StdMutex::new(Vec::new()));
    let exits = Arc::new(StdMutex::new(Vec::new()));
    broker.attach(recording_handlers(chunks, Arc::clone(&exits)), 0);

    let events = Arc::new(StdMutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    broker.on_event(move |event| events_clone.lock().unwrap().push(event.clone()));

    let status = ExitStatus { code: Some(0), signal: None };
    broker.emit_exit(status);
    assert_eq!(*exits.lock().unwrap(), vec![status]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![BrokerEvent::SessionExit { exit: status }]
    );
    assert_eq!(broker.exit_status(), Some(status));
}

#[tokio::test]
async fn event_listeners_unsubscribe() {
    let dir = tempfile::tempdir().unwrap();
    let broker = test_broker(dir.path()).await;

    let count = Arc::new(StdMutex::new(0usize));
    let count_clone = Arc::clone(&count);
    let id = broker.on_event(move |_| *count_clone.lock().unwrap() += 1);

    broker.emit_event(BrokerEvent::TurnCompleted);
    broker.off_event(id);
    broker.emit_event(BrokerEvent::TurnCompleted);
    assert_eq!(*count.lock().unwrap(), 1);
}
