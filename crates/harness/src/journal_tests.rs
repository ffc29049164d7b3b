// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{encode_base64, EventScope, ObservedPayload};
use crate::records::Scope;
use std::sync::Mutex;

fn event(tenant: &str, session: &str) -> ObservedEvent {
    ObservedEvent {
        scope: EventScope {
            scope: Scope { tenant_id: Some(tenant.into()), ..Default::default() },
            directory_id: None,
            conversation_id: None,
        },
        observed_at: 1,
        payload: ObservedPayload::SessionStatus {
            session_id: session.into(),
            status: crate::status::SessionStatus::Running,
            attention_reason: None,
            live: true,
        },
    }
}

fn output_event(session: &str) -> ObservedEvent {
    ObservedEvent {
        scope: EventScope::default(),
        observed_at: 1,
        payload: ObservedPayload::SessionOutput {
            session_id: session.into(),
            cursor: 1,
            chunk_base64: encode_base64(b"x"),
        },
    }
}

type Delivered = Arc<Mutex<Vec<(String, u64)>>>;

fn sink(delivered: &Delivered) -> SubscriptionSink {
    let delivered = Arc::clone(delivered);
    Arc::new(move |sub: &str, cursor: u64, _event: &ObservedEvent| {
        delivered.lock().unwrap().push((sub.to_owned(), cursor));
    })
}

#[test]
fn cursors_are_globally_monotonic() {
    let mut journal = Journal::new(16);
    assert_eq!(journal.publish(event("t", "a")), 1);
    assert_eq!(journal.publish(event("t", "b")), 2);
    assert_eq!(journal.current_cursor(), 2);
}

#[test]
fn live_dispatch_respects_filter() {
    let mut journal = Journal::new(16);
    let delivered: Delivered = Default::default();
    journal.subscribe(
        "sub1".into(),
        1,
        StreamFilter { tenant_id: Some("t1".into()), ..Default::default() },
        None,
        sink(&delivered),
    );

    journal.publish(event("t1", "a"));
    journal.publish(event("t2", "b"));
    journal.publish(event("t1", "c"));

    assert_eq!(
        *delivered.lock().unwrap(),
        vec![("sub1".to_owned(), 1), ("sub1".to_owned(), 3)]
    );
    assert_eq!(journal.subscription_cursor("sub1"), Some(3));
}

#[test]
fn replay_from_after_cursor_then_live() {
    let mut journal = Journal::new(16);
    journal.publish(event("t1", "a"));
    journal.publish(event("t1", "b"));
    journal.publish(event("t1", "c"));

    let delivered: Delivered = Default::default();
    let current = journal.subscribe(
        "sub1".into(),
        1,
        StreamFilter::default(),
        Some(1),
        sink(&delivered),
    );
    assert_eq!(current, 3);
    assert_eq!(
        *delivered.lock().unwrap(),
        vec![("sub1".to_owned(), 2), ("sub1".to_owned(), 3)]
    );

    journal.publish(event("t1", "d"));
    assert_eq!(delivered.lock().unwrap().last(), Some(&("sub1".to_owned(), 4)));
}

#[test]
fn replay_past_ring_lower_bound_returns_no_backfill() {
    let mut journal = Journal::new(2);
    for i in 0..5 {
        journal.publish(event("t1", &i.to_string()));
    }
    // Ring holds cursors 4 and 5; cursor 1 was trimmed away.
    let delivered: Delivered = Default::default();
    let current = journal.subscribe(
        "sub1".into(),
        1,
        StreamFilter::default(),
        Some(1),
        sink(&delivered),
    );
    assert_eq!(current, 5);
    assert!(delivered.lock().unwrap().is_empty());

    // Exactly at the lower bound still replays.
    let delivered2: Delivered = Default::default();
    journal.subscribe("sub2".into(), 1, StreamFilter::default(), Some(3), sink(&delivered2));
    assert_eq!(
        *delivered2.lock().unwrap(),
        vec![("sub2".to_owned(), 4), ("sub2".to_owned(), 5)]
    );
}

#[test]
fn subscribe_without_after_cursor_gets_live_only() {
    let mut journal = Journal::new(16);
    journal.publish(event("t1", "a"));

    let delivered: Delivered = Default::default();
    journal.subscribe("sub1".into(), 1, StreamFilter::default(), None, sink(&delivered));
    assert!(delivered.lock().unwrap().is_empty());

    journal.publish(event("t1", "b"));
    assert_eq!(*delivered.lock().unwrap(), vec![("sub1".to_owned(), 2)]);
}

#[test]
fn include_output_gates_session_output() {
    let mut journal = Journal::new(16);
    let without: Delivered = Default::default();
    let with: Delivered = Default::default();
    journal.subscribe("quiet".into(), 1, StreamFilter::default(), None, sink(&without));
    journal.subscribe(
        "loud".into(),
        1,
        StreamFilter { include_output: true, ..Default::default() },
        None,
        sink(&with),
    );

    journal.publish(output_event("s1"));
    assert!(without.lock().unwrap().is_empty());
    assert_eq!(with.lock().unwrap().len(), 1);
}

#[test]
fn unsubscribe_is_idempotent() {
    let mut journal = Journal::new(16);
    let delivered: Delivered = Default::default();
    journal.subscribe("sub1".into(), 1, StreamFilter::default(), None, sink(&delivered));

    assert!(journal.unsubscribe("sub1"));
    assert!(!journal.unsubscribe("sub1"));
    assert!(!journal.unsubscribe("ghost"));

    journal.publish(event("t1", "a"));
    assert!(delivered.lock().unwrap().is_empty());
}

#[test]
fn remove_connection_tears_down_its_subscriptions() {
    let mut journal = Journal::new(16);
    let conn1: Delivered = Default::default();
    let conn2: Delivered = Default::default();
    journal.subscribe("sub1".into(), 1, StreamFilter::default(), None, sink(&conn1));
    journal.subscribe("sub2".into(), 2, StreamFilter::default(), None, sink(&conn2));

    journal.remove_connection(1);
    assert!(!journal.has_subscription("sub1"));
    assert!(journal.has_subscription("sub2"));

    journal.publish(event("t1", "a"));
    assert!(conn1.lock().unwrap().is_empty());
    assert_eq!(conn2.lock().unwrap().len(), 1);
}

#[test]
fn delivery_is_in_cursor_order_per_subscription() {
    let mut journal = Journal::new(16);
    journal.publish(event("t1", "a"));
    journal.publish(event("t1", "b"));

    let delivered: Delivered = Default::default();
    journal.subscribe("sub1".into(), 1, StreamFilter::default(), Some(0), sink(&delivered));
    journal.publish(event("t1", "c"));

    let cursors: Vec<u64> = delivered.lock().unwrap().iter().map(|(_, c)| *c).collect();
    assert_eq!(cursors, vec![1, 2, 3]);
}
