// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session broker: replay window, cursor assignment, and multi-attachment
//! fan-out over one PTY host.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::protocol::ExitStatus;
use crate::pty::PtyHost;
use crate::status::AttentionReason;

/// Callbacks for one attachment. `on_data` receives `(cursor, chunk)`.
pub struct AttachHandlers {
    pub on_data: Box<dyn Fn(u64, &Bytes) + Send + Sync>,
    pub on_exit: Box<dyn Fn(ExitStatus) + Send + Sync>,
}

/// Higher-level session events fanned to event listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    TerminalOutput { cursor: u64, chunk: Bytes },
    SessionExit { exit: ExitStatus },
    Notify { ts: String, payload: serde_json::Value },
    AttentionRequired { reason: AttentionReason },
    TurnCompleted,
}

type EventListener = Arc<dyn Fn(&BrokerEvent) + Send + Sync>;

struct Inner {
    replay: VecDeque<(u64, Bytes)>,
    replay_limit: usize,
    latest_cursor: u64,
    attachments: Vec<(u64, Arc<AttachHandlers>)>,
    next_attachment_id: u64,
    listeners: Vec<(u64, EventListener)>,
    next_listener_id: u64,
    exited: Option<ExitStatus>,
}

pub struct Broker {
    host: PtyHost,
    inner: Mutex<Inner>,
}

impl Broker {
    pub fn new(host: PtyHost, replay_limit: usize) -> Self {
        Self {
            host,
            inner: Mutex::new(Inner {
                replay: VecDeque::new(),
                replay_limit,
                latest_cursor: 0,
                attachments: Vec::new(),
                next_attachment_id: 0,
                listeners: Vec::new(),
                next_listener_id: 0,
                exited: None,
            }),
        }
    }

    /// Attach handlers, replaying buffered chunks with cursor >
    /// `since_cursor` synchronously before any live delivery.
    pub fn attach(&self, handlers: AttachHandlers, since_cursor: u64) -> u64 {
        let mut inner = self.inner.lock();
        for (cursor, chunk) in inner.replay.iter() {
            if *cursor > since_cursor {
                (handlers.on_data)(*cursor, chunk);
            }
        }
        let id = inner.next_attachment_id;
        inner.next_attachment_id += 1;
        inner.attachments.push((id, Arc::new(handlers)));
        id
    }

    /// Silent no-op on unknown ids.
    pub fn detach(&self, attachment_id: u64) {
        self.inner.lock().attachments.retain(|(id, _)| *id != attachment_id);
    }

    pub fn latest_cursor(&self) -> u64 {
        self.inner.lock().latest_cursor
    }

    /// Subscribe to broker events; returns an unsubscribe handle.
    pub fn on_event(&self, listener: impl Fn(&BrokerEvent) + Send + Sync + 'static) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn off_event(&self, listener_id: u64) {
        self.inner.lock().listeners.retain(|(id, _)| *id != listener_id);
    }

    /// Ingest one stdout chunk: assign the next cursor, deliver to
    /// attachments in registration order, then store into the replay
    /// window, then notify event listeners.
    pub fn ingest(&self, chunk: Bytes) -> u64 {
        let (cursor, listeners) = {
            let mut inner = self.inner.lock();
            inner.latest_cursor += 1;
            let cursor = inner.latest_cursor;
            // Snapshot the handler sets so a mid-dispatch detach is safe.
            let attachments: Vec<_> =
                inner.attachments.iter().map(|(_, h)| Arc::clone(h)).collect();
            for handler in &attachments {
                (handler.on_data)(cursor, &chunk);
            }
            inner.replay.push_back((cursor, chunk.clone()));
            while inner.replay.len() > inner.replay_limit {
                inner.replay.pop_front();
            }
            let listeners: Vec<_> = inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (cursor, listeners)
        };
        let event = BrokerEvent::TerminalOutput { cursor, chunk };
        for listener in listeners {
            listener(&event);
        }
        cursor
    }

    /// Record the exit and fan it out to attachments and listeners.
    pub fn emit_exit(&self, exit: ExitStatus) {
        let (attachments, listeners) = {
            let mut inner = self.inner.lock();
            inner.exited = Some(exit);
            let attachments: Vec<_> =
                inner.attachments.iter().map(|(_, h)| Arc::clone(h)).collect();
            let listeners: Vec<_> = inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (attachments, listeners)
        };
        for handler in attachments {
            (handler.on_exit)(exit);
        }
        let event = BrokerEvent::SessionExit { exit };
        for listener in listeners {
            listener(&event);
        }
    }

    /// Fan a notify/attention/turn event to listeners.
    pub fn emit_event(&self, event: BrokerEvent) {
        let listeners: Vec<_> = {
            let inner = self.inner.lock();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().exited
    }

    // -- PTY proxies ----------------------------------------------------------

    pub async fn write(&self, data: Bytes) -> anyhow::Result<()> {
        self.host.write(data).await
    }

    pub async fn write_unprobed(&self, data: Bytes) -> anyhow::Result<()> {
        self.host.write_unprobed(data).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.host.resize(cols, rows).await
    }

    pub async fn close(&self) -> ExitStatus {
        self.host.close().await
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
