// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state: line framing, the bounded write queue, and
//! attachment/subscription bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::ServerEnvelope;

/// Incoming line framer. Newline-delimited; messages over `max_len` are
/// dropped whole (the tail is skipped through the next newline).
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_len: usize,
    skipping: bool,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self { buf: Vec::new(), max_len, skipping: false }
    }

    /// Push raw bytes, returning every complete line.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if self.skipping {
                    self.skipping = false;
                } else {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    if !line.trim().is_empty() {
                        lines.push(line);
                    }
                }
                self.buf.clear();
                continue;
            }
            if self.skipping {
                continue;
            }
            if self.buf.len() >= self.max_len {
                // Oversized message: drop it entirely.
                self.buf.clear();
                self.skipping = true;
                continue;
            }
            self.buf.push(byte);
        }
        lines
    }
}

/// Handle to one connection's outbound side. Cloned into broker
/// attachments and journal sinks; all pushes are non-blocking.
pub struct ConnHandle {
    pub id: u64,
    pub authenticated: AtomicBool,
    /// sessionId → broker attachment id.
    pub attached: Mutex<HashMap<String, u64>>,
    /// Sessions whose pty.event stream this connection follows.
    pub event_sessions: Mutex<HashSet<String>>,
    /// Stream subscription ids owned by this connection.
    pub subscriptions: Mutex<HashSet<String>>,
    tx: mpsc::UnboundedSender<String>,
    buffered: AtomicUsize,
    max_buffered: usize,
    kill: CancellationToken,
}

impl std::fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnHandle").field("id", &self.id).finish()
    }
}

impl ConnHandle {
    pub fn new(
        id: u64,
        tx: mpsc::UnboundedSender<String>,
        max_buffered: usize,
        kill: CancellationToken,
    ) -> Self {
        Self {
            id,
            authenticated: AtomicBool::new(false),
            attached: Mutex::new(HashMap::new()),
            event_sessions: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(HashSet::new()),
            tx,
            buffered: AtomicUsize::new(0),
            max_buffered,
            kill,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Enqueue one envelope. Exceeding the byte budget closes the
    /// connection (backpressure policy: disconnect, never block).
    pub fn push(&self, envelope: &ServerEnvelope) {
        let line = envelope.to_line();
        let queued = self.buffered.fetch_add(line.len(), Ordering::AcqRel) + line.len();
        if queued > self.max_buffered {
            debug!(conn = self.id, queued, "write buffer exceeded, closing connection");
            self.kill.cancel();
            return;
        }
        let _ = self.tx.send(line);
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn drain(&self, len: usize) {
        self.buffered.fetch_sub(len, Ordering::AcqRel);
    }

    pub fn close(&self) {
        self.kill.cancel();
    }

    pub fn closed(&self) -> CancellationToken {
        self.kill.clone()
    }
}

/// Drain the write queue onto the socket until the connection dies.
pub async fn write_loop(
    handle: Arc<ConnHandle>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut writer: OwnedWriteHalf,
) {
    let kill = handle.closed();
    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else { break };
                let len = line.len();
                if writer.write_all(line.as_bytes()).await.is_err() {
                    handle.close();
                    break;
                }
                handle.drain(len);
            }
            _ = kill.cancelled() => break,
        }
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
