// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide perf sink.
//!
//! Observations are appended as JSONL through a bounded channel to a
//! writer task. Losing records under pressure is acceptable; nothing on a
//! hot path ever blocks on the sink.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Serialize)]
struct PerfRecord {
    name: String,
    value_ms: f64,
    at_ms: u64,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    attrs: serde_json::Value,
}

enum SinkMessage {
    Record(PerfRecord),
    Flush(oneshot::Sender<()>),
}

struct PerfSink {
    tx: Option<mpsc::Sender<SinkMessage>>,
}

static SINK: OnceLock<PerfSink> = OnceLock::new();

/// Initialize the sink. Without a path (or when disabled) every
/// subsequent `observe` is a cheap no-op. Call once at startup.
pub fn init(path: Option<PathBuf>, enabled: bool) {
    let sink = match (path, enabled) {
        (Some(path), true) => {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            tokio::spawn(writer(path, rx));
            PerfSink { tx: Some(tx) }
        }
        _ => PerfSink { tx: None },
    };
    let _ = SINK.set(sink);
}

/// Whether perf observation is enabled.
pub fn enabled() -> bool {
    SINK.get().map(|s| s.tx.is_some()).unwrap_or(false)
}

/// Record one observation. Drops silently when the queue is full or the
/// sink is disabled.
pub fn observe(name: &str, value_ms: f64, attrs: serde_json::Value) {
    let Some(tx) = SINK.get().and_then(|s| s.tx.as_ref()) else {
        return;
    };
    let record = PerfRecord {
        name: name.to_owned(),
        value_ms,
        at_ms: crate::protocol::now_ms(),
        attrs,
    };
    let _ = tx.try_send(SinkMessage::Record(record));
}

/// Flush queued records to disk. Used at shutdown and by tests.
pub async fn flush() {
    let Some(tx) = SINK.get().and_then(|s| s.tx.as_ref()) else {
        return;
    };
    let (done_tx, done_rx) = oneshot::channel();
    if tx.send(SinkMessage::Flush(done_tx)).await.is_ok() {
        let _ = done_rx.await;
    }
}

async fn writer(path: PathBuf, mut rx: mpsc::Receiver<SinkMessage>) {
    let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), err = %e, "perf sink disabled: open failed");
            // Drain so senders never observe a closed channel.
            while rx.recv().await.is_some() {}
            return;
        }
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Record(record) => {
                let Ok(mut line) = serde_json::to_string(&record) else {
                    continue;
                };
                line.push('\n');
                let _ = file.write_all(line.as_bytes()).await;
            }
            SinkMessage::Flush(done) => {
                let _ = file.flush().await;
                let _ = done.send(());
            }
        }
    }
    let _ = file.flush().await;
}

#[cfg(test)]
#[path = "perf_tests.rs"]
mod tests;
