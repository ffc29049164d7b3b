// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live session: pairs a session broker with a snapshot oracle, polls the
//! notify file, and routes scripted query replies back to the PTY.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{AttachHandlers, Broker, BrokerEvent};
use crate::notify::{classify, NotifyClass, NotifyReader};
use crate::protocol::ExitStatus;
use crate::pty::{HostConfig, HostEvent, PtyHost};
use crate::query::{startup_handshake, QueryResponder};
use crate::term::{Emulator, SnapshotFrame};

/// Everything needed to spawn one live session.
#[derive(Debug, Clone)]
pub struct SessionSpawn {
    pub session_id: String,
    pub helper: PathBuf,
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub notify_path: PathBuf,
    /// Snapshot ingest may be disabled to reduce CPU when only raw
    /// events are wanted.
    pub ingest_snapshots: bool,
    pub scrollback_limit: usize,
    pub replay_chunks: usize,
    pub notify_poll_interval: Duration,
    pub responder: QueryResponder,
}

pub struct LiveSession {
    session_id: String,
    broker: Arc<Broker>,
    oracle: Option<Arc<Mutex<Emulator>>>,
    shutdown: CancellationToken,
}

impl LiveSession {
    /// Spawn the PTY helper and the session reader task.
    pub async fn spawn(spawn: SessionSpawn) -> anyhow::Result<Arc<Self>> {
        let (host, mut events) = PtyHost::spawn(HostConfig {
            helper: spawn.helper.clone(),
            command: spawn.command.clone(),
            cwd: spawn.cwd.clone(),
            env: spawn.env.clone(),
            cols: spawn.cols,
            rows: spawn.rows,
            session_id: spawn.session_id.clone(),
        })
        .await?;

        let broker = Arc::new(Broker::new(host, spawn.replay_chunks));
        let oracle = if spawn.ingest_snapshots {
            let mut emulator = Emulator::new(spawn.cols, spawn.rows, spawn.scrollback_limit);
            let responder = spawn.responder.clone();
            emulator.set_query_hook(Box::new(move |query| responder.respond(query)));
            Some(Arc::new(Mutex::new(emulator)))
        } else {
            None
        };

        let shutdown = CancellationToken::new();
        let session = Arc::new(Self {
            session_id: spawn.session_id.clone(),
            broker: Arc::clone(&broker),
            oracle: oracle.clone(),
            shutdown: shutdown.clone(),
        });

        // Startup handshake: run the standard probes through the oracle so
        // the scripted replies reach the child immediately.
        if let Some(ref oracle) = oracle {
            let replies = {
                let mut oracle = oracle.lock().await;
                oracle.feed(&startup_handshake());
                oracle.take_replies()
            };
            for reply in replies {
                let _ = broker.write_unprobed(Bytes::from(reply)).await;
            }
        }

        // Reader task: host events + notify polling until exit.
        let mut notify = NotifyReader::new(spawn.notify_path.clone());
        let session_id = spawn.session_id.clone();
        let task_broker = Arc::clone(&broker);
        let task_oracle = oracle;
        let task_shutdown = shutdown;
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(spawn.notify_poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Some(HostEvent::Data(chunk)) => {
                                task_broker.ingest(chunk.clone());
                                if let Some(ref oracle) = task_oracle {
                                    let replies = {
                                        let mut oracle = oracle.lock().await;
                                        oracle.feed(&chunk);
                                        oracle.take_replies()
                                    };
                                    for reply in replies {
                                        let _ = task_broker
                                            .write_unprobed(Bytes::from(reply))
                                            .await;
                                    }
                                }
                            }
                            other => {
                                let exit = match other {
                                    Some(HostEvent::Exit(exit)) => exit,
                                    _ => ExitStatus { code: Some(1), signal: None },
                                };
                                // Final notify drain before the exit fans out.
                                pump_notify(&mut notify, &task_broker);
                                debug!(session = %session_id, code = ?exit.code, "session exited");
                                task_broker.emit_exit(exit);
                                break;
                            }
                        }
                    }
                    _ = poll.tick() => {
                        pump_notify(&mut notify, &task_broker);
                    }
                    _ = task_shutdown.cancelled() => {
                        // Cancellation follows a close; keep draining so
                        // the final chunks and the exit still fan out.
                        loop {
                            match events.recv().await {
                                Some(HostEvent::Data(chunk)) => {
                                    task_broker.ingest(chunk);
                                }
                                Some(HostEvent::Exit(exit)) => {
                                    pump_notify(&mut notify, &task_broker);
                                    task_broker.emit_exit(exit);
                                    break;
                                }
                                None => break,
                            }
                        }
                        break;
                    }
                }
            }
        });

        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub async fn write(&self, data: Bytes) -> anyhow::Result<()> {
        self.broker.write(data).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        if let Some(ref oracle) = self.oracle {
            oracle.lock().await.resize(cols, rows);
        }
        self.broker.resize(cols, rows).await
    }

    /// Close the PTY and stop the reader task.
    pub async fn close(&self) -> ExitStatus {
        let status = self.broker.close().await;
        self.shutdown.cancel();
        status
    }

    /// Current snapshot frame; `None` when snapshot ingest is disabled.
    pub async fn snapshot(&self, include_hash: bool) -> Option<SnapshotFrame> {
        let oracle = self.oracle.as_ref()?;
        let mut oracle = oracle.lock().await;
        Some(if include_hash { oracle.snapshot() } else { oracle.snapshot_unhashed() })
    }

    /// Text between two buffer points (scrollback + screen).
    pub async fn selection_text(
        &self,
        start: crate::term::BufferPoint,
        end: crate::term::BufferPoint,
    ) -> Option<String> {
        let oracle = self.oracle.as_ref()?;
        let oracle = oracle.lock().await;
        Some(oracle.selection_text(start, end))
    }

    /// The last `n` trimmed buffer rows, for offscreen copy.
    pub async fn buffer_tail(&self, n: Option<usize>) -> Option<crate::term::BufferTail> {
        let oracle = self.oracle.as_ref()?;
        let mut oracle = oracle.lock().await;
        Some(oracle.buffer_tail(n))
    }

    /// Scroll the snapshot viewport; it re-follows output at the bottom.
    pub async fn scroll_viewport(&self, delta: i64) {
        if let Some(ref oracle) = self.oracle {
            oracle.lock().await.scroll_viewport(delta);
        }
    }

    pub fn attach(&self, handlers: AttachHandlers, since_cursor: u64) -> u64 {
        self.broker.attach(handlers, since_cursor)
    }

    pub fn detach(&self, attachment_id: u64) {
        self.broker.detach(attachment_id);
    }

    pub fn on_event(&self, listener: impl Fn(&BrokerEvent) + Send + Sync + 'static) -> u64 {
        self.broker.on_event(listener)
    }

    pub fn latest_cursor(&self) -> u64 {
        self.broker.latest_cursor()
    }
}

/// Drain the notify file and fan classified events through the broker.
fn pump_notify(notify: &mut NotifyReader, broker: &Broker) {
    for record in notify.poll() {
        let event = match classify(&record.payload) {
            NotifyClass::TurnCompleted => BrokerEvent::TurnCompleted,
            NotifyClass::Attention(reason) => BrokerEvent::AttentionRequired { reason },
            NotifyClass::Raw => BrokerEvent::Notify { ts: record.ts, payload: record.payload },
        };
        broker.emit_event(event);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
