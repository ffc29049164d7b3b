// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream server: the TCP listener, per-connection tasks, the
//! control-plane lock serializing registry/journal mutations, and the
//! session event pump.

pub mod commands;
pub mod conn;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::BrokerEvent;
use crate::journal::Journal;
use crate::protocol::{
    decode_base64, now_ms, ClientEnvelope, EventScope, ObservedEvent, ObservedPayload,
    PtySignal, ServerEnvelope, SessionEvent,
};
use crate::query::ResponderColors;
use crate::records::PersistedSessionStatus;
use crate::registry::{Registry, SessionEntry};
use crate::status::SessionStatus;
use crate::store::Store;
use conn::{ConnHandle, LineFramer};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub state_store: PathBuf,
    pub tombstone_ttl: Duration,
    pub max_connection_buffered_bytes: usize,
    pub max_journal_entries: usize,
    pub max_message_bytes: usize,
    pub replay_chunks: usize,
    pub scrollback_limit: usize,
    pub pty_helper: Option<PathBuf>,
    pub notify_dir: PathBuf,
    pub notify_poll_interval: Duration,
    pub responder_colors: ResponderColors,
}

impl ServerConfig {
    /// Default notify file: unique per session so concurrent sessions do
    /// not interfere.
    pub fn notify_path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.notify_dir.join(format!("{safe}.notify.jsonl"))
    }
}

/// State mutated only under the control-plane lock (one logical worker,
/// so stream cursors are strictly monotonic).
pub struct Control {
    pub registry: Registry,
    pub journal: Journal,
}

/// A session event routed from a broker listener onto the control plane.
pub struct SessionEventMsg {
    pub session_id: String,
    pub event: BrokerEvent,
}

pub struct Shared {
    pub config: ServerConfig,
    pub store: Store,
    pub control: tokio::sync::Mutex<Control>,
    pub conns: parking_lot::Mutex<HashMap<u64, Arc<ConnHandle>>>,
    pub session_events: mpsc::UnboundedSender<SessionEventMsg>,
    pub shutdown: CancellationToken,
}

impl Shared {
    /// Publish an observed event under the control lock.
    pub fn publish(control: &mut Control, scope: EventScope, payload: ObservedPayload) -> u64 {
        control.journal.publish(ObservedEvent { scope, observed_at: now_ms(), payload })
    }

    /// Persist a session's last interactive status. Exited is never
    /// written so a later start can restore the needs-input state.
    pub async fn persist_status(&self, entry: &SessionEntry) {
        if entry.status == SessionStatus::Exited {
            return;
        }
        let persisted = PersistedSessionStatus {
            session_id: entry.session_id.clone(),
            scope: entry.scope.clone(),
            status: entry.status,
            attention_reason: entry.attention_reason,
            controller: entry.controller.clone(),
            updated_at: now_ms(),
        };
        if let Err(e) = self.store.save_session_status(&persisted).await {
            warn!(session = %entry.session_id, err = %e, "failed to persist session status");
        }
    }

    /// Push an envelope to every connection following a session's events.
    pub fn push_event_subscribers(&self, session_id: &str, envelope: &ServerEnvelope) {
        let conns: Vec<Arc<ConnHandle>> = self.conns.lock().values().cloned().collect();
        for conn in conns {
            if conn.event_sessions.lock().contains(session_id) {
                conn.push(envelope);
            }
        }
    }

    /// Drop a destroyed session from per-connection bookkeeping.
    pub fn forget_session(&self, session_id: &str) {
        let conns: Vec<Arc<ConnHandle>> = self.conns.lock().values().cloned().collect();
        for conn in conns {
            conn.attached.lock().remove(session_id);
            conn.event_sessions.lock().remove(session_id);
        }
    }

    /// Remove a session entry outright (tombstone expiry, session.remove).
    pub fn destroy_session(&self, control: &mut Control, session_id: &str) {
        if let Some(entry) = control.registry.remove(session_id) {
            if let Some(timer) = entry.tombstone_timer {
                timer.abort();
            }
        }
        self.forget_session(session_id);
    }

    /// Arm the tombstone timer for an exited session. TTL zero destroys
    /// synchronously.
    pub fn arm_tombstone(self: &Arc<Self>, control: &mut Control, session_id: &str) {
        let ttl = self.config.tombstone_ttl;
        if ttl.is_zero() {
            self.destroy_session(control, session_id);
            return;
        }
        let shared = Arc::clone(self);
        let session_id_owned = session_id.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut control = shared.control.lock().await;
            let expired = control
                .registry
                .get(&session_id_owned)
                .map(|e| !e.is_live())
                .unwrap_or(false);
            if expired {
                debug!(session = %session_id_owned, "tombstone expired");
                shared.destroy_session(&mut control, &session_id_owned);
            }
        });
        if let Some(entry) = control.registry.get_mut(session_id) {
            entry.tombstone_timer = Some(timer);
        } else {
            timer.abort();
        }
    }
}

/// Run the stream server until the shutdown token fires.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let store = Store::open(&config.state_store).await?;
    std::fs::create_dir_all(&config.notify_dir)
        .with_context(|| format!("create notify dir {}", config.notify_dir.display()))?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        control: tokio::sync::Mutex::new(Control {
            registry: Registry::new(),
            journal: Journal::new(config.max_journal_entries),
        }),
        store,
        conns: parking_lot::Mutex::new(HashMap::new()),
        session_events: events_tx,
        shutdown: shutdown.clone(),
        config,
    });

    restore_tombstones(&shared).await;

    tokio::spawn(session_event_pump(Arc::clone(&shared), events_rx));

    let addr = format!("{}:{}", shared.config.host, shared.config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {addr}"))?;
    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or(addr), "stream server listening");

    let next_conn_id = AtomicU64::new(1);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                        continue;
                    }
                };
                let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                debug!(conn = conn_id, peer = %peer, "connection accepted");
                tokio::spawn(connection_task(Arc::clone(&shared), stream, conn_id));
            }
            _ = shutdown.cancelled() => break,
        }
    }

    // Close live sessions before flushing the store.
    let live: Vec<Arc<crate::session::LiveSession>> = {
        let control = shared.control.lock().await;
        control.registry.iter().filter_map(|e| e.live.clone()).collect()
    };
    for session in live {
        let _ = session.close().await;
    }
    shared.store.close().await;
    Ok(())
}

/// Restore persisted needs-input sessions as observable tombstones.
async fn restore_tombstones(shared: &Arc<Shared>) {
    let statuses = match shared.store.load_session_statuses().await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(err = %e, "failed to load persisted session statuses");
            return;
        }
    };
    let mut control = shared.control.lock().await;
    for persisted in statuses {
        if persisted.status != SessionStatus::NeedsInput {
            continue;
        }
        debug!(session = %persisted.session_id, "restoring needs-input tombstone");
        control.registry.insert(SessionEntry::restored(
            persisted.session_id,
            persisted.scope,
            persisted.status,
            persisted.attention_reason,
            persisted.controller,
        ));
    }
}

async fn connection_task(shared: Arc<Shared>, stream: tokio::net::TcpStream, conn_id: u64) {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let kill = CancellationToken::new();
    let handle = Arc::new(ConnHandle::new(
        conn_id,
        tx,
        shared.config.max_connection_buffered_bytes,
        kill.clone(),
    ));
    shared.conns.lock().insert(conn_id, Arc::clone(&handle));
    tokio::spawn(conn::write_loop(Arc::clone(&handle), rx, writer));

    let mut framer = LineFramer::new(shared.config.max_message_bytes);
    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for line in framer.push(&buf[..n]) {
                            handle_line(&shared, &handle, &line).await;
                        }
                    }
                }
            }
            _ = kill.cancelled() => break,
        }
    }

    cleanup_connection(&shared, &handle).await;
}

/// Tear down everything a disconnecting connection owns.
async fn cleanup_connection(shared: &Arc<Shared>, handle: &Arc<ConnHandle>) {
    handle.close();
    shared.conns.lock().remove(&handle.id);

    let attached: Vec<(String, u64)> =
        handle.attached.lock().drain().collect();
    handle.event_sessions.lock().clear();
    handle.subscriptions.lock().clear();

    let mut control = shared.control.lock().await;
    control.journal.remove_connection(handle.id);
    for (session_id, attachment_id) in attached {
        if let Some(live) = control.registry.get(&session_id).and_then(|e| e.live.clone()) {
            live.detach(attachment_id);
        }
    }
    debug!(conn = handle.id, "connection closed");
}

/// Parse and dispatch one protocol line. Malformed JSON and unknown
/// kinds are swallowed; unknown command types fail explicitly.
async fn handle_line(shared: &Arc<Shared>, handle: &Arc<ConnHandle>, line: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        debug!(conn = handle.id, "ignoring malformed JSON line");
        return;
    };
    let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or("");

    let auth_required = shared.config.auth_token.is_some() && !handle.is_authenticated();
    match kind {
        "auth" => {
            let token = value.get("token").and_then(|t| t.as_str()).unwrap_or("");
            handle_auth(shared, handle, token);
        }
        "command" => {
            let Some(command_id) =
                value.get("commandId").and_then(|c| c.as_str()).map(str::to_owned)
            else {
                return;
            };
            let command_type =
                value.get("type").and_then(|t| t.as_str()).unwrap_or("").to_owned();
            if auth_required && command_type != "auth" {
                handle.push(&ServerEnvelope::CommandFailed {
                    command_id,
                    error: crate::error::CommandError::authentication_required(),
                });
                return;
            }
            let envelope = match serde_json::from_value::<ClientEnvelope>(value) {
                Ok(ClientEnvelope::Command { command, .. }) => command,
                _ => {
                    handle.push(&ServerEnvelope::CommandFailed {
                        command_id,
                        error: crate::error::CommandError::invalid_argument(format!(
                            "unknown command type: {command_type}"
                        )),
                    });
                    return;
                }
            };
            handle.push(&ServerEnvelope::CommandAccepted { command_id: command_id.clone() });
            match commands::handle(shared, handle, envelope).await {
                Ok(result) => {
                    handle.push(&ServerEnvelope::CommandCompleted { command_id, result });
                }
                Err(error) => {
                    handle.push(&ServerEnvelope::CommandFailed { command_id, error });
                }
            }
        }
        "pty.input" | "pty.resize" | "pty.signal" => {
            if auth_required {
                handle.push(&ServerEnvelope::AuthError {
                    message: "authentication required".into(),
                });
                return;
            }
            let Ok(envelope) = serde_json::from_value::<ClientEnvelope>(value) else {
                return;
            };
            handle_pty_envelope(shared, envelope).await;
        }
        _ => {
            // Unknown kind: ignored at the framing layer.
        }
    }
}

fn handle_auth(shared: &Arc<Shared>, handle: &Arc<ConnHandle>, token: &str) {
    match shared.config.auth_token {
        Some(ref expected) if expected != token => {
            handle.push(&ServerEnvelope::AuthError { message: "invalid token".into() });
        }
        _ => {
            handle.set_authenticated();
            handle.push(&ServerEnvelope::AuthOk {});
        }
    }
}

/// Session input/resize/signal envelopes. Targeting a missing or dead
/// session drops silently.
async fn handle_pty_envelope(shared: &Arc<Shared>, envelope: ClientEnvelope) {
    match envelope {
        ClientEnvelope::PtyInput { session_id, data_base64 } => {
            let Some(data) = decode_base64(&data_base64) else {
                return;
            };
            let (live, status_changed) = {
                let mut control = shared.control.lock().await;
                let Some(entry) = control.registry.get_mut(&session_id) else {
                    return;
                };
                let changed = entry.apply_input(&data);
                let live = entry.live.clone();
                if changed {
                    let scope = EventScope {
                        scope: entry.scope.clone(),
                        directory_id: entry.directory_id.clone(),
                        conversation_id: entry.conversation_id.clone(),
                    };
                    let payload = ObservedPayload::SessionStatus {
                        session_id: session_id.clone(),
                        status: entry.status,
                        attention_reason: entry.attention_reason,
                        live: entry.is_live(),
                    };
                    Shared::publish(&mut control, scope, payload);
                }
                (live, changed)
            };
            if status_changed {
                let control = shared.control.lock().await;
                if let Some(entry) = control.registry.get(&session_id) {
                    shared.persist_status(entry).await;
                }
            }
            if let Some(live) = live {
                let _ = live.write(bytes::Bytes::from(data)).await;
            }
        }
        ClientEnvelope::PtyResize { session_id, cols, rows } => {
            if cols == 0 || rows == 0 {
                return;
            }
            let live = {
                let control = shared.control.lock().await;
                control.registry.get(&session_id).and_then(|e| e.live.clone())
            };
            if let Some(live) = live {
                let _ = live.resize(cols, rows).await;
            }
        }
        ClientEnvelope::PtySignal { session_id, signal } => {
            let live = {
                let control = shared.control.lock().await;
                control.registry.get(&session_id).and_then(|e| e.live.clone())
            };
            let Some(live) = live else { return };
            match signal {
                PtySignal::Interrupt => {
                    let _ = live.write(bytes::Bytes::from_static(b"\x03")).await;
                }
                PtySignal::Eof => {
                    let _ = live.write(bytes::Bytes::from_static(b"\x04")).await;
                }
                PtySignal::Terminate => {
                    let _ = live.close().await;
                }
            }
        }
        _ => {}
    }
}

/// The control-plane worker for session events: status derivation,
/// persistence, journal publication, and event fan-out.
async fn session_event_pump(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<SessionEventMsg>,
) {
    while let Some(SessionEventMsg { session_id, event }) = rx.recv().await {
        match event {
            BrokerEvent::TerminalOutput { cursor, chunk } => {
                let mut control = shared.control.lock().await;
                let Some(entry) = control.registry.get(&session_id) else {
                    continue;
                };
                let scope = EventScope {
                    scope: entry.scope.clone(),
                    directory_id: entry.directory_id.clone(),
                    conversation_id: entry.conversation_id.clone(),
                };
                let payload = ObservedPayload::SessionOutput {
                    session_id: session_id.clone(),
                    cursor,
                    chunk_base64: crate::protocol::encode_base64(&chunk),
                };
                Shared::publish(&mut control, scope, payload);
            }
            BrokerEvent::SessionExit { exit } => {
                let mut control = shared.control.lock().await;
                let Some(entry) = control.registry.get_mut(&session_id) else {
                    continue;
                };
                let final_cursor = entry.latest_output_cursor();
                if let Some(listener) = entry.event_listener.take() {
                    if let Some(ref live) = entry.live {
                        live.broker().off_event(listener);
                    }
                }
                entry.apply_exit(exit, final_cursor);
                let scope = EventScope {
                    scope: entry.scope.clone(),
                    directory_id: entry.directory_id.clone(),
                    conversation_id: entry.conversation_id.clone(),
                };
                let payload = ObservedPayload::SessionStatus {
                    session_id: session_id.clone(),
                    status: SessionStatus::Exited,
                    attention_reason: entry.attention_reason,
                    live: false,
                };
                Shared::publish(&mut control, scope, payload);

                // pty.exit to attached and event-following connections.
                let envelope = ServerEnvelope::PtyExit { session_id: session_id.clone(), exit };
                let conns: Vec<Arc<ConnHandle>> =
                    shared.conns.lock().values().cloned().collect();
                for conn in conns {
                    let wants = conn.attached.lock().contains_key(&session_id)
                        || conn.event_sessions.lock().contains(&session_id);
                    if wants {
                        conn.push(&envelope);
                    }
                }

                shared.arm_tombstone(&mut control, &session_id);
            }
            BrokerEvent::Notify { ts, payload } => {
                let event = SessionEvent::Notify { ts, payload };
                apply_session_event(&shared, &session_id, event, |entry| {
                    entry.last_event_at = Some(now_ms());
                    false
                })
                .await;
            }
            BrokerEvent::AttentionRequired { reason } => {
                let event = SessionEvent::AttentionRequired { reason };
                apply_session_event(&shared, &session_id, event, move |entry| {
                    entry.apply_attention(reason)
                })
                .await;
            }
            BrokerEvent::TurnCompleted => {
                apply_session_event(&shared, &session_id, SessionEvent::TurnCompleted, |entry| {
                    entry.apply_turn_completed()
                })
                .await;
            }
        }
    }
}

/// Shared path for notify/attention/turn events: mutate the entry,
/// persist on change, publish, and fan out `pty.event`.
async fn apply_session_event(
    shared: &Arc<Shared>,
    session_id: &str,
    event: SessionEvent,
    mutate: impl FnOnce(&mut SessionEntry) -> bool,
) {
    let changed = {
        let mut control = shared.control.lock().await;
        let Some(entry) = control.registry.get_mut(session_id) else {
            return;
        };
        let changed = mutate(entry);
        let scope = EventScope {
            scope: entry.scope.clone(),
            directory_id: entry.directory_id.clone(),
            conversation_id: entry.conversation_id.clone(),
        };
        let status = entry.status;
        let attention = entry.attention_reason;
        let live = entry.is_live();
        Shared::publish(
            &mut control,
            scope.clone(),
            ObservedPayload::SessionEvent {
                session_id: session_id.to_owned(),
                event: event.clone(),
            },
        );
        if changed {
            Shared::publish(
                &mut control,
                scope,
                ObservedPayload::SessionStatus {
                    session_id: session_id.to_owned(),
                    status,
                    attention_reason: attention,
                    live,
                },
            );
        }
        changed
    };

    shared.push_event_subscribers(
        session_id,
        &ServerEnvelope::PtyEvent { session_id: session_id.to_owned(), event },
    );

    if changed {
        let control = shared.control.lock().await;
        if let Some(entry) = control.registry.get(session_id) {
            shared.persist_status(entry).await;
        }
    }
}
