// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream client: connects over TCP, correlates commands by id, and
//! exposes push envelopes through a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CommandError;
use crate::protocol::{encode_base64, ClientEnvelope, Command, PtySignal, ServerEnvelope};
use crate::server::conn::LineFramer;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub command_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth_token: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value, CommandError>>>>>;

#[derive(Debug)]
pub struct StreamClient {
    writer: mpsc::UnboundedSender<String>,
    pending: Pending,
    envelopes: broadcast::Sender<ServerEnvelope>,
    next_id: AtomicU64,
    timeout: Duration,
    closed: CancellationToken,
}

impl StreamClient {
    /// Connect and complete the optional auth handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr).await.with_context(|| format!("connect {addr}"))?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (writer, mut writer_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (envelopes, _) = broadcast::channel(256);
        let closed = CancellationToken::new();
        let auth_wait: Arc<Mutex<Option<oneshot::Sender<Result<(), String>>>>> =
            Arc::new(Mutex::new(None));

        let reader_pending = Arc::clone(&pending);
        let reader_envelopes = envelopes.clone();
        let reader_closed = closed.clone();
        let reader_auth = Arc::clone(&auth_wait);
        tokio::spawn(async move {
            let mut framer = LineFramer::new(16 * 1024 * 1024);
            let mut buf = vec![0u8; 8192];
            'read: loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => break 'read,
                    Ok(n) => {
                        for line in framer.push(&buf[..n]) {
                            let Ok(envelope) = serde_json::from_str::<ServerEnvelope>(&line)
                            else {
                                continue;
                            };
                            dispatch(&reader_pending, &reader_auth, &envelope);
                            let _ = reader_envelopes.send(envelope);
                        }
                    }
                }
            }
            // Connection gone: reject everything still pending.
            reader_closed.cancel();
            let mut pending = reader_pending.lock().unwrap_or_else(|e| e.into_inner());
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(CommandError::internal("connection closed")));
            }
        });

        let client = Self {
            writer,
            pending,
            envelopes,
            next_id: AtomicU64::new(1),
            timeout: config.command_timeout,
            closed,
        };

        if let Some(ref token) = config.auth_token {
            let (tx, rx) = oneshot::channel();
            *auth_wait.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
            client.send_line(ClientEnvelope::Auth { token: token.clone() }.to_line());
            match tokio::time::timeout(client.timeout, rx).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(message))) => anyhow::bail!("authentication failed: {message}"),
                _ => anyhow::bail!("authentication timed out"),
            }
        }

        Ok(client)
    }

    fn send_line(&self, line: String) {
        let _ = self.writer.send(line);
    }

    /// Issue a command and await its completion envelope.
    pub async fn send_command(&self, command: Command) -> Result<serde_json::Value, CommandError> {
        if self.closed.is_cancelled() {
            return Err(CommandError::internal("connection closed"));
        }
        let command_id = format!("c{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command_id.clone(), tx);
        self.send_line(ClientEnvelope::Command { command_id: command_id.clone(), command }.to_line());

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommandError::internal("connection closed")),
            Err(_) => {
                self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&command_id);
                Err(CommandError::timeout(format!("command {command_id} timed out")))
            }
        }
    }

    /// Subscribe to every push envelope (typed listeners filter on the
    /// enum; the stream includes command envelopes too).
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEnvelope> {
        self.envelopes.subscribe()
    }

    // -- Fire-and-forget helpers ----------------------------------------------

    pub fn input(&self, session_id: &str, data: &[u8]) {
        self.send_line(
            ClientEnvelope::PtyInput {
                session_id: session_id.to_owned(),
                data_base64: encode_base64(data),
            }
            .to_line(),
        );
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        self.send_line(
            ClientEnvelope::PtyResize { session_id: session_id.to_owned(), cols, rows }.to_line(),
        );
    }

    pub fn signal(&self, session_id: &str, signal: PtySignal) {
        self.send_line(
            ClientEnvelope::PtySignal { session_id: session_id.to_owned(), signal }.to_line(),
        );
    }

    /// Drop the connection; pending commands reject.
    pub fn close(&self) {
        debug!("closing stream client");
        self.closed.cancel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(CommandError::internal("connection closed")));
        }
    }
}

fn dispatch(
    pending: &Pending,
    auth_wait: &Arc<Mutex<Option<oneshot::Sender<Result<(), String>>>>>,
    envelope: &ServerEnvelope,
) {
    match envelope {
        ServerEnvelope::CommandCompleted { command_id, result } => {
            if let Some(tx) = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(command_id)
            {
                let _ = tx.send(Ok(result.clone()));
            }
        }
        ServerEnvelope::CommandFailed { command_id, error } => {
            if let Some(tx) = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(command_id)
            {
                let _ = tx.send(Err(error.clone()));
            }
        }
        ServerEnvelope::AuthOk {} => {
            if let Some(tx) = auth_wait.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(Ok(()));
            }
        }
        ServerEnvelope::AuthError { message } => {
            if let Some(tx) = auth_wait.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(Err(message.clone()));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
