// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY host: spawns the helper process, frames outbound traffic, and
//! surfaces stdout chunks and exit as host events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use pty_proto::Frame;

use super::probe::ProbeTracker;
use crate::perf;
use crate::protocol::ExitStatus;

/// Name of the helper binary looked up in candidates and `PATH`.
pub const HELPER_BINARY: &str = "harness-pty-helper";

/// Resolve the helper binary path: explicit path first, then the first
/// existing candidate, then the first candidate as a best-effort
/// fallback. A missing helper surfaces at spawn, not here.
pub fn resolve_helper(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let candidates = helper_candidates();
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .or_else(|| candidates.first().cloned())
        .unwrap_or_else(|| PathBuf::from(HELPER_BINARY))
}

fn helper_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(HELPER_BINARY));
        }
    }
    if let Ok(path) = std::env::var("PATH") {
        for dir in path.split(':').filter(|d| !d.is_empty()) {
            candidates.push(Path::new(dir).join(HELPER_BINARY));
        }
    }
    candidates
}

/// Events surfaced by a spawned host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Data(Bytes),
    Exit(ExitStatus),
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub helper: PathBuf,
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    /// Attached to `pty.keystroke.roundtrip` observations.
    pub session_id: String,
}

/// In-process facade over one helper process.
#[derive(Debug)]
pub struct PtyHost {
    frame_tx: mpsc::Sender<Frame>,
    exited: watch::Receiver<Option<ExitStatus>>,
    probes: Arc<Mutex<ProbeTracker>>,
    session_id: String,
}

impl PtyHost {
    /// Spawn the helper and start the frame writer / stdout reader tasks.
    pub async fn spawn(config: HostConfig) -> anyhow::Result<(Self, mpsc::Receiver<HostEvent>)> {
        let mut command = tokio::process::Command::new(&config.helper);
        command
            .arg("--cols")
            .arg(config.cols.to_string())
            .arg("--rows")
            .arg(config.rows.to_string())
            .arg("--")
            .args(&config.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = config.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn pty helper {}", config.helper.display()))?;
        let mut stdin = child.stdin.take().context("helper stdin missing")?;
        let mut stdout = child.stdout.take().context("helper stdout missing")?;
        let stderr = child.stderr.take().context("helper stderr missing")?;

        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(256);
        let (event_tx, event_rx) = mpsc::channel::<HostEvent>(256);
        let (exit_tx, exit_rx) = watch::channel(None);
        let probes = Arc::new(Mutex::new(ProbeTracker::new()));

        // Helper stderr is diagnostics only.
        let session = config.session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(session = %session, "pty helper: {line}");
            }
        });

        // Writer: serialize frames onto the helper's stdin.
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let done = matches!(frame, Frame::Close);
                if stdin.write_all(&frame.to_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() || done {
                    break;
                }
            }
        });

        // Reader: stdout chunks → probe scan → data events; then exit.
        let reader_probes = Arc::clone(&probes);
        let session = config.session_id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        for done in reader_probes.lock().observe(&chunk) {
                            perf::observe(
                                "pty.keystroke.roundtrip",
                                done.elapsed_ms,
                                serde_json::json!({"sessionId": session}),
                            );
                        }
                        if event_tx.send(HostEvent::Data(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            let exit = match child.wait().await {
                Ok(status) => exit_status_from(status),
                Err(e) => {
                    warn!(session = %session, err = %e, "helper wait failed");
                    ExitStatus { code: Some(1), signal: None }
                }
            };
            let _ = exit_tx.send(Some(exit));
            let _ = event_tx.send(HostEvent::Exit(exit)).await;
        });

        let host = Self {
            frame_tx,
            exited: exit_rx,
            probes,
            session_id: config.session_id,
        };
        Ok((host, event_rx))
    }

    /// Enqueue raw bytes for the PTY. Registers a round-trip probe for
    /// small payloads when perf observation is enabled.
    pub async fn write(&self, data: Bytes) -> anyhow::Result<()> {
        if perf::enabled() {
            self.probes.lock().register(&data);
        }
        self.write_unprobed(data).await
    }

    /// Enqueue bytes without registering a probe. Used for scripted query
    /// replies, which are not keystrokes.
    pub async fn write_unprobed(&self, data: Bytes) -> anyhow::Result<()> {
        self.frame_tx
            .send(Frame::Data(data))
            .await
            .map_err(|_| anyhow::anyhow!("pty helper is gone"))
    }

    /// Enqueue a resize. Dimensions must be positive.
    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        anyhow::ensure!(cols > 0 && rows > 0, "cols and rows must be positive");
        self.frame_tx
            .send(Frame::Resize { cols, rows })
            .await
            .map_err(|_| anyhow::anyhow!("pty helper is gone"))
    }

    /// Enqueue a CLOSE frame and wait for the helper to exit.
    pub async fn close(&self) -> ExitStatus {
        let _ = self.frame_tx.send(Frame::Close).await;
        self.wait().await
    }

    /// Wait for the helper exit status.
    pub async fn wait(&self) -> ExitStatus {
        let mut exited = self.exited.clone();
        loop {
            if let Some(status) = *exited.borrow() {
                return status;
            }
            if exited.changed().await.is_err() {
                return ExitStatus { code: Some(1), signal: None };
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn exit_status_from(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus { code: status.code(), signal: status.signal() }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
