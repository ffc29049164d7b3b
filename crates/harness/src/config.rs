// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::query::{parse_hex, ResponderColors};
use crate::server::ServerConfig;

/// Control-plane server for PTY agent sessions.
#[derive(Debug, Parser)]
#[command(name = "harness", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "HARNESS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port to listen on.
    #[arg(long, env = "HARNESS_PORT", default_value = "4470")]
    pub port: u16,

    /// Bearer token required before any other command.
    #[arg(long, env = "HARNESS_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Path to the state store database file.
    #[arg(long, env = "HARNESS_STATE_STORE", default_value = "harness-state.db")]
    pub state_store: PathBuf,

    /// How long an exited session's tombstone stays observable, in
    /// milliseconds. Zero destroys tombstones synchronously on exit.
    /// Required: there is deliberately no baked-in default.
    #[arg(long, env = "HARNESS_TOMBSTONE_TTL_MS")]
    pub tombstone_ttl_ms: u64,

    /// Per-connection outbound byte budget before the connection is closed.
    #[arg(long, env = "HARNESS_MAX_CONN_BUFFERED_BYTES", default_value = "8388608")]
    pub max_connection_buffered_bytes: usize,

    /// Bound on the stream-event journal ring.
    #[arg(long, env = "HARNESS_MAX_JOURNAL_ENTRIES", default_value = "4096")]
    pub max_stream_journal_entries: usize,

    /// Largest accepted protocol line in bytes; larger messages drop.
    #[arg(long, env = "HARNESS_MAX_MESSAGE_BYTES", default_value = "4194304")]
    pub max_message_bytes: usize,

    /// Per-session replay window, in output chunks.
    #[arg(long, env = "HARNESS_REPLAY_CHUNKS", default_value = "512")]
    pub replay_chunks: usize,

    /// Scrollback lines retained per session on the primary screen.
    #[arg(long, env = "HARNESS_SCROLLBACK_LIMIT", default_value = "2000")]
    pub scrollback_limit: usize,

    /// Explicit path to the PTY helper binary.
    #[arg(long, env = "HARNESS_PTY_HELPER")]
    pub pty_helper: Option<PathBuf>,

    /// Directory for per-session notify files.
    #[arg(long, env = "HARNESS_NOTIFY_DIR", default_value = "harness-notify")]
    pub notify_dir: PathBuf,

    /// Notify poll interval in milliseconds.
    #[arg(long, env = "HARNESS_NOTIFY_POLL_MS", default_value = "250")]
    pub notify_poll_ms: u64,

    /// Terminal foreground color for query replies (hex, e.g. e5e5e5).
    #[arg(long, env = "HARNESS_TERM_FG")]
    pub term_fg: Option<String>,

    /// Terminal background color for query replies (hex).
    #[arg(long, env = "HARNESS_TERM_BG")]
    pub term_bg: Option<String>,

    /// Perf sink output path (JSONL). Enables keystroke round-trip probes.
    #[arg(long, env = "HARNESS_PERF_LOG")]
    pub perf_log: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "HARNESS_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HARNESS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connection_buffered_bytes == 0 {
            anyhow::bail!("--max-connection-buffered-bytes must be positive");
        }
        if self.max_stream_journal_entries == 0 {
            anyhow::bail!("--max-stream-journal-entries must be positive");
        }
        if self.replay_chunks == 0 {
            anyhow::bail!("--replay-chunks must be positive");
        }
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        for (flag, value) in [("--term-fg", &self.term_fg), ("--term-bg", &self.term_bg)] {
            if let Some(value) = value {
                if parse_hex(value).is_none() {
                    anyhow::bail!("invalid {flag} color: {value} (expected rrggbb hex)");
                }
            }
        }
        Ok(())
    }

    /// Responder colors from flags, before env overrides.
    pub fn responder_colors(&self) -> ResponderColors {
        let mut colors = ResponderColors::default();
        if let Some(fg) = self.term_fg.as_deref().and_then(parse_hex) {
            colors.foreground = fg;
            colors.cursor = fg;
        }
        if let Some(bg) = self.term_bg.as_deref().and_then(parse_hex) {
            colors.background = bg;
        }
        colors
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            auth_token: self.auth_token.clone(),
            state_store: self.state_store.clone(),
            tombstone_ttl: Duration::from_millis(self.tombstone_ttl_ms),
            max_connection_buffered_bytes: self.max_connection_buffered_bytes,
            max_journal_entries: self.max_stream_journal_entries,
            max_message_bytes: self.max_message_bytes,
            replay_chunks: self.replay_chunks,
            scrollback_limit: self.scrollback_limit,
            pty_helper: self.pty_helper.clone(),
            notify_dir: self.notify_dir.clone(),
            notify_poll_interval: Duration::from_millis(self.notify_poll_ms.max(10)),
            responder_colors: self.responder_colors(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
