// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary tests.
//!
//! Spawns the real `harness` binary as a subprocess and drives it over
//! the TCP JSON-lines protocol with the in-tree stream client.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use harness::client::{ClientConfig, StreamClient};

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Builder for a [`HarnessProcess`].
pub struct HarnessBuilder {
    auth_token: Option<String>,
    tombstone_ttl_ms: u64,
    perf_log: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self { auth_token: None, tombstone_ttl_ms: 60_000, perf_log: false }
    }
}

impl HarnessBuilder {
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn tombstone_ttl_ms(mut self, ttl: u64) -> Self {
        self.tombstone_ttl_ms = ttl;
        self
    }

    pub fn perf_log(mut self) -> Self {
        self.perf_log = true;
        self
    }

    pub async fn spawn(self) -> anyhow::Result<HarnessProcess> {
        let dir = tempfile::tempdir()?;
        let port = free_port()?;
        let perf_log = self.perf_log.then(|| dir.path().join("perf.jsonl"));

        let mut command = Command::new(workspace_binary("harness"));
        command
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--state-store")
            .arg(dir.path().join("state.db"))
            .arg("--notify-dir")
            .arg(dir.path().join("notify"))
            .arg("--tombstone-ttl-ms")
            .arg(self.tombstone_ttl_ms.to_string())
            .arg("--pty-helper")
            .arg(workspace_binary("harness-pty-helper"))
            .arg("--notify-poll-ms")
            .arg("25")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(ref token) = self.auth_token {
            command.arg("--auth-token").arg(token);
        }
        if let Some(ref path) = perf_log {
            command.arg("--perf-log").arg(path);
        }

        let child = command.spawn()?;
        let process = HarnessProcess {
            child,
            port,
            auth_token: self.auth_token,
            perf_log,
            dir,
        };
        process.wait_ready().await?;
        Ok(process)
    }
}

/// A running `harness` process, killed on drop.
pub struct HarnessProcess {
    child: Child,
    port: u16,
    auth_token: Option<String>,
    perf_log: Option<PathBuf>,
    dir: tempfile::TempDir,
}

impl HarnessProcess {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn perf_log(&self) -> Option<&Path> {
        self.perf_log.as_deref()
    }

    /// A scratch path inside the process's temp dir.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Wait for the listener to come up.
    async fn wait_ready(&self) -> anyhow::Result<()> {
        for _ in 0..200 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        anyhow::bail!("harness did not start listening on port {}", self.port)
    }

    /// Connect an authenticated stream client.
    pub async fn client(&self) -> anyhow::Result<StreamClient> {
        let mut config = ClientConfig::new("127.0.0.1", self.port);
        config.auth_token = self.auth_token.clone();
        config.command_timeout = Duration::from_secs(10);
        StreamClient::connect(config).await
    }

    /// Connect without authenticating, regardless of server config.
    pub async fn raw_client(&self) -> anyhow::Result<StreamClient> {
        let mut config = ClientConfig::new("127.0.0.1", self.port);
        config.command_timeout = Duration::from_secs(10);
        StreamClient::connect(config).await
    }
}

impl Drop for HarnessProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
