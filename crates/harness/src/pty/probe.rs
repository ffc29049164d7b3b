// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keystroke round-trip probes.
//!
//! Small writes register a probe; when the echo shows up in stdout the
//! elapsed time is reported. A probe that never matches expires silently.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Largest payload eligible for probing.
pub const MAX_PROBE_PAYLOAD: usize = 256;
/// Bound on pending probes; the oldest is dropped on overflow.
pub const MAX_PENDING_PROBES: usize = 64;
/// Sliding scan window over recent stdout.
pub const SCAN_WINDOW: usize = 8 * 1024;
/// Probes older than this are discarded unmatched.
pub const PROBE_EXPIRY: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Probe {
    id: u64,
    started_at: Instant,
    payloads: Vec<Vec<u8>>,
    /// Total stdout bytes seen when the probe was registered; only output
    /// after this point can complete it.
    watermark: u64,
}

/// A completed probe: id plus elapsed milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeCompletion {
    pub id: u64,
    pub elapsed_ms: f64,
}

#[derive(Debug)]
pub struct ProbeTracker {
    pending: VecDeque<Probe>,
    window: Vec<u8>,
    total_observed: u64,
    next_id: u64,
    expiry: Duration,
}

impl Default for ProbeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeTracker {
    pub fn new() -> Self {
        Self::with_expiry(PROBE_EXPIRY)
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            window: Vec::new(),
            total_observed: 0,
            next_id: 0,
            expiry,
        }
    }

    /// Register a probe for an outbound payload. Oversized payloads are
    /// ignored; overflow drops the oldest pending probe.
    pub fn register(&mut self, payload: &[u8]) -> Option<u64> {
        if payload.is_empty() || payload.len() > MAX_PROBE_PAYLOAD {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let mut payloads = vec![payload.to_vec()];
        let upgraded = crlf_upgrade(payload);
        if upgraded != payload {
            payloads.push(upgraded);
        }

        self.pending.push_back(Probe {
            id,
            started_at: Instant::now(),
            payloads,
            watermark: self.total_observed,
        });
        while self.pending.len() > MAX_PENDING_PROBES {
            self.pending.pop_front();
        }
        Some(id)
    }

    /// Feed a stdout chunk; returns the probes it completed.
    pub fn observe(&mut self, chunk: &[u8]) -> Vec<ProbeCompletion> {
        self.total_observed += chunk.len() as u64;
        self.window.extend_from_slice(chunk);
        if self.window.len() > SCAN_WINDOW {
            let excess = self.window.len() - SCAN_WINDOW;
            self.window.drain(..excess);
        }

        let now = Instant::now();
        let expiry = self.expiry;
        self.pending.retain(|p| now.duration_since(p.started_at) <= expiry);

        let mut completed = Vec::new();
        let window = &self.window;
        let window_start = self.total_observed - window.len() as u64;
        self.pending.retain(|probe| {
            // Scan only output that arrived after the probe was registered.
            let skip = probe.watermark.saturating_sub(window_start) as usize;
            let region = &window[skip.min(window.len())..];
            let matched = probe.payloads.iter().any(|p| contains(region, p));
            if matched {
                completed.push(ProbeCompletion {
                    id: probe.id,
                    elapsed_ms: now.duration_since(probe.started_at).as_secs_f64() * 1000.0,
                });
            }
            !matched
        });
        completed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Copy of `payload` with every bare `\n` upgraded to `\r\n`.
fn crlf_upgrade(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut prev = 0u8;
    for &b in payload {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
