// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keystroke round-trip latency gate.
//!
//! Writes small payloads to a `/bin/cat` session and measures the time
//! until the echo arrives on the attached output stream. Thresholds are
//! configurable through `HARNESS_LATENCY_*`.

use std::time::{Duration, Instant};

use harness::protocol::{decode_base64, Command, PtyStartParams, ServerEnvelope};
use harness::records::Scope;
use specs::HarnessProcess;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64 - 1.0) * pct / 100.0).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[tokio::test]
#[serial_test::serial]
async fn keystroke_roundtrip_stays_under_thresholds() {
    let samples = env_u64("HARNESS_LATENCY_SAMPLES", 20) as usize;
    let timeout = Duration::from_millis(env_u64("HARNESS_LATENCY_TIMEOUT_MS", 5000));
    let max_p50 = Duration::from_millis(env_u64("HARNESS_LATENCY_MAX_P50_MS", 250));
    let max_p95 = Duration::from_millis(env_u64("HARNESS_LATENCY_MAX_P95_MS", 500));
    let max_p99 = Duration::from_millis(env_u64("HARNESS_LATENCY_MAX_P99_MS", 1000));

    let process = HarnessProcess::builder().perf_log().spawn().await.unwrap();
    let client = process.client().await.unwrap();

    client
        .send_command(Command::PtyStart(PtyStartParams {
            session_id: "latency".into(),
            command: vec!["/bin/cat".into()],
            cwd: None,
            env: None,
            initial_cols: 80,
            initial_rows: 24,
            scope: Scope::default(),
            directory_id: None,
            conversation_id: None,
            notify_path: None,
            ingest_snapshots: false,
        }))
        .await
        .unwrap();
    client
        .send_command(Command::PtyAttach { session_id: "latency".into(), since_cursor: None })
        .await
        .unwrap();

    let mut envelopes = client.subscribe();
    let mut durations = Vec::with_capacity(samples);
    for i in 0..samples {
        let marker = format!("probe-{i}\n");
        let started = Instant::now();
        client.input("latency", marker.as_bytes());

        let mut seen = Vec::new();
        let needle = format!("probe-{i}");
        loop {
            let envelope = tokio::time::timeout(timeout, envelopes.recv())
                .await
                .expect("echo timed out")
                .expect("stream closed");
            if let ServerEnvelope::PtyOutput { chunk_base64, .. } = envelope {
                seen.extend_from_slice(&decode_base64(&chunk_base64).unwrap_or_default());
                if String::from_utf8_lossy(&seen).contains(&needle) {
                    break;
                }
            }
            assert!(started.elapsed() < timeout, "echo timed out for sample {i}");
        }
        durations.push(started.elapsed());
    }

    durations.sort();
    let p50 = percentile(&durations, 50.0);
    let p95 = percentile(&durations, 95.0);
    let p99 = percentile(&durations, 99.0);
    eprintln!("keystroke roundtrip: p50={p50:?} p95={p95:?} p99={p99:?}");

    assert!(p50 <= max_p50, "p50 {p50:?} over budget {max_p50:?}");
    assert!(p95 <= max_p95, "p95 {p95:?} over budget {max_p95:?}");
    assert!(p99 <= max_p99, "p99 {p99:?} over budget {max_p99:?}");
}
