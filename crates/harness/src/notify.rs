// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental notify-file reader.
//!
//! The child is launched with a notify hook that appends one JSON record
//! per line. Each poll reads only the bytes past the stored offset;
//! partial trailing lines wait for the next poll and malformed lines are
//! skipped.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::status::AttentionReason;

/// One parsed notify record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotifyRecord {
    pub ts: String,
    pub payload: serde_json::Value,
}

/// Classification of a notify payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyClass {
    TurnCompleted,
    Attention(AttentionReason),
    Raw,
}

/// Classify a notify payload by its `type`.
pub fn classify(payload: &serde_json::Value) -> NotifyClass {
    let kind = payload.get("type").and_then(|t| t.as_str()).unwrap_or("");
    if kind == "agent-turn-complete" || kind == "agent.turn-completed" {
        NotifyClass::TurnCompleted
    } else if kind.starts_with("item/file-change/request-approval") {
        NotifyClass::Attention(AttentionReason::Approval)
    } else if kind.starts_with("item/tool/request-input") {
        NotifyClass::Attention(AttentionReason::UserInput)
    } else {
        NotifyClass::Raw
    }
}

#[derive(Debug)]
pub struct NotifyReader {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl NotifyReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), offset: 0, partial: Vec::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read records appended since the last poll. A missing file is not
    /// an error — the hook may not have fired yet.
    pub fn poll(&mut self) -> Vec<NotifyRecord> {
        let Ok(mut file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }
        let mut fresh = Vec::new();
        if file.read_to_end(&mut fresh).is_err() || fresh.is_empty() {
            return Vec::new();
        }
        self.offset += fresh.len() as u64;
        self.partial.extend_from_slice(&fresh);

        let mut records = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<NotifyRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => {
                    // Malformed line: skip it.
                }
            }
        }
        records
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
