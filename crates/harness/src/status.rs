// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session status derivation: the status machine, running-hint
//! classification, and the last-known-work text discipline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived session status. Initial state is `Completed` (a fresh session
/// idles until input or telemetry says otherwise); `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Running,
    NeedsInput,
    Completed,
    Exited,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::NeedsInput => "needs-input",
            Self::Completed => "completed",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is waiting on a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionReason {
    Approval,
    UserInput,
}

/// Who currently holds the write claim on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerType {
    Agent,
    Human,
    Automation,
}

/// The current authorized writer for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub controller_id: String,
    pub controller_type: ControllerType,
    pub controller_label: String,
    pub claimed_at: u64,
}

/// Telemetry status hints carried on key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusHint {
    Running,
    NeedsInput,
    Completed,
}

/// Key-event names whose `running` hint is trusted to close a
/// needs-input state.
pub const RUNNING_HINT_EVENTS: &[&str] =
    &["codex.api_request", "codex.tool_decision", "codex.sse_event"];

/// Whether a telemetry key event counts as a running hint.
pub fn is_running_hint(event_name: &str, hint: Option<StatusHint>) -> bool {
    hint == Some(StatusHint::Running) && RUNNING_HINT_EVENTS.contains(&event_name)
}

/// Whether raw input bytes contain a turn submission.
pub fn input_submits_turn(data: &[u8]) -> bool {
    data.iter().any(|&b| b == b'\r' || b == b'\n')
}

// -- Last-known-work text -----------------------------------------------------

/// Classified strength of a work summary; stronger classes may replace
/// weaker ones, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkClass {
    Unclassified,
    Completed,
    Running,
}

/// Classify a telemetry summary's strength.
pub fn classify_summary(summary: &str) -> WorkClass {
    let lower = summary.to_lowercase();
    const RUNNING_MARKERS: &[&str] =
        &["running", "working", "thinking", "executing", "calling", "streaming", "applying"];
    const COMPLETED_MARKERS: &[&str] = &["done", "completed", "finished", "idle"];
    if RUNNING_MARKERS.iter().any(|m| lower.contains(m)) {
        WorkClass::Running
    } else if COMPLETED_MARKERS.iter().any(|m| lower.contains(m)) {
        WorkClass::Completed
    } else {
        WorkClass::Unclassified
    }
}

/// The stored last-known-work text for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkText {
    pub text: String,
    pub class: WorkClass,
    pub observed_at: u64,
}

/// An incoming work-text update from telemetry.
#[derive(Debug, Clone)]
pub struct WorkUpdate {
    pub summary: Option<String>,
    pub observed_at: u64,
    /// Heartbeat-only sources (OTLP traces) never replace text; they only
    /// bump `observed_at` while the stored text still reads as running.
    pub heartbeat_only: bool,
}

/// Apply a work-text update under the monotonicity and strength rules.
///
/// Returns true when the stored value changed.
pub fn apply_work_update(current: &mut Option<WorkText>, update: WorkUpdate) -> bool {
    if let Some(ref existing) = current {
        if update.observed_at < existing.observed_at {
            return false;
        }
    }

    if update.heartbeat_only {
        if let Some(existing) = current.as_mut() {
            if existing.class == WorkClass::Running {
                existing.observed_at = update.observed_at;
                return true;
            }
        }
        return false;
    }

    let Some(summary) = update.summary else {
        return false;
    };
    let class = classify_summary(&summary);
    match current {
        Some(existing) if class < existing.class => false,
        _ => {
            *current = Some(WorkText { text: summary, class, observed_at: update.observed_at });
            true
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
