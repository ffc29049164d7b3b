// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: sessionId → entry (status, controller, attention,
//! tombstone), status derivation, and the list/attention views.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::protocol::{now_ms, ExitStatus, SessionListParams, SessionSort, SessionSummary};
use crate::records::Scope;
use crate::session::LiveSession;
use crate::status::{
    apply_work_update, input_submits_turn, is_running_hint, AttentionReason, Controller,
    SessionStatus, StatusHint, WorkText, WorkUpdate,
};

/// One tracked session, live or tombstoned.
pub struct SessionEntry {
    pub session_id: String,
    pub scope: Scope,
    pub directory_id: Option<String>,
    pub conversation_id: Option<String>,
    /// `Some` while the PTY is alive; a tombstone keeps the entry with
    /// `None` here until its TTL elapses.
    pub live: Option<Arc<LiveSession>>,
    pub status: SessionStatus,
    pub attention_reason: Option<AttentionReason>,
    /// When the session last entered needs-input; orders the attention queue.
    pub attention_at: Option<u64>,
    pub controller: Option<Controller>,
    pub started_at: u64,
    pub exited_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub last_known_work: Option<WorkText>,
    pub exit: Option<ExitStatus>,
    /// Cursor frozen at exit so tombstone summaries stay meaningful.
    pub final_cursor: u64,
    /// Broker event listener handle, removed at teardown.
    pub event_listener: Option<u64>,
    /// Armed when the session exits; destroys the tombstone after the TTL.
    pub tombstone_timer: Option<JoinHandle<()>>,
}

impl SessionEntry {
    pub fn new(session_id: String, scope: Scope, live: Arc<LiveSession>) -> Self {
        Self {
            session_id,
            scope,
            directory_id: None,
            conversation_id: None,
            live: Some(live),
            status: SessionStatus::Completed,
            attention_reason: None,
            attention_at: None,
            controller: None,
            started_at: now_ms(),
            exited_at: None,
            last_event_at: None,
            last_known_work: None,
            exit: None,
            final_cursor: 0,
            event_listener: None,
            tombstone_timer: None,
        }
    }

    /// A tombstone restored from the state store at startup: not live,
    /// but its last-known status (e.g. needs-input) is observable.
    pub fn restored(
        session_id: String,
        scope: Scope,
        status: SessionStatus,
        attention_reason: Option<AttentionReason>,
        controller: Option<Controller>,
    ) -> Self {
        Self {
            session_id,
            scope,
            directory_id: None,
            conversation_id: None,
            live: None,
            status,
            attention_reason,
            attention_at: attention_reason.map(|_| now_ms()),
            controller,
            started_at: now_ms(),
            exited_at: None,
            last_event_at: None,
            last_known_work: None,
            exit: None,
            final_cursor: 0,
            event_listener: None,
            tombstone_timer: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn latest_output_cursor(&self) -> u64 {
        match self.live {
            Some(ref live) => live.latest_cursor(),
            None => self.final_cursor,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            scope: self.scope.clone(),
            directory_id: self.directory_id.clone(),
            conversation_id: self.conversation_id.clone(),
            status: self.status,
            attention_reason: self.attention_reason,
            live: self.is_live(),
            controller: self.controller.clone(),
            started_at: self.started_at,
            exited_at: self.exited_at,
            last_event_at: self.last_event_at,
            latest_output_cursor: self.latest_output_cursor(),
            last_known_work: self.last_known_work.clone(),
            exit: self.exit,
        }
    }

    // -- Status transitions ---------------------------------------------------
    // Each returns true when status or attention changed (the caller
    // persists and publishes on change).

    /// Client input containing a turn submission moves a completed
    /// session back to running.
    pub fn apply_input(&mut self, data: &[u8]) -> bool {
        if self.is_live() && self.status == SessionStatus::Completed && input_submits_turn(data) {
            self.status = SessionStatus::Running;
            return true;
        }
        false
    }

    /// Attention events (from the notify hook or telemetry) mark the
    /// session needs-input.
    pub fn apply_attention(&mut self, reason: AttentionReason) -> bool {
        self.last_event_at = Some(now_ms());
        self.attention_reason = Some(reason);
        self.attention_at = Some(now_ms());
        if self.status != SessionStatus::NeedsInput && self.is_live() {
            self.status = SessionStatus::NeedsInput;
            return true;
        }
        true
    }

    /// A completed turn always lands on `completed` and clears attention.
    pub fn apply_turn_completed(&mut self) -> bool {
        self.last_event_at = Some(now_ms());
        let changed = self.status != SessionStatus::Completed
            || self.attention_reason.is_some();
        if self.is_live() {
            self.status = SessionStatus::Completed;
        }
        self.attention_reason = None;
        self.attention_at = None;
        changed
    }

    /// Telemetry key events: needs-input hints stick; running hints from
    /// the trusted event set clear needs-input; completed hints are
    /// ignored (only turn-completed or exit closes a turn).
    pub fn apply_telemetry(
        &mut self,
        event_name: &str,
        status_hint: Option<StatusHint>,
        summary: Option<String>,
        observed_at: Option<u64>,
        heartbeat_only: bool,
        attention_reason: Option<AttentionReason>,
    ) -> bool {
        self.last_event_at = Some(now_ms());
        let observed_at = observed_at.unwrap_or_else(now_ms);
        apply_work_update(
            &mut self.last_known_work,
            WorkUpdate { summary, observed_at, heartbeat_only },
        );

        match status_hint {
            Some(StatusHint::NeedsInput) => {
                self.apply_attention(attention_reason.unwrap_or(AttentionReason::UserInput))
            }
            Some(StatusHint::Running)
                if is_running_hint(event_name, status_hint)
                    && self.status == SessionStatus::NeedsInput
                    && self.is_live() =>
            {
                self.status = SessionStatus::Running;
                self.attention_reason = None;
                self.attention_at = None;
                true
            }
            _ => false,
        }
    }

    /// PTY exit: terminal state, live flag drops, tombstone timing starts
    /// at the caller.
    pub fn apply_exit(&mut self, exit: ExitStatus, final_cursor: u64) -> bool {
        self.live = None;
        self.status = SessionStatus::Exited;
        self.exit = Some(exit);
        self.exited_at = Some(now_ms());
        self.final_cursor = final_cursor;
        true
    }
}

#[derive(Default)]
pub struct Registry {
    sessions: HashMap<String, SessionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: SessionEntry) {
        self.sessions.insert(entry.session_id.clone(), entry);
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionEntry> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.remove(session_id)
    }

    pub fn contains_live(&self, session_id: &str) -> bool {
        self.sessions.get(session_id).map(|e| e.is_live()).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }

    /// Filtered, sorted summaries for `session.list`.
    pub fn list(&self, params: &SessionListParams) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .values()
            .filter(|e| {
                fn matches(filter: &Option<String>, actual: &Option<String>) -> bool {
                    match filter {
                        Some(want) => actual.as_deref() == Some(want.as_str()),
                        None => true,
                    }
                }
                matches(&params.tenant_id, &e.scope.tenant_id)
                    && matches(&params.user_id, &e.scope.user_id)
                    && matches(&params.workspace_id, &e.scope.workspace_id)
                    && matches(&params.worktree_id, &e.scope.worktree_id)
                    && params.status.map(|s| e.status == s).unwrap_or(true)
                    && params.live.map(|l| e.is_live() == l).unwrap_or(true)
            })
            .map(|e| e.summary())
            .collect();

        match params.sort {
            SessionSort::AttentionFirst => rows.sort_by(attention_first_cmp),
            SessionSort::StartedAsc => rows.sort_by(|a, b| {
                a.started_at.cmp(&b.started_at).then_with(|| a.session_id.cmp(&b.session_id))
            }),
            SessionSort::StartedDesc => rows.sort_by(|a, b| {
                b.started_at.cmp(&a.started_at).then_with(|| a.session_id.cmp(&b.session_id))
            }),
        }
        rows
    }

    /// Sessions awaiting input, most recently marked first.
    pub fn attention_queue(&self) -> Vec<SessionSummary> {
        let mut waiting: Vec<&SessionEntry> = self
            .sessions
            .values()
            .filter(|e| e.status == SessionStatus::NeedsInput)
            .collect();
        waiting.sort_by(|a, b| {
            b.attention_at
                .cmp(&a.attention_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        waiting.into_iter().map(|e| e.summary()).collect()
    }
}

/// `attention-first`: needs-input, then running, completed, exited; ties
/// break on `lastEventAt` descending (nulls last), then `startedAt`
/// descending, then session id.
fn attention_first_cmp(a: &SessionSummary, b: &SessionSummary) -> std::cmp::Ordering {
    fn rank(status: SessionStatus) -> u8 {
        match status {
            SessionStatus::NeedsInput => 0,
            SessionStatus::Running => 1,
            SessionStatus::Completed => 2,
            SessionStatus::Exited => 3,
        }
    }
    fn last_event_key(v: Option<u64>) -> (bool, std::cmp::Reverse<u64>) {
        match v {
            Some(at) => (false, std::cmp::Reverse(at)),
            None => (true, std::cmp::Reverse(0)),
        }
    }
    rank(a.status)
        .cmp(&rank(b.status))
        .then_with(|| last_event_key(a.last_event_at).cmp(&last_event_key(b.last_event_at)))
        .then_with(|| b.started_at.cmp(&a.started_at))
        .then_with(|| a.session_id.cmp(&b.session_id))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
