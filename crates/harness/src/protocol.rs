// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire vocabulary for the line-framed TCP protocol.
//!
//! Every line on the socket is one UTF-8 JSON object with a required
//! `kind`. Commands are sub-typed by `type`. Unknown kinds are ignored at
//! the framing layer; unknown command types fail explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::records::{
    Conversation, Directory, PullRequest, Repository, Scope, TaskRecord,
};
use crate::status::{
    AttentionReason, Controller, ControllerType, SessionStatus, StatusHint, WorkText,
};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Standard-padded base64, the only encoding used on the wire.
pub fn encode_base64(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(data)
}

pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.decode(data).ok()
}

/// Child exit description mirrored from the PTY helper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

// -- Session events -----------------------------------------------------------

/// Higher-level session events surfaced through `pty.event` envelopes and
/// the observed-event stream. Raw output and exit travel as their own
/// envelope kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Raw pass-through of a notify record the classifier had no rule for.
    Notify { ts: String, payload: serde_json::Value },
    AttentionRequired { reason: AttentionReason },
    TurnCompleted,
}

// -- Scope & subscription filters ---------------------------------------------

/// Scope attached to observed events: the session scope tuple plus the
/// directory/conversation the mutation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    #[serde(flatten)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Subscription filter: each set field must match the event scope;
/// `include_output` gates `session-output` events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub include_output: bool,
}

impl StreamFilter {
    /// Whether an event with the given scope and payload passes this filter.
    pub fn matches(&self, event: &ObservedEvent) -> bool {
        fn field(filter: &Option<String>, actual: &Option<String>) -> bool {
            match filter {
                Some(want) => actual.as_deref() == Some(want.as_str()),
                None => true,
            }
        }
        if !self.include_output && matches!(event.payload, ObservedPayload::SessionOutput { .. }) {
            return false;
        }
        field(&self.tenant_id, &event.scope.scope.tenant_id)
            && field(&self.user_id, &event.scope.scope.user_id)
            && field(&self.workspace_id, &event.scope.scope.workspace_id)
            && field(&self.directory_id, &event.scope.directory_id)
            && field(&self.conversation_id, &event.scope.conversation_id)
    }
}

// -- Observed events ----------------------------------------------------------

/// A mutation-or-fact normalized onto the event stream. The stream cursor
/// is assigned at publish time and travels in the `stream.event` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedEvent {
    #[serde(flatten)]
    pub scope: EventScope,
    pub observed_at: u64,
    #[serde(flatten)]
    pub payload: ObservedPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ObservedPayload {
    #[serde(rename_all = "camelCase")]
    DirectoryUpserted { directory: Directory },
    #[serde(rename_all = "camelCase")]
    DirectoryArchived { directory: Directory },
    #[serde(rename_all = "camelCase")]
    DirectoryDeleted { directory_id: String },
    #[serde(rename_all = "camelCase")]
    ConversationUpserted { conversation: Conversation },
    #[serde(rename_all = "camelCase")]
    ConversationArchived { conversation: Conversation },
    #[serde(rename_all = "camelCase")]
    ConversationDeleted { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    RepositoryUpserted { repository: Repository },
    #[serde(rename_all = "camelCase")]
    RepositoryArchived { repository: Repository },
    #[serde(rename_all = "camelCase")]
    RepositoryDeleted { repository_id: String },
    #[serde(rename_all = "camelCase")]
    RepositoryGitUpdated { repository: Repository },
    #[serde(rename_all = "camelCase")]
    TaskUpserted { task: TaskRecord },
    #[serde(rename_all = "camelCase")]
    TaskArchived { task: TaskRecord },
    #[serde(rename_all = "camelCase")]
    TaskDeleted { task_id: String },
    #[serde(rename_all = "camelCase")]
    TaskReordered { tasks: Vec<TaskRecord> },
    #[serde(rename_all = "camelCase")]
    GithubPrUpserted { pull_request: PullRequest },
    #[serde(rename_all = "camelCase")]
    GithubPrDeleted { pull_request_id: String },
    #[serde(rename_all = "camelCase")]
    SessionStatus {
        session_id: String,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attention_reason: Option<AttentionReason>,
        live: bool,
    },
    #[serde(rename_all = "camelCase")]
    SessionEvent { session_id: String, event: SessionEvent },
    #[serde(rename_all = "camelCase")]
    SessionTelemetry {
        session_id: String,
        event_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_hint: Option<StatusHint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionControl {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller: Option<Controller>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Controller>,
    },
    #[serde(rename_all = "camelCase")]
    SessionOutput { session_id: String, cursor: u64, chunk_base64: String },
}

// -- Session listing ----------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSort {
    #[default]
    AttentionFirst,
    StartedAsc,
    StartedDesc,
}

/// One row of `session.list` / `session.status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(flatten)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_reason: Option<AttentionReason>,
    pub live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<Controller>,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<u64>,
    pub latest_output_cursor: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_work: Option<WorkText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitStatus>,
}

// -- Commands -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyStartParams {
    pub session_id: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    pub initial_cols: u16,
    pub initial_rows: u16,
    #[serde(flatten)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_path: Option<String>,
    /// Disable snapshot ingest to save CPU when only raw events are wanted.
    #[serde(default = "default_true")]
    pub ingest_snapshots: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerParams {
    pub controller_id: String,
    pub controller_type: ControllerType,
    pub controller_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<bool>,
    #[serde(default)]
    pub sort: SessionSort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

/// PTY signal names accepted by `pty.signal` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PtySignal {
    /// Writes 0x03 (ETX) to the PTY.
    Interrupt,
    /// Writes 0x04 (EOT) to the PTY.
    Eof,
    /// Closes the session.
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "auth", rename_all = "camelCase")]
    Auth { token: String },

    #[serde(rename = "pty.start")]
    PtyStart(PtyStartParams),
    #[serde(rename = "pty.attach", rename_all = "camelCase")]
    PtyAttach {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_cursor: Option<u64>,
    },
    #[serde(rename = "pty.detach", rename_all = "camelCase")]
    PtyDetach { session_id: String },
    #[serde(rename = "pty.subscribe-events", rename_all = "camelCase")]
    PtySubscribeEvents { session_id: String },
    #[serde(rename = "pty.unsubscribe-events", rename_all = "camelCase")]
    PtyUnsubscribeEvents { session_id: String },
    #[serde(rename = "pty.close", rename_all = "camelCase")]
    PtyClose { session_id: String },

    #[serde(rename = "session.list")]
    SessionList(SessionListParams),
    #[serde(rename = "session.status", rename_all = "camelCase")]
    SessionStatus { session_id: String },
    #[serde(rename = "session.snapshot", rename_all = "camelCase")]
    SessionSnapshot {
        session_id: String,
        #[serde(default = "default_true")]
        include_hash: bool,
    },
    #[serde(rename = "session.respond", rename_all = "camelCase")]
    SessionRespond {
        session_id: String,
        text: String,
        #[serde(default = "default_true")]
        submit: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller_id: Option<String>,
    },
    #[serde(rename = "session.interrupt", rename_all = "camelCase")]
    SessionInterrupt { session_id: String },
    #[serde(rename = "session.claim", rename_all = "camelCase")]
    SessionClaim {
        session_id: String,
        #[serde(flatten)]
        controller: ControllerParams,
        #[serde(default)]
        takeover: bool,
    },
    #[serde(rename = "session.release", rename_all = "camelCase")]
    SessionRelease { session_id: String },
    #[serde(rename = "session.remove", rename_all = "camelCase")]
    SessionRemove { session_id: String },
    #[serde(rename = "session.telemetry", rename_all = "camelCase")]
    SessionTelemetry {
        session_id: String,
        event_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_hint: Option<StatusHint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        observed_at: Option<u64>,
        #[serde(default)]
        heartbeat_only: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attention_reason: Option<AttentionReason>,
    },

    #[serde(rename = "attention.list")]
    AttentionList(SessionListParams),

    #[serde(rename = "stream.subscribe", rename_all = "camelCase")]
    StreamSubscribe {
        #[serde(default)]
        filter: StreamFilter,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after_cursor: Option<u64>,
    },
    #[serde(rename = "stream.unsubscribe", rename_all = "camelCase")]
    StreamUnsubscribe { subscription_id: String },

    #[serde(rename = "directory.upsert", rename_all = "camelCase")]
    DirectoryUpsert { directory: Directory },
    #[serde(rename = "directory.get", rename_all = "camelCase")]
    DirectoryGet { directory_id: String },
    #[serde(rename = "directory.list")]
    DirectoryList(ListParams),
    #[serde(rename = "directory.archive", rename_all = "camelCase")]
    DirectoryArchive { directory_id: String },
    #[serde(rename = "directory.delete", rename_all = "camelCase")]
    DirectoryDelete { directory_id: String },

    #[serde(rename = "conversation.upsert", rename_all = "camelCase")]
    ConversationUpsert { conversation: Conversation },
    #[serde(rename = "conversation.get", rename_all = "camelCase")]
    ConversationGet { conversation_id: String },
    #[serde(rename = "conversation.list")]
    ConversationList(ListParams),
    #[serde(rename = "conversation.archive", rename_all = "camelCase")]
    ConversationArchive { conversation_id: String },
    #[serde(rename = "conversation.delete", rename_all = "camelCase")]
    ConversationDelete { conversation_id: String },

    #[serde(rename = "repository.upsert", rename_all = "camelCase")]
    RepositoryUpsert { repository: Repository },
    #[serde(rename = "repository.get", rename_all = "camelCase")]
    RepositoryGet { repository_id: String },
    #[serde(rename = "repository.list")]
    RepositoryList(ListParams),
    #[serde(rename = "repository.archive", rename_all = "camelCase")]
    RepositoryArchive { repository_id: String },
    #[serde(rename = "repository.delete", rename_all = "camelCase")]
    RepositoryDelete { repository_id: String },
    #[serde(rename = "repository.git-updated", rename_all = "camelCase")]
    RepositoryGitUpdated {
        repository_id: String,
        git: crate::records::GitStatus,
    },

    #[serde(rename = "task.upsert", rename_all = "camelCase")]
    TaskUpsert { task: TaskRecord },
    #[serde(rename = "task.get", rename_all = "camelCase")]
    TaskGet { task_id: String },
    #[serde(rename = "task.list")]
    TaskList(ListParams),
    #[serde(rename = "task.archive", rename_all = "camelCase")]
    TaskArchive { task_id: String },
    #[serde(rename = "task.delete", rename_all = "camelCase")]
    TaskDelete { task_id: String },
    #[serde(rename = "task.reorder", rename_all = "camelCase")]
    TaskReorder { task_ids: Vec<String> },

    #[serde(rename = "github.pr.upsert", rename_all = "camelCase")]
    GithubPrUpsert { pull_request: PullRequest },
    #[serde(rename = "github.pr.get", rename_all = "camelCase")]
    GithubPrGet { pull_request_id: String },
    #[serde(rename = "github.pr.list", rename_all = "camelCase")]
    GithubPrList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repository_id: Option<String>,
    },
    #[serde(rename = "github.pr.delete", rename_all = "camelCase")]
    GithubPrDelete { pull_request_id: String },
}

// -- Envelopes ----------------------------------------------------------------

/// Client → server envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientEnvelope {
    #[serde(rename = "command", rename_all = "camelCase")]
    Command {
        command_id: String,
        #[serde(flatten)]
        command: Command,
    },
    #[serde(rename = "pty.input", rename_all = "camelCase")]
    PtyInput { session_id: String, data_base64: String },
    #[serde(rename = "pty.resize", rename_all = "camelCase")]
    PtyResize { session_id: String, cols: u16, rows: u16 },
    #[serde(rename = "pty.signal", rename_all = "camelCase")]
    PtySignal { session_id: String, signal: PtySignal },
    #[serde(rename = "auth", rename_all = "camelCase")]
    Auth { token: String },
}

/// Server → client envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerEnvelope {
    #[serde(rename = "auth.ok")]
    AuthOk {},
    #[serde(rename = "auth.error", rename_all = "camelCase")]
    AuthError { message: String },
    #[serde(rename = "command.accepted", rename_all = "camelCase")]
    CommandAccepted { command_id: String },
    #[serde(rename = "command.completed", rename_all = "camelCase")]
    CommandCompleted { command_id: String, result: serde_json::Value },
    #[serde(rename = "command.failed", rename_all = "camelCase")]
    CommandFailed { command_id: String, error: crate::error::CommandError },
    #[serde(rename = "pty.output", rename_all = "camelCase")]
    PtyOutput { session_id: String, chunk_base64: String, cursor: u64 },
    #[serde(rename = "pty.event", rename_all = "camelCase")]
    PtyEvent { session_id: String, event: SessionEvent },
    #[serde(rename = "pty.exit", rename_all = "camelCase")]
    PtyExit { session_id: String, exit: ExitStatus },
    #[serde(rename = "stream.event", rename_all = "camelCase")]
    StreamEvent { subscription_id: String, cursor: u64, event: ObservedEvent },
}

impl ServerEnvelope {
    /// Encode as one protocol line, including the trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

impl ClientEnvelope {
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
