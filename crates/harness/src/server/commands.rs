// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatch: every `command` envelope lands here after the auth
//! gate. Handlers mutate under the control lock and return the result
//! payload for `command.completed`.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::{conn::ConnHandle, SessionEventMsg, Shared};
use crate::broker::AttachHandlers;
use crate::error::CommandError;
use crate::protocol::{
    now_ms, Command, EventScope, ObservedPayload, PtyStartParams, ServerEnvelope,
    SessionListParams, StreamFilter,
};
use crate::records::Scope;
use crate::registry::SessionEntry;
use crate::session::{LiveSession, SessionSpawn};
use crate::status::{Controller, SessionStatus};

type CommandResult = Result<serde_json::Value, CommandError>;

pub async fn handle(shared: &Arc<Shared>, conn: &Arc<ConnHandle>, command: Command) -> CommandResult {
    match command {
        Command::Auth { token } => auth(shared, conn, &token),
        Command::PtyStart(params) => pty_start(shared, params).await,
        Command::PtyAttach { session_id, since_cursor } => {
            pty_attach(shared, conn, &session_id, since_cursor.unwrap_or(0)).await
        }
        Command::PtyDetach { session_id } => pty_detach(shared, conn, &session_id).await,
        Command::PtySubscribeEvents { session_id } => {
            let control = shared.control.lock().await;
            if control.registry.get(&session_id).is_none() {
                return Err(CommandError::not_found(format!("no such session: {session_id}")));
            }
            conn.event_sessions.lock().insert(session_id);
            Ok(json!({}))
        }
        Command::PtyUnsubscribeEvents { session_id } => {
            conn.event_sessions.lock().remove(&session_id);
            Ok(json!({}))
        }
        Command::PtyClose { session_id } => pty_close(shared, &session_id).await,
        Command::SessionList(params) => session_list(shared, &params).await,
        Command::SessionStatus { session_id } => {
            let control = shared.control.lock().await;
            let entry = control
                .registry
                .get(&session_id)
                .ok_or_else(|| CommandError::not_found(format!("no such session: {session_id}")))?;
            Ok(serde_json::to_value(entry.summary()).unwrap_or_default())
        }
        Command::SessionSnapshot { session_id, include_hash } => {
            session_snapshot(shared, &session_id, include_hash).await
        }
        Command::SessionRespond { session_id, text, submit, controller_id } => {
            session_respond(shared, &session_id, &text, submit, controller_id.as_deref()).await
        }
        Command::SessionInterrupt { session_id } => {
            let live = require_live(shared, &session_id).await?;
            live.write(Bytes::from_static(b"\x03"))
                .await
                .map_err(|e| CommandError::internal(e.to_string()))?;
            Ok(json!({}))
        }
        Command::SessionClaim { session_id, controller, takeover } => {
            session_claim(shared, &session_id, controller, takeover).await
        }
        Command::SessionRelease { session_id } => session_release(shared, &session_id).await,
        Command::SessionRemove { session_id } => session_remove(shared, &session_id).await,
        Command::SessionTelemetry {
            session_id,
            event_name,
            status_hint,
            summary,
            observed_at,
            heartbeat_only,
            attention_reason,
        } => {
            session_telemetry(
                shared,
                &session_id,
                &event_name,
                status_hint,
                summary,
                observed_at,
                heartbeat_only,
                attention_reason,
            )
            .await
        }
        Command::AttentionList(_params) => {
            let control = shared.control.lock().await;
            let sessions = control.registry.attention_queue();
            Ok(json!({ "sessions": sessions }))
        }
        Command::StreamSubscribe { filter, after_cursor } => {
            stream_subscribe(shared, conn, filter, after_cursor).await
        }
        Command::StreamUnsubscribe { subscription_id } => {
            let mut control = shared.control.lock().await;
            control.journal.unsubscribe(&subscription_id);
            conn.subscriptions.lock().remove(&subscription_id);
            Ok(json!({}))
        }
        Command::DirectoryUpsert { directory } => {
            require_id(&directory.id)?;
            let stored = shared.store.upsert_directory(directory).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&stored.scope, Some(&stored.id), None),
                ObservedPayload::DirectoryUpserted { directory: stored.clone() },
            );
            Ok(json!({ "directory": stored }))
        }
        Command::DirectoryGet { directory_id } => {
            let directory = shared
                .store
                .get_directory(&directory_id)
                .await?
                .ok_or_else(|| not_found("directory", &directory_id))?;
            Ok(json!({ "directory": directory }))
        }
        Command::DirectoryList(params) => {
            let directories = shared.store.list_directories(&params).await?;
            Ok(json!({ "directories": directories }))
        }
        Command::DirectoryArchive { directory_id } => {
            let directory = shared
                .store
                .archive_directory(&directory_id)
                .await?
                .ok_or_else(|| not_found("directory", &directory_id))?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&directory.scope, Some(&directory.id), None),
                ObservedPayload::DirectoryArchived { directory: directory.clone() },
            );
            Ok(json!({ "directory": directory }))
        }
        Command::DirectoryDelete { directory_id } => {
            if !shared.store.delete_directory(&directory_id).await? {
                return Err(not_found("directory", &directory_id));
            }
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope { directory_id: Some(directory_id.clone()), ..Default::default() },
                ObservedPayload::DirectoryDeleted { directory_id },
            );
            Ok(json!({}))
        }
        Command::ConversationUpsert { conversation } => {
            require_id(&conversation.id)?;
            let stored = shared.store.upsert_conversation(conversation).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&stored.scope, stored.directory_id.as_deref(), Some(&stored.id)),
                ObservedPayload::ConversationUpserted { conversation: stored.clone() },
            );
            Ok(json!({ "conversation": stored }))
        }
        Command::ConversationGet { conversation_id } => {
            let conversation = shared
                .store
                .get_conversation(&conversation_id)
                .await?
                .ok_or_else(|| not_found("conversation", &conversation_id))?;
            Ok(json!({ "conversation": conversation }))
        }
        Command::ConversationList(params) => {
            let conversations = shared.store.list_conversations(&params).await?;
            Ok(json!({ "conversations": conversations }))
        }
        Command::ConversationArchive { conversation_id } => {
            let conversation = shared
                .store
                .archive_conversation(&conversation_id)
                .await?
                .ok_or_else(|| not_found("conversation", &conversation_id))?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(
                    &conversation.scope,
                    conversation.directory_id.as_deref(),
                    Some(&conversation.id),
                ),
                ObservedPayload::ConversationArchived { conversation: conversation.clone() },
            );
            Ok(json!({ "conversation": conversation }))
        }
        Command::ConversationDelete { conversation_id } => {
            if !shared.store.delete_conversation(&conversation_id).await? {
                return Err(not_found("conversation", &conversation_id));
            }
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope { conversation_id: Some(conversation_id.clone()), ..Default::default() },
                ObservedPayload::ConversationDeleted { conversation_id },
            );
            Ok(json!({}))
        }
        Command::RepositoryUpsert { repository } => {
            require_id(&repository.id)?;
            let stored = shared.store.upsert_repository(repository).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&stored.scope, None, None),
                ObservedPayload::RepositoryUpserted { repository: stored.clone() },
            );
            Ok(json!({ "repository": stored }))
        }
        Command::RepositoryGet { repository_id } => {
            let repository = shared
                .store
                .get_repository(&repository_id)
                .await?
                .ok_or_else(|| not_found("repository", &repository_id))?;
            Ok(json!({ "repository": repository }))
        }
        Command::RepositoryList(params) => {
            let repositories = shared.store.list_repositories(&params).await?;
            Ok(json!({ "repositories": repositories }))
        }
        Command::RepositoryArchive { repository_id } => {
            let repository = shared
                .store
                .archive_repository(&repository_id)
                .await?
                .ok_or_else(|| not_found("repository", &repository_id))?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&repository.scope, None, None),
                ObservedPayload::RepositoryArchived { repository: repository.clone() },
            );
            Ok(json!({ "repository": repository }))
        }
        Command::RepositoryDelete { repository_id } => {
            if !shared.store.delete_repository(&repository_id).await? {
                return Err(not_found("repository", &repository_id));
            }
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope::default(),
                ObservedPayload::RepositoryDeleted { repository_id },
            );
            Ok(json!({}))
        }
        Command::RepositoryGitUpdated { repository_id, git } => {
            let repository = shared
                .store
                .update_repository_git(&repository_id, git)
                .await?
                .ok_or_else(|| not_found("repository", &repository_id))?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&repository.scope, None, None),
                ObservedPayload::RepositoryGitUpdated { repository: repository.clone() },
            );
            Ok(json!({ "repository": repository }))
        }
        Command::TaskUpsert { task } => {
            require_id(&task.id)?;
            let stored = shared.store.upsert_task(task).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&stored.scope, stored.directory_id.as_deref(), None),
                ObservedPayload::TaskUpserted { task: stored.clone() },
            );
            Ok(json!({ "task": stored }))
        }
        Command::TaskGet { task_id } => {
            let task = shared
                .store
                .get_task(&task_id)
                .await?
                .ok_or_else(|| not_found("task", &task_id))?;
            Ok(json!({ "task": task }))
        }
        Command::TaskList(params) => {
            let tasks = shared.store.list_tasks(&params).await?;
            Ok(json!({ "tasks": tasks }))
        }
        Command::TaskArchive { task_id } => {
            let task = shared
                .store
                .archive_task(&task_id)
                .await?
                .ok_or_else(|| not_found("task", &task_id))?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                record_scope(&task.scope, task.directory_id.as_deref(), None),
                ObservedPayload::TaskArchived { task: task.clone() },
            );
            Ok(json!({ "task": task }))
        }
        Command::TaskDelete { task_id } => {
            if !shared.store.delete_task(&task_id).await? {
                return Err(not_found("task", &task_id));
            }
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope::default(),
                ObservedPayload::TaskDeleted { task_id },
            );
            Ok(json!({}))
        }
        Command::TaskReorder { task_ids } => {
            let tasks = shared.store.reorder_tasks(&task_ids).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope::default(),
                ObservedPayload::TaskReordered { tasks: tasks.clone() },
            );
            Ok(json!({ "tasks": tasks }))
        }
        Command::GithubPrUpsert { pull_request } => {
            require_id(&pull_request.id)?;
            let stored = shared.store.upsert_pull_request(pull_request).await?;
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope::default(),
                ObservedPayload::GithubPrUpserted { pull_request: stored.clone() },
            );
            Ok(json!({ "pullRequest": stored }))
        }
        Command::GithubPrGet { pull_request_id } => {
            let pull_request = shared
                .store
                .get_pull_request(&pull_request_id)
                .await?
                .ok_or_else(|| not_found("pull request", &pull_request_id))?;
            Ok(json!({ "pullRequest": pull_request }))
        }
        Command::GithubPrList { repository_id } => {
            let pull_requests =
                shared.store.list_pull_requests(repository_id.as_deref()).await?;
            Ok(json!({ "pullRequests": pull_requests }))
        }
        Command::GithubPrDelete { pull_request_id } => {
            if !shared.store.delete_pull_request(&pull_request_id).await? {
                return Err(not_found("pull request", &pull_request_id));
            }
            let mut control = shared.control.lock().await;
            Shared::publish(
                &mut control,
                EventScope::default(),
                ObservedPayload::GithubPrDeleted { pull_request_id },
            );
            Ok(json!({}))
        }
    }
}

fn auth(shared: &Arc<Shared>, conn: &Arc<ConnHandle>, token: &str) -> CommandResult {
    match shared.config.auth_token {
        Some(ref expected) if expected != token => {
            Err(CommandError::authentication_failed("invalid token"))
        }
        _ => {
            conn.set_authenticated();
            Ok(json!({}))
        }
    }
}

fn not_found(kind: &str, id: &str) -> CommandError {
    CommandError::not_found(format!("no such {kind}: {id}"))
}

fn require_id(id: &str) -> Result<(), CommandError> {
    if id.trim().is_empty() {
        return Err(CommandError::invalid_argument("id must not be empty"));
    }
    Ok(())
}

fn record_scope(
    scope: &Scope,
    directory_id: Option<&str>,
    conversation_id: Option<&str>,
) -> EventScope {
    EventScope {
        scope: scope.clone(),
        directory_id: directory_id.map(str::to_owned),
        conversation_id: conversation_id.map(str::to_owned),
    }
}

fn session_scope(entry: &SessionEntry) -> EventScope {
    EventScope {
        scope: entry.scope.clone(),
        directory_id: entry.directory_id.clone(),
        conversation_id: entry.conversation_id.clone(),
    }
}

async fn require_live(
    shared: &Arc<Shared>,
    session_id: &str,
) -> Result<Arc<LiveSession>, CommandError> {
    let control = shared.control.lock().await;
    let entry = control
        .registry
        .get(session_id)
        .ok_or_else(|| not_found("session", session_id))?;
    entry
        .live
        .clone()
        .ok_or_else(|| CommandError::precondition_failed("session is not live"))
}

async fn pty_start(shared: &Arc<Shared>, params: PtyStartParams) -> CommandResult {
    if params.initial_cols == 0 || params.initial_rows == 0 {
        return Err(CommandError::invalid_argument("initialCols and initialRows must be positive"));
    }
    if params.session_id.trim().is_empty() {
        return Err(CommandError::invalid_argument("sessionId must not be empty"));
    }
    if params.command.is_empty() {
        return Err(CommandError::invalid_argument("command must not be empty"));
    }

    let mut control = shared.control.lock().await;
    if control.registry.contains_live(&params.session_id) {
        return Err(CommandError::already_exists(format!(
            "session already live: {}",
            params.session_id
        )));
    }
    // A tombstoned id may be reused; the old entry is replaced.
    shared.destroy_session(&mut control, &params.session_id);

    let notify_path = params
        .notify_path
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| shared.config.notify_path_for(&params.session_id));

    let spawn = SessionSpawn {
        session_id: params.session_id.clone(),
        helper: crate::pty::resolve_helper(shared.config.pty_helper.as_deref()),
        command: params.command.clone(),
        cwd: params.cwd.as_ref().map(std::path::PathBuf::from),
        env: params.env.clone().unwrap_or_default(),
        cols: params.initial_cols,
        rows: params.initial_rows,
        notify_path,
        ingest_snapshots: params.ingest_snapshots,
        scrollback_limit: shared.config.scrollback_limit,
        replay_chunks: shared.config.replay_chunks,
        notify_poll_interval: shared.config.notify_poll_interval,
        responder: crate::query::QueryResponder::new(
            shared.config.responder_colors.with_env_overrides(),
        ),
    };
    let live = LiveSession::spawn(spawn)
        .await
        .map_err(|e| CommandError::internal(format!("spawn failed: {e:#}")))?;

    let mut entry = SessionEntry::new(params.session_id.clone(), params.scope.clone(), live.clone());
    entry.directory_id = params.directory_id.clone();
    entry.conversation_id = params.conversation_id.clone();

    // Restore the persisted needs-input state for this id, if any.
    if let Ok(persisted) = shared.store.load_session_statuses().await {
        if let Some(previous) =
            persisted.into_iter().find(|p| p.session_id == params.session_id)
        {
            if previous.status == SessionStatus::NeedsInput {
                entry.status = SessionStatus::NeedsInput;
                entry.attention_reason = previous.attention_reason;
                entry.attention_at = Some(now_ms());
            }
        }
    }

    // Route broker events onto the control plane.
    let events = shared.session_events.clone();
    let session_id = params.session_id.clone();
    let listener = live.on_event(move |event| {
        let _ = events.send(SessionEventMsg {
            session_id: session_id.clone(),
            event: event.clone(),
        });
    });
    entry.event_listener = Some(listener);

    let started_at = entry.started_at;
    let status = entry.status;
    let attention = entry.attention_reason;
    let scope = session_scope(&entry);
    control.registry.insert(entry);
    Shared::publish(
        &mut control,
        scope,
        ObservedPayload::SessionStatus {
            session_id: params.session_id.clone(),
            status,
            attention_reason: attention,
            live: true,
        },
    );
    if let Some(entry) = control.registry.get(&params.session_id) {
        shared.persist_status(entry).await;
    }
    debug!(session = %params.session_id, "session started");
    Ok(json!({ "sessionId": params.session_id, "startedAt": started_at }))
}

async fn pty_attach(
    shared: &Arc<Shared>,
    conn: &Arc<ConnHandle>,
    session_id: &str,
    since_cursor: u64,
) -> CommandResult {
    let control = shared.control.lock().await;
    let entry = control
        .registry
        .get(session_id)
        .ok_or_else(|| not_found("session", session_id))?;
    let live = entry
        .live
        .clone()
        .ok_or_else(|| CommandError::precondition_failed("session is not live"))?;

    // Re-attaching from the same connection is idempotent.
    if conn.attached.lock().contains_key(session_id) {
        return Ok(json!({ "latestCursor": live.latest_cursor() }));
    }

    let push_conn = Arc::clone(conn);
    let data_session = session_id.to_owned();
    let attachment_id = live.attach(
        AttachHandlers {
            on_data: Box::new(move |cursor, chunk| {
                push_conn.push(&ServerEnvelope::PtyOutput {
                    session_id: data_session.clone(),
                    chunk_base64: crate::protocol::encode_base64(chunk),
                    cursor,
                });
            }),
            // Exit envelopes fan out centrally from the event pump.
            on_exit: Box::new(|_| {}),
        },
        since_cursor,
    );
    conn.attached.lock().insert(session_id.to_owned(), attachment_id);
    Ok(json!({ "latestCursor": live.latest_cursor() }))
}

async fn pty_detach(shared: &Arc<Shared>, conn: &Arc<ConnHandle>, session_id: &str) -> CommandResult {
    let attachment = conn.attached.lock().remove(session_id);
    if let Some(attachment_id) = attachment {
        let control = shared.control.lock().await;
        if let Some(live) = control.registry.get(session_id).and_then(|e| e.live.clone()) {
            live.detach(attachment_id);
        }
    }
    Ok(json!({}))
}

async fn pty_close(shared: &Arc<Shared>, session_id: &str) -> CommandResult {
    let live = require_live(shared, session_id).await?;
    // Close without the control lock; the exit event drives the
    // tombstone through the pump.
    let exit = live.close().await;
    Ok(json!({ "exit": exit }))
}

async fn session_list(shared: &Arc<Shared>, params: &SessionListParams) -> CommandResult {
    let control = shared.control.lock().await;
    let sessions = control.registry.list(params);
    Ok(json!({ "sessions": sessions }))
}

async fn session_snapshot(
    shared: &Arc<Shared>,
    session_id: &str,
    include_hash: bool,
) -> CommandResult {
    let live = require_live(shared, session_id).await?;
    let frame = live
        .snapshot(include_hash)
        .await
        .ok_or_else(|| CommandError::precondition_failed("snapshot ingest is disabled"))?;
    Ok(json!({ "frame": frame }))
}

async fn session_respond(
    shared: &Arc<Shared>,
    session_id: &str,
    text: &str,
    submit: bool,
    controller_id: Option<&str>,
) -> CommandResult {
    let mut data = text.as_bytes().to_vec();
    if submit {
        data.push(b'\r');
    }

    let (live, status_changed) = {
        let mut control = shared.control.lock().await;
        let entry = control
            .registry
            .get_mut(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        if let Some(ref controller) = entry.controller {
            if controller_id != Some(controller.controller_id.as_str()) {
                return Err(CommandError::precondition_failed(format!(
                    "session is claimed by {}",
                    controller.controller_label
                )));
            }
        }
        let live = entry
            .live
            .clone()
            .ok_or_else(|| CommandError::precondition_failed("session is not live"))?;
        let changed = entry.apply_input(&data);
        if changed {
            let scope = session_scope(entry);
            let payload = ObservedPayload::SessionStatus {
                session_id: session_id.to_owned(),
                status: entry.status,
                attention_reason: entry.attention_reason,
                live: true,
            };
            Shared::publish(&mut control, scope, payload);
        }
        (live, changed)
    };

    live.write(Bytes::from(data))
        .await
        .map_err(|e| CommandError::internal(e.to_string()))?;

    if status_changed {
        let control = shared.control.lock().await;
        if let Some(entry) = control.registry.get(session_id) {
            shared.persist_status(entry).await;
        }
    }
    Ok(json!({}))
}

async fn session_claim(
    shared: &Arc<Shared>,
    session_id: &str,
    params: crate::protocol::ControllerParams,
    takeover: bool,
) -> CommandResult {
    let controller = {
        let mut control = shared.control.lock().await;
        let entry = control
            .registry
            .get_mut(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        if let Some(ref current) = entry.controller {
            if !takeover {
                return Err(CommandError::precondition_failed(format!(
                    "session is claimed by {}",
                    current.controller_label
                )));
            }
        }
        let previous = entry.controller.take();
        let controller = Controller {
            controller_id: params.controller_id,
            controller_type: params.controller_type,
            controller_label: params.controller_label,
            claimed_at: now_ms(),
        };
        entry.controller = Some(controller.clone());
        let scope = session_scope(entry);
        Shared::publish(
            &mut control,
            scope,
            ObservedPayload::SessionControl {
                session_id: session_id.to_owned(),
                controller: Some(controller.clone()),
                previous,
            },
        );
        if let Some(entry) = control.registry.get(session_id) {
            shared.persist_status(entry).await;
        }
        controller
    };
    Ok(json!({ "controller": controller }))
}

async fn session_release(shared: &Arc<Shared>, session_id: &str) -> CommandResult {
    let mut control = shared.control.lock().await;
    let entry = control
        .registry
        .get_mut(session_id)
        .ok_or_else(|| not_found("session", session_id))?;
    let previous = entry.controller.take();
    let scope = session_scope(entry);
    Shared::publish(
        &mut control,
        scope,
        ObservedPayload::SessionControl {
            session_id: session_id.to_owned(),
            controller: None,
            previous,
        },
    );
    if let Some(entry) = control.registry.get(session_id) {
        shared.persist_status(entry).await;
    }
    Ok(json!({}))
}

async fn session_remove(shared: &Arc<Shared>, session_id: &str) -> CommandResult {
    let live = {
        let mut control = shared.control.lock().await;
        let entry = control
            .registry
            .get(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        let live = entry.live.clone();
        shared.destroy_session(&mut control, session_id);
        live
    };
    if let Some(live) = live {
        let _ = live.close().await;
    }
    let _ = shared.store.delete_session_status(session_id).await;
    Ok(json!({}))
}

#[allow(clippy::too_many_arguments)]
async fn session_telemetry(
    shared: &Arc<Shared>,
    session_id: &str,
    event_name: &str,
    status_hint: Option<crate::status::StatusHint>,
    summary: Option<String>,
    observed_at: Option<u64>,
    heartbeat_only: bool,
    attention_reason: Option<crate::status::AttentionReason>,
) -> CommandResult {
    let changed = {
        let mut control = shared.control.lock().await;
        let entry = control
            .registry
            .get_mut(session_id)
            .ok_or_else(|| not_found("session", session_id))?;
        let changed = entry.apply_telemetry(
            event_name,
            status_hint,
            summary.clone(),
            observed_at,
            heartbeat_only,
            attention_reason,
        );
        let scope = session_scope(entry);
        let status = entry.status;
        let attention = entry.attention_reason;
        let live = entry.is_live();
        Shared::publish(
            &mut control,
            scope.clone(),
            ObservedPayload::SessionTelemetry {
                session_id: session_id.to_owned(),
                event_name: event_name.to_owned(),
                status_hint,
                summary,
            },
        );
        if changed {
            Shared::publish(
                &mut control,
                scope,
                ObservedPayload::SessionStatus {
                    session_id: session_id.to_owned(),
                    status,
                    attention_reason: attention,
                    live,
                },
            );
            if let Some(entry) = control.registry.get(session_id) {
                shared.persist_status(entry).await;
            }
        }
        changed
    };
    Ok(json!({ "statusChanged": changed }))
}

async fn stream_subscribe(
    shared: &Arc<Shared>,
    conn: &Arc<ConnHandle>,
    filter: StreamFilter,
    after_cursor: Option<u64>,
) -> CommandResult {
    // Empty-string scope values are never valid identifiers.
    let fields = [
        &filter.tenant_id,
        &filter.user_id,
        &filter.workspace_id,
        &filter.directory_id,
        &filter.conversation_id,
    ];
    if fields.iter().any(|f| f.as_deref() == Some("")) {
        return Err(CommandError::invalid_argument("subscription scope fields must be non-empty"));
    }

    let subscription_id = Uuid::new_v4().to_string();
    let sink_conn = Arc::clone(conn);
    let mut control = shared.control.lock().await;
    let cursor = control.journal.subscribe(
        subscription_id.clone(),
        conn.id,
        filter,
        after_cursor,
        Arc::new(move |sub_id: &str, cursor: u64, event: &crate::protocol::ObservedEvent| {
            sink_conn.push(&ServerEnvelope::StreamEvent {
                subscription_id: sub_id.to_owned(),
                cursor,
                event: event.clone(),
            });
        }),
    );
    conn.subscriptions.lock().insert(subscription_id.clone());
    Ok(json!({ "subscriptionId": subscription_id, "cursor": cursor }))
}
