// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State store: one SQLite file holding the canonical JSON for every
//! record, with scope and ordering columns mirrored out as secondary
//! indices. Schema is opaque to clients; migrations run at open.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::protocol::{now_ms, ListParams};
use crate::records::{
    merge_adapter_state, Conversation, Directory, PersistedSessionStatus, PullRequest,
    Repository, Scope, TaskRecord,
};

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS records (
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        tenant_id TEXT,
        user_id TEXT,
        workspace_id TEXT,
        worktree_id TEXT,
        parent_id TEXT,
        order_index INTEGER NOT NULL DEFAULT 0,
        archived_at INTEGER,
        data TEXT NOT NULL,
        PRIMARY KEY (kind, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_records_scope
        ON records (kind, tenant_id, user_id, workspace_id, worktree_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_parent ON records (kind, parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_order ON records (kind, order_index)",
    "CREATE TABLE IF NOT EXISTS session_status (
        session_id TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
];

const KIND_DIRECTORY: &str = "directory";
const KIND_CONVERSATION: &str = "conversation";
const KIND_REPOSITORY: &str = "repository";
const KIND_TASK: &str = "task";
const KIND_PULL_REQUEST: &str = "pull_request";

/// Secondary-index columns mirrored out of a record's JSON.
struct RowMeta {
    scope: Scope,
    parent_id: Option<String>,
    order_index: i64,
    archived_at: Option<u64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state dir {}", parent.display()))?;
            }
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        info!(path = %path.display(), "opening state store");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .with_context(|| format!("open state store {}", path.display()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory store")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await.context("migration")?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -- Generic row helpers --------------------------------------------------

    async fn put_row<T: Serialize>(
        &self,
        kind: &str,
        id: &str,
        meta: &RowMeta,
        record: &T,
    ) -> Result<()> {
        let data = serde_json::to_string(record).context("serialize record")?;
        sqlx::query(
            "INSERT INTO records
                (kind, id, tenant_id, user_id, workspace_id, worktree_id,
                 parent_id, order_index, archived_at, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (kind, id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                user_id = excluded.user_id,
                workspace_id = excluded.workspace_id,
                worktree_id = excluded.worktree_id,
                parent_id = excluded.parent_id,
                order_index = excluded.order_index,
                archived_at = excluded.archived_at,
                data = excluded.data",
        )
        .bind(kind)
        .bind(id)
        .bind(&meta.scope.tenant_id)
        .bind(&meta.scope.user_id)
        .bind(&meta.scope.workspace_id)
        .bind(&meta.scope.worktree_id)
        .bind(&meta.parent_id)
        .bind(meta.order_index)
        .bind(meta.archived_at.map(|v| v as i64))
        .bind(data)
        .execute(&self.pool)
        .await
        .context("upsert record")?;
        Ok(())
    }

    async fn get_row<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT data FROM records WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get record")?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data").context("data column")?;
                Ok(Some(serde_json::from_str(&data).context("parse record")?))
            }
            None => Ok(None),
        }
    }

    async fn list_rows<T: DeserializeOwned>(
        &self,
        kind: &str,
        filter: &ListParams,
        parent_id: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut sql = String::from("SELECT data FROM records WHERE kind = ?");
        if filter.tenant_id.is_some() {
            sql.push_str(" AND tenant_id = ?");
        }
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.workspace_id.is_some() {
            sql.push_str(" AND workspace_id = ?");
        }
        if filter.worktree_id.is_some() {
            sql.push_str(" AND worktree_id = ?");
        }
        if parent_id.is_some() {
            sql.push_str(" AND parent_id = ?");
        }
        if !filter.include_archived {
            sql.push_str(" AND archived_at IS NULL");
        }
        sql.push_str(" ORDER BY order_index ASC, id ASC");

        let mut query = sqlx::query(&sql).bind(kind);
        if let Some(ref v) = filter.tenant_id {
            query = query.bind(v);
        }
        if let Some(ref v) = filter.user_id {
            query = query.bind(v);
        }
        if let Some(ref v) = filter.workspace_id {
            query = query.bind(v);
        }
        if let Some(ref v) = filter.worktree_id {
            query = query.bind(v);
        }
        if let Some(v) = parent_id {
            query = query.bind(v);
        }

        let rows = query.fetch_all(&self.pool).await.context("list records")?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get("data").context("data column")?;
            records.push(serde_json::from_str(&data).context("parse record")?);
        }
        Ok(records)
    }

    async fn delete_row(&self, kind: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete record")?;
        Ok(result.rows_affected() > 0)
    }

    // -- Directories ----------------------------------------------------------

    pub async fn upsert_directory(&self, mut directory: Directory) -> Result<Directory> {
        let now = now_ms();
        if let Some(existing) = self.get_directory(&directory.id).await? {
            directory.created_at = existing.created_at;
            directory.archived_at = existing.archived_at;
        } else {
            directory.created_at = now;
        }
        directory.updated_at = now;
        let meta = RowMeta {
            scope: directory.scope.clone(),
            parent_id: None,
            order_index: 0,
            archived_at: directory.archived_at,
        };
        self.put_row(KIND_DIRECTORY, &directory.id, &meta, &directory).await?;
        Ok(directory)
    }

    pub async fn get_directory(&self, id: &str) -> Result<Option<Directory>> {
        self.get_row(KIND_DIRECTORY, id).await
    }

    pub async fn list_directories(&self, filter: &ListParams) -> Result<Vec<Directory>> {
        self.list_rows(KIND_DIRECTORY, filter, None).await
    }

    pub async fn archive_directory(&self, id: &str) -> Result<Option<Directory>> {
        let Some(mut directory) = self.get_directory(id).await? else {
            return Ok(None);
        };
        if directory.archived_at.is_none() {
            directory.archived_at = Some(now_ms());
            directory.updated_at = now_ms();
            let meta = RowMeta {
                scope: directory.scope.clone(),
                parent_id: None,
                order_index: 0,
                archived_at: directory.archived_at,
            };
            self.put_row(KIND_DIRECTORY, id, &meta, &directory).await?;
        }
        Ok(Some(directory))
    }

    pub async fn delete_directory(&self, id: &str) -> Result<bool> {
        self.delete_row(KIND_DIRECTORY, id).await
    }

    // -- Conversations --------------------------------------------------------

    /// Upsert a conversation. `adapter_state` merges shallowly per
    /// top-level key into any existing state.
    pub async fn upsert_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        let now = now_ms();
        if let Some(existing) = self.get_conversation(&conversation.id).await? {
            conversation.created_at = existing.created_at;
            conversation.archived_at = existing.archived_at;
            let mut state = existing.adapter_state;
            merge_adapter_state(&mut state, std::mem::take(&mut conversation.adapter_state));
            conversation.adapter_state = state;
        } else {
            conversation.created_at = now;
        }
        conversation.updated_at = now;
        let meta = RowMeta {
            scope: conversation.scope.clone(),
            parent_id: conversation.directory_id.clone(),
            order_index: 0,
            archived_at: conversation.archived_at,
        };
        self.put_row(KIND_CONVERSATION, &conversation.id, &meta, &conversation).await?;
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.get_row(KIND_CONVERSATION, id).await
    }

    pub async fn list_conversations(&self, filter: &ListParams) -> Result<Vec<Conversation>> {
        self.list_rows(KIND_CONVERSATION, filter, None).await
    }

    pub async fn archive_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let Some(mut conversation) = self.get_conversation(id).await? else {
            return Ok(None);
        };
        if conversation.archived_at.is_none() {
            conversation.archived_at = Some(now_ms());
            conversation.updated_at = now_ms();
            let meta = RowMeta {
                scope: conversation.scope.clone(),
                parent_id: conversation.directory_id.clone(),
                order_index: 0,
                archived_at: conversation.archived_at,
            };
            self.put_row(KIND_CONVERSATION, id, &meta, &conversation).await?;
        }
        Ok(Some(conversation))
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.delete_row(KIND_CONVERSATION, id).await
    }

    // -- Repositories ---------------------------------------------------------

    pub async fn upsert_repository(&self, mut repository: Repository) -> Result<Repository> {
        let now = now_ms();
        if let Some(existing) = self.get_repository(&repository.id).await? {
            repository.created_at = existing.created_at;
            repository.archived_at = existing.archived_at;
        } else {
            repository.created_at = now;
        }
        repository.updated_at = now;
        let meta = RowMeta {
            scope: repository.scope.clone(),
            parent_id: None,
            order_index: repository.metadata.home_priority,
            archived_at: repository.archived_at,
        };
        self.put_row(KIND_REPOSITORY, &repository.id, &meta, &repository).await?;
        Ok(repository)
    }

    pub async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        self.get_row(KIND_REPOSITORY, id).await
    }

    pub async fn list_repositories(&self, filter: &ListParams) -> Result<Vec<Repository>> {
        self.list_rows(KIND_REPOSITORY, filter, None).await
    }

    pub async fn archive_repository(&self, id: &str) -> Result<Option<Repository>> {
        let Some(mut repository) = self.get_repository(id).await? else {
            return Ok(None);
        };
        if repository.archived_at.is_none() {
            repository.archived_at = Some(now_ms());
            repository.updated_at = now_ms();
            let meta = RowMeta {
                scope: repository.scope.clone(),
                parent_id: None,
                order_index: repository.metadata.home_priority,
                archived_at: repository.archived_at,
            };
            self.put_row(KIND_REPOSITORY, id, &meta, &repository).await?;
        }
        Ok(Some(repository))
    }

    pub async fn delete_repository(&self, id: &str) -> Result<bool> {
        self.delete_row(KIND_REPOSITORY, id).await
    }

    /// Update only the git metadata on a repository.
    pub async fn update_repository_git(
        &self,
        id: &str,
        git: crate::records::GitStatus,
    ) -> Result<Option<Repository>> {
        let Some(mut repository) = self.get_repository(id).await? else {
            return Ok(None);
        };
        repository.git = Some(git);
        repository.updated_at = now_ms();
        let meta = RowMeta {
            scope: repository.scope.clone(),
            parent_id: None,
            order_index: repository.metadata.home_priority,
            archived_at: repository.archived_at,
        };
        self.put_row(KIND_REPOSITORY, id, &meta, &repository).await?;
        Ok(Some(repository))
    }

    // -- Tasks ----------------------------------------------------------------

    pub async fn upsert_task(&self, mut task: TaskRecord) -> Result<TaskRecord> {
        let now = now_ms();
        if let Some(existing) = self.get_task(&task.id).await? {
            task.created_at = existing.created_at;
            task.archived_at = existing.archived_at;
        } else {
            task.created_at = now;
        }
        task.updated_at = now;
        let meta = RowMeta {
            scope: task.scope.clone(),
            parent_id: task.directory_id.clone(),
            order_index: task.order_index,
            archived_at: task.archived_at,
        };
        self.put_row(KIND_TASK, &task.id, &meta, &task).await?;
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.get_row(KIND_TASK, id).await
    }

    pub async fn list_tasks(&self, filter: &ListParams) -> Result<Vec<TaskRecord>> {
        self.list_rows(KIND_TASK, filter, None).await
    }

    pub async fn archive_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let Some(mut task) = self.get_task(id).await? else {
            return Ok(None);
        };
        if task.archived_at.is_none() {
            task.archived_at = Some(now_ms());
            task.updated_at = now_ms();
            let meta = RowMeta {
                scope: task.scope.clone(),
                parent_id: task.directory_id.clone(),
                order_index: task.order_index,
                archived_at: task.archived_at,
            };
            self.put_row(KIND_TASK, id, &meta, &task).await?;
        }
        Ok(Some(task))
    }

    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        self.delete_row(KIND_TASK, id).await
    }

    /// Assign `order_index` by position. Unknown ids are skipped; the
    /// updated tasks come back in the new order.
    pub async fn reorder_tasks(&self, task_ids: &[String]) -> Result<Vec<TaskRecord>> {
        let mut updated = Vec::new();
        for (position, id) in task_ids.iter().enumerate() {
            let Some(mut task) = self.get_task(id).await? else {
                continue;
            };
            task.order_index = position as i64;
            task.updated_at = now_ms();
            let meta = RowMeta {
                scope: task.scope.clone(),
                parent_id: task.directory_id.clone(),
                order_index: task.order_index,
                archived_at: task.archived_at,
            };
            self.put_row(KIND_TASK, id, &meta, &task).await?;
            updated.push(task);
        }
        Ok(updated)
    }

    // -- Pull requests --------------------------------------------------------

    pub async fn upsert_pull_request(&self, mut pr: PullRequest) -> Result<PullRequest> {
        let now = now_ms();
        if let Some(existing) = self.get_pull_request(&pr.id).await? {
            pr.created_at = existing.created_at;
        } else {
            pr.created_at = now;
        }
        pr.updated_at = now;
        let meta = RowMeta {
            scope: Scope::default(),
            parent_id: Some(pr.repository_id.clone()),
            order_index: pr.number,
            archived_at: pr.archived_at,
        };
        self.put_row(KIND_PULL_REQUEST, &pr.id, &meta, &pr).await?;
        Ok(pr)
    }

    pub async fn get_pull_request(&self, id: &str) -> Result<Option<PullRequest>> {
        self.get_row(KIND_PULL_REQUEST, id).await
    }

    pub async fn list_pull_requests(
        &self,
        repository_id: Option<&str>,
    ) -> Result<Vec<PullRequest>> {
        self.list_rows(KIND_PULL_REQUEST, &ListParams::default(), repository_id).await
    }

    pub async fn delete_pull_request(&self, id: &str) -> Result<bool> {
        self.delete_row(KIND_PULL_REQUEST, id).await
    }

    // -- Session status -------------------------------------------------------

    /// Persist last-known session status so restarts restore
    /// `needs-input` tombstones.
    pub async fn save_session_status(&self, status: &PersistedSessionStatus) -> Result<()> {
        let data = serde_json::to_string(status).context("serialize session status")?;
        sqlx::query(
            "INSERT INTO session_status (session_id, data, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (session_id) DO UPDATE SET
                data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(&status.session_id)
        .bind(data)
        .bind(status.updated_at as i64)
        .execute(&self.pool)
        .await
        .context("save session status")?;
        Ok(())
    }

    pub async fn load_session_statuses(&self) -> Result<Vec<PersistedSessionStatus>> {
        let rows = sqlx::query("SELECT data FROM session_status")
            .fetch_all(&self.pool)
            .await
            .context("load session statuses")?;
        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get("data").context("data column")?;
            statuses.push(serde_json::from_str(&data).context("parse session status")?);
        }
        Ok(statuses)
    }

    pub async fn delete_session_status(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_status WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("delete session status")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
