// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use parley_model::{ToolCallData, ToolResultData, Usage};

use crate::settings;
use crate::types::{
    ApprovalStatus, MessagePage, MessagePatch, MessageRecord, MessageRole, NewMessage,
    SearchResult, SessionPatch, SessionRecord, SessionView,
};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    model         TEXT NOT NULL DEFAULT '',
    vision_model  TEXT NOT NULL DEFAULT '',
    auto_approve  INTEGER NOT NULL DEFAULT 0,
    input_tokens  INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY,
    session_id      TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL DEFAULT '',
    images          TEXT,
    model           TEXT,
    timestamp       INTEGER NOT NULL,
    tool_calls      TEXT,
    tool_results    TEXT,
    approval_status TEXT,
    verbatim_count  INTEGER,
    token_count     INTEGER,
    raw_token_count INTEGER,
    llm_request     TEXT,
    llm_response    TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages(session_id, timestamp);
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    content='messages',
    content_rowid='rowid'
);
CREATE TRIGGER IF NOT EXISTS messages_fts_insert AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_delete AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content)
        VALUES ('delete', old.rowid, old.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_update AFTER UPDATE OF content ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content)
        VALUES ('delete', old.rowid, old.content);
    INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
END;
";

/// Title given to sessions created without one; auto-titling replaces it
/// after the first completed turn.
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

const DEFAULT_PAGE_LIMIT: u32 = 30;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("invalid: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Internal(String),
}

/// Typed wrapper over the SQLite backing store.
///
/// One connection guarded by a mutex; every operation runs the closure on
/// the blocking pool so async callers never hold the lock across awaits.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    settings_cache: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_conn(conn))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_conn(conn))
    }

    fn from_conn(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            settings_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Internal("store mutex poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    // ─── Sessions ─────────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        title: Option<String>,
        model: Option<String>,
        vision_model: Option<String>,
    ) -> Result<SessionRecord, StoreError> {
        let now = now_ms();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            title: title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            model: model.unwrap_or_default(),
            vision_model: vision_model.unwrap_or_default(),
            auto_approve: false,
            token_usage: Usage::default(),
            created_at: now,
            updated_at: now,
        };
        let r = record.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, model, vision_model, auto_approve,
                                       input_tokens, output_tokens, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7)",
                params![
                    r.id,
                    r.title,
                    r.model,
                    r.vision_model,
                    r.auto_approve as i64,
                    r.created_at,
                    r.updated_at
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    /// The whole conversation in timestamp order, or `None`.
    ///
    /// A legacy session with an empty model field is lazily migrated to the
    /// `default_model` setting (when set) before being returned.
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionView>, StoreError> {
        let default_model = self.get_setting(settings::DEFAULT_MODEL).await?;
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let Some(mut session) = query_session(conn, &id)? else {
                return Ok(None);
            };
            if session.model.is_empty() {
                if let Some(model) = default_model.filter(|m| !m.is_empty()) {
                    debug!(session = %id, model = %model, "lazy-migrating legacy session model");
                    conn.execute(
                        "UPDATE sessions SET model = ?1 WHERE id = ?2",
                        params![model, id],
                    )?;
                    session.model = model;
                }
            }
            let messages = query_messages(conn, &id)?;
            Ok(Some(SessionView { session, messages }))
        })
        .await
    }

    pub async fn get_session_record(
        &self,
        id: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| query_session(conn, &id)).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, model, vision_model, auto_approve,
                        input_tokens, output_tokens, created_at, updated_at
                 FROM sessions ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await
    }

    pub async fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::ToSql + Send>> = Vec::new();
            if let Some(title) = patch.title {
                sets.push(format!("title = ?{}", args.len() + 1));
                args.push(Box::new(title));
            }
            if let Some(model) = patch.model {
                sets.push(format!("model = ?{}", args.len() + 1));
                args.push(Box::new(model));
            }
            if let Some(vm) = patch.vision_model {
                sets.push(format!("vision_model = ?{}", args.len() + 1));
                args.push(Box::new(vm));
            }
            if let Some(aa) = patch.auto_approve {
                sets.push(format!("auto_approve = ?{}", args.len() + 1));
                args.push(Box::new(aa as i64));
            }
            if sets.is_empty() {
                return Ok(());
            }
            sets.push(format!("updated_at = ?{}", args.len() + 1));
            args.push(Box::new(now_ms()));
            let sql = format!(
                "UPDATE sessions SET {} WHERE id = ?{}",
                sets.join(", "),
                args.len() + 1
            );
            args.push(Box::new(id));
            let params: Vec<&dyn rusqlite::ToSql> =
                args.iter().map(|b| b.as_ref() as &dyn rusqlite::ToSql).collect();
            let changed = conn.execute(&sql, params.as_slice())?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Overwrite the session's rolling token accumulator.
    pub async fn update_session_token_usage(
        &self,
        id: &str,
        usage: Usage,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET input_tokens = ?1, output_tokens = ?2 WHERE id = ?3",
                params![usage.input_tokens as i64, usage.output_tokens as i64, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Delete a session; messages cascade.  Live side-effect resources
    /// (browser session, latest image) are the caller's to release.
    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    // ─── Messages ─────────────────────────────────────────────────────────────

    /// Append a message and bump the session's `updated_at`.
    ///
    /// Timestamps are clamped to be weakly increasing within the session so
    /// retrieval order matches append order even across clock hiccups.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<MessageRecord, StoreError> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM sessions WHERE id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }
            let now = now_ms();
            let last: Option<i64> = conn
                .query_row(
                    "SELECT MAX(timestamp) FROM messages WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let timestamp = last.map_or(now, |l| now.max(l));

            let record = MessageRecord {
                id: message
                    .id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                session_id: session_id.clone(),
                role: message.role,
                content: message.content,
                images: message.images,
                model: message.model,
                timestamp,
                tool_calls: message.tool_calls,
                tool_results: message.tool_results,
                approval_status: message.approval_status,
                verbatim_count: message.verbatim_count,
                token_count: message.token_count,
                raw_token_count: message.raw_token_count,
                llm_request: message.llm_request,
                llm_response: message.llm_response,
            };
            conn.execute(
                "INSERT INTO messages (id, session_id, role, content, images, model,
                                       timestamp, tool_calls, tool_results, approval_status,
                                       verbatim_count, token_count, raw_token_count,
                                       llm_request, llm_response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    record.session_id,
                    record.role.as_str(),
                    record.content,
                    json_list(&record.images)?,
                    record.model,
                    record.timestamp,
                    json_list(&record.tool_calls)?,
                    json_list(&record.tool_results)?,
                    record.approval_status.map(|s| s.as_str()),
                    record.verbatim_count,
                    record.token_count,
                    record.raw_token_count,
                    record.llm_request.as_ref().map(Value::to_string),
                    record.llm_response.as_ref().map(Value::to_string),
                ],
            )?;
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;
            Ok(record)
        })
        .await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            conn.query_row(
                &format!("{MESSAGE_SELECT} WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    /// Patch a subset of message fields; missing fields stay untouched.
    pub async fn update_message(
        &self,
        id: &str,
        patch: MessagePatch,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::ToSql + Send>> = Vec::new();
            if let Some(content) = patch.content {
                sets.push(format!("content = ?{}", args.len() + 1));
                args.push(Box::new(content));
            }
            if let Some(results) = patch.tool_results {
                sets.push(format!("tool_results = ?{}", args.len() + 1));
                args.push(Box::new(json_list(&results)?));
            }
            if let Some(status) = patch.approval_status {
                sets.push(format!("approval_status = ?{}", args.len() + 1));
                args.push(Box::new(status.as_str().to_string()));
            }
            if let Some(tc) = patch.token_count {
                sets.push(format!("token_count = ?{}", args.len() + 1));
                args.push(Box::new(tc));
            }
            if let Some(rtc) = patch.raw_token_count {
                sets.push(format!("raw_token_count = ?{}", args.len() + 1));
                args.push(Box::new(rtc));
            }
            if let Some(req) = patch.llm_request {
                sets.push(format!("llm_request = ?{}", args.len() + 1));
                args.push(Box::new(req.to_string()));
            }
            if let Some(resp) = patch.llm_response {
                sets.push(format!("llm_response = ?{}", args.len() + 1));
                args.push(Box::new(resp.to_string()));
            }
            if sets.is_empty() {
                return Ok(());
            }
            let sql = format!(
                "UPDATE messages SET {} WHERE id = ?{}",
                sets.join(", "),
                args.len() + 1
            );
            args.push(Box::new(id));
            let params: Vec<&dyn rusqlite::ToSql> =
                args.iter().map(|b| b.as_ref() as &dyn rusqlite::ToSql).collect();
            let changed = conn.execute(&sql, params.as_slice())?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Conditional approval: `pending → approved`.  Exactly one of any set
    /// of concurrent callers observes `true`; the rest observe `false`.
    pub async fn atomic_approve(&self, message_id: &str) -> Result<bool, StoreError> {
        self.atomic_transition(message_id, ApprovalStatus::Approved).await
    }

    /// Conditional denial: `pending → denied`, same exclusivity as
    /// [`Self::atomic_approve`].
    pub async fn atomic_deny(&self, message_id: &str) -> Result<bool, StoreError> {
        self.atomic_transition(message_id, ApprovalStatus::Denied).await
    }

    async fn atomic_transition(
        &self,
        message_id: &str,
        to: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        let message_id = message_id.to_string();
        self.run_blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET approval_status = ?1
                 WHERE id = ?2 AND approval_status = 'pending'",
                params![to.as_str(), message_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Paginated tail access: up to `limit` messages strictly before
    /// `before` (a millisecond timestamp), returned ascending.
    pub async fn get_messages(
        &self,
        session_id: &str,
        before: Option<i64>,
        limit: Option<u32>,
    ) -> Result<MessagePage, StoreError> {
        let session_id = session_id.to_string();
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        self.run_blocking(move |conn| {
            let before = before.unwrap_or(i64::MAX);
            // Read one extra row to learn whether an older page exists.
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT} WHERE session_id = ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?3"
            ))?;
            let mut messages: Vec<MessageRecord> = stmt
                .query_map(params![session_id, before, limit + 1], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            let has_more = messages.len() as u32 > limit;
            messages.truncate(limit as usize);
            messages.reverse();
            Ok(MessagePage { messages, has_more })
        })
        .await
    }

    // ─── Search ───────────────────────────────────────────────────────────────

    /// Full-text search within one session, with a substring fallback when
    /// the FTS query matches nothing.
    pub async fn search_session_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: Option<u32>,
    ) -> Result<SearchResult, StoreError> {
        self.search(Some(session_id.to_string()), query.to_string(), limit)
            .await
    }

    /// Full-text search across all sessions.
    pub async fn search_all_messages(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<SearchResult, StoreError> {
        self.search(None, query.to_string(), limit).await
    }

    async fn search(
        &self,
        session_id: Option<String>,
        query: String,
        limit: Option<u32>,
    ) -> Result<SearchResult, StoreError> {
        let limit = limit.unwrap_or(50).max(1);
        self.run_blocking(move |conn| {
            let fts = fts_search(conn, session_id.as_deref(), &query, limit)?;
            if fts.total > 0 {
                return Ok(fts);
            }
            like_search(conn, session_id.as_deref(), &query, limit)
        })
        .await
    }

    // ─── Settings ─────────────────────────────────────────────────────────────

    /// Read a runtime setting through the in-process cache.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(v) = self.settings_cache.lock().ok().and_then(|c| c.get(key).cloned()) {
            return Ok(Some(v));
        }
        let key_owned = key.to_string();
        let value: Option<String> = self
            .run_blocking(move |conn| {
                conn.query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key_owned],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Into::into)
            })
            .await?;
        if let (Some(v), Ok(mut cache)) = (value.clone(), self.settings_cache.lock()) {
            cache.insert(key.to_string(), v);
        }
        Ok(value)
    }

    /// Write a runtime setting and invalidate the cache entry.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (k, v) = (key.to_string(), value.to_string());
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![k, v],
            )?;
            Ok(())
        })
        .await?;
        if let Ok(mut cache) = self.settings_cache.lock() {
            cache.remove(key);
        }
        Ok(())
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

const MESSAGE_SELECT: &str = "SELECT id, session_id, role, content, images, model, timestamp,
        tool_calls, tool_results, approval_status, verbatim_count, token_count,
        raw_token_count, llm_request, llm_response
 FROM messages";

fn query_session(conn: &Connection, id: &str) -> Result<Option<SessionRecord>, StoreError> {
    conn.query_row(
        "SELECT id, title, model, vision_model, auto_approve,
                input_tokens, output_tokens, created_at, updated_at
         FROM sessions WHERE id = ?1",
        params![id],
        row_to_session,
    )
    .optional()
    .map_err(Into::into)
}

fn query_messages(conn: &Connection, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{MESSAGE_SELECT} WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![session_id], row_to_message)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        vision_model: row.get(3)?,
        auto_approve: row.get::<_, i64>(4)? != 0,
        token_usage: Usage {
            input_tokens: row.get::<_, i64>(5)? as u32,
            output_tokens: row.get::<_, i64>(6)? as u32,
        },
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let role_str: String = row.get(2)?;
    let role = MessageRole::parse(&role_str).unwrap_or(MessageRole::User);
    let approval: Option<String> = row.get(9)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        images: parse_json_list(row.get::<_, Option<String>>(4)?),
        model: row.get(5)?,
        timestamp: row.get(6)?,
        tool_calls: parse_json_list::<ToolCallData>(row.get::<_, Option<String>>(7)?),
        tool_results: parse_json_list::<ToolResultData>(row.get::<_, Option<String>>(8)?),
        approval_status: approval.as_deref().and_then(ApprovalStatus::parse),
        verbatim_count: row.get(10)?,
        token_count: row.get(11)?,
        raw_token_count: row.get(12)?,
        llm_request: parse_json_value(row.get::<_, Option<String>>(13)?),
        llm_response: parse_json_value(row.get::<_, Option<String>>(14)?),
    })
}

/// `None` for empty lists so the column stays NULL.
fn json_list<T: serde::Serialize>(items: &[T]) -> Result<Option<String>, StoreError> {
    if items.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(items)
        .map(Some)
        .map_err(|e| StoreError::Invalid(e.to_string()))
}

fn parse_json_list<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Vec<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn parse_json_value(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─── Search helpers ───────────────────────────────────────────────────────────

fn fts_search(
    conn: &Connection,
    session_id: Option<&str>,
    query: &str,
    limit: u32,
) -> Result<SearchResult, StoreError> {
    // Quote the query as a phrase so user input cannot inject FTS syntax.
    let phrase = format!("\"{}\"", query.replace('"', "\"\""));
    let scope = if session_id.is_some() {
        "AND session_id = ?2"
    } else {
        ""
    };
    let count_sql = format!(
        "SELECT COUNT(*) FROM messages
         WHERE rowid IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?1)
           {scope}"
    );
    let rows_sql = format!(
        "{MESSAGE_SELECT}
         WHERE rowid IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?1)
           {scope}
         ORDER BY timestamp DESC LIMIT {limit}"
    );
    run_search(conn, &count_sql, &rows_sql, &phrase, session_id)
}

fn like_search(
    conn: &Connection,
    session_id: Option<&str>,
    query: &str,
    limit: u32,
) -> Result<SearchResult, StoreError> {
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let scope = if session_id.is_some() {
        "AND session_id = ?2"
    } else {
        ""
    };
    let count_sql = format!(
        "SELECT COUNT(*) FROM messages
         WHERE content LIKE ?1 ESCAPE '\\' {scope}"
    );
    let rows_sql = format!(
        "{MESSAGE_SELECT} WHERE content LIKE ?1 ESCAPE '\\' {scope}
         ORDER BY timestamp DESC LIMIT {limit}"
    );
    run_search(conn, &count_sql, &rows_sql, &pattern, session_id)
}

fn run_search(
    conn: &Connection,
    count_sql: &str,
    rows_sql: &str,
    needle: &str,
    session_id: Option<&str>,
) -> Result<SearchResult, StoreError> {
    let total: i64 = match session_id {
        Some(sid) => conn.query_row(count_sql, params![needle, sid], |r| r.get(0))?,
        None => conn.query_row(count_sql, params![needle], |r| r.get(0))?,
    };
    let mut stmt = conn.prepare(rows_sql)?;
    let messages = match session_id {
        Some(sid) => stmt
            .query_map(params![needle, sid], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![needle], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(SearchResult {
        messages,
        total: total as u64,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
