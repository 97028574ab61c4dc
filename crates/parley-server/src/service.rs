// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Command dispatch: translates client RPCs into core calls and maps tagged
//! errors to wire codes.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use parley_browser::{BrowserManager, LatestImageStore};
use parley_core::{
    compact_session, CoreError, SessionEvent, SessionRunner, StreamRegistry,
};
use parley_model::catalog;
use parley_store::{SessionPatch, SessionStore};

use crate::watchers::WatcherRegistry;

#[derive(Clone)]
pub struct AppState {
    pub runner: SessionRunner,
    pub store: SessionStore,
    pub streams: Arc<StreamRegistry>,
    pub watchers: Arc<WatcherRegistry>,
    pub browser: Arc<BrowserManager>,
    pub images: Arc<LatestImageStore>,
}

/// One inbound frame: a command plus an optional correlation id echoed in
/// the response.
#[derive(Debug, Deserialize)]
pub struct CommandFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    CreateSession {
        title: Option<String>,
        model: Option<String>,
        vision_model: Option<String>,
    },
    ListSessions,
    GetSession {
        session_id: String,
    },
    GetMessages {
        session_id: String,
        before: Option<i64>,
        limit: Option<u32>,
    },
    UpdateSession {
        session_id: String,
        title: Option<String>,
        model: Option<String>,
        vision_model: Option<String>,
        auto_approve: Option<bool>,
    },
    DeleteSession {
        session_id: String,
    },
    SendMessage {
        session_id: String,
        content: String,
        #[serde(default)]
        images: Vec<String>,
    },
    Approve {
        session_id: String,
        message_id: String,
    },
    Deny {
        session_id: String,
        message_id: String,
    },
    Cancel {
        session_id: String,
    },
    Watch {
        session_id: String,
    },
    Unwatch {
        session_id: String,
    },
    Compact {
        session_id: String,
    },
    Search {
        query: String,
        session_id: Option<String>,
        limit: Option<u32>,
    },
    GetSetting {
        key: String,
    },
    SetSetting {
        key: String,
        value: String,
    },
}

/// Map a tagged error to its wire code (the HTTP-status equivalent).
pub fn error_code(error: &CoreError) -> &'static str {
    match error {
        CoreError::NotFound => "not_found",
        CoreError::Conflict => "conflict",
        CoreError::Invalid(_) => "invalid",
        CoreError::ElementNotFound(_) => "element_not_found",
        CoreError::StaleElement => "stale_element",
        CoreError::Llm { .. } => "llm_error",
        CoreError::Internal(_) => "internal",
    }
}

pub async fn handle_command(
    state: &AppState,
    client_id: &str,
    command: ClientCommand,
) -> Result<Value, CoreError> {
    match command {
        ClientCommand::CreateSession {
            title,
            model,
            vision_model,
        } => {
            if let Some(m) = model.as_deref().filter(|m| !m.is_empty()) {
                require_known_model(m)?;
            }
            let session = state.store.create_session(title, model, vision_model).await?;
            Ok(serde_json::to_value(session).map_err(anyhow::Error::from)?)
        }

        ClientCommand::ListSessions => {
            let sessions = state.store.list_sessions().await?;
            Ok(serde_json::to_value(sessions).map_err(anyhow::Error::from)?)
        }

        ClientCommand::GetSession { session_id } => {
            let view = state
                .store
                .get_session(&session_id)
                .await?
                .ok_or(CoreError::NotFound)?;
            Ok(serde_json::to_value(view).map_err(anyhow::Error::from)?)
        }

        ClientCommand::GetMessages {
            session_id,
            before,
            limit,
        } => {
            let page = state.store.get_messages(&session_id, before, limit).await?;
            Ok(serde_json::to_value(page).map_err(anyhow::Error::from)?)
        }

        ClientCommand::UpdateSession {
            session_id,
            title,
            model,
            vision_model,
            auto_approve,
        } => {
            if let Some(m) = model.as_deref().filter(|m| !m.is_empty()) {
                require_known_model(m)?;
            }
            state
                .store
                .update_session(
                    &session_id,
                    SessionPatch {
                        title,
                        model,
                        vision_model,
                        auto_approve,
                    },
                )
                .await?;
            Ok(json!({ "updated": true }))
        }

        ClientCommand::DeleteSession { session_id } => {
            state.store.delete_session(&session_id).await?;
            // Cascade to live side-effect resources.
            state.browser.destroy(&session_id).await;
            state.images.clear(&session_id);
            Ok(json!({ "deleted": true }))
        }

        ClientCommand::SendMessage {
            session_id,
            content,
            images,
        } => {
            // ACK immediately; the round streams to subscribers.
            let runner = state.runner.clone();
            let watchers = Arc::clone(&state.watchers);
            let sid = session_id.clone();
            tokio::spawn(async move {
                match runner.run_user_turn(&sid, content, images).await {
                    Ok(user_message) => {
                        watchers.broadcast_to_session(
                            &sid,
                            &SessionEvent::NewMessage {
                                message: Box::new(user_message),
                            },
                            None,
                        );
                    }
                    Err(e) => warn!(session = %sid, "user turn failed: {e}"),
                }
            });
            Ok(json!({ "started": true }))
        }

        ClientCommand::Approve {
            session_id,
            message_id,
        } => {
            state.runner.approve(&session_id, &message_id).await?;
            state.watchers.broadcast_to_session(
                &session_id,
                &SessionEvent::ApprovalChanged {
                    message_id,
                    approval_status: parley_store::ApprovalStatus::Approved,
                },
                Some(client_id),
            );
            Ok(json!({ "approved": true }))
        }

        ClientCommand::Deny {
            session_id,
            message_id,
        } => {
            let tool_message = state.runner.deny(&session_id, &message_id).await?;
            state.watchers.broadcast_to_session(
                &session_id,
                &SessionEvent::ApprovalChanged {
                    message_id,
                    approval_status: parley_store::ApprovalStatus::Denied,
                },
                Some(client_id),
            );
            state.watchers.broadcast_to_session(
                &session_id,
                &SessionEvent::NewMessage {
                    message: Box::new(tool_message),
                },
                None,
            );
            Ok(json!({ "denied": true }))
        }

        ClientCommand::Cancel { session_id } => {
            if state.runner.cancel(&session_id) {
                Ok(json!({ "cancelled": true }))
            } else {
                Err(CoreError::NotFound)
            }
        }

        ClientCommand::Watch { session_id } => {
            let tx = state
                .watchers
                .watch(&session_id, client_id)
                .ok_or(CoreError::NotFound)?;
            // Resume from snapshot when a round is live or recently done.
            let resumed = state.streams.subscribe(&session_id, tx).is_some();
            Ok(json!({ "watching": true, "resumed": resumed }))
        }

        ClientCommand::Unwatch { session_id } => {
            state.watchers.unwatch(&session_id, client_id);
            Ok(json!({ "watching": false }))
        }

        ClientCommand::Compact { session_id } => {
            let session = state
                .store
                .get_session_record(&session_id)
                .await?
                .ok_or(CoreError::NotFound)?;
            let context_window =
                catalog::context_window(&session.model).unwrap_or(0) as i64;
            state.watchers.broadcast_to_session(
                &session_id,
                &SessionEvent::CompactionStarted {
                    session_id: session_id.clone(),
                },
                None,
            );
            let state2 = state.clone();
            tokio::spawn(async move {
                let result = compact_session(
                    &state2.store,
                    state2.runner.providers(),
                    &session_id,
                    &session.model,
                    context_window,
                )
                .await;
                let event = match result {
                    Ok((message, _)) => SessionEvent::Compaction {
                        message: Box::new(message),
                    },
                    Err(e) => SessionEvent::CompactionError {
                        session_id: session_id.clone(),
                        error: e.to_string(),
                    },
                };
                state2.watchers.broadcast_to_session(&session_id, &event, None);
            });
            Ok(json!({ "started": true }))
        }

        ClientCommand::Search {
            query,
            session_id,
            limit,
        } => {
            let result = match session_id {
                Some(sid) => {
                    state
                        .store
                        .search_session_messages(&sid, &query, limit)
                        .await?
                }
                None => state.store.search_all_messages(&query, limit).await?,
            };
            Ok(serde_json::to_value(result).map_err(anyhow::Error::from)?)
        }

        ClientCommand::GetSetting { key } => {
            let value = state.store.get_setting(&key).await?;
            Ok(json!({ "key": key, "value": value }))
        }

        ClientCommand::SetSetting { key, value } => {
            state.store.set_setting(&key, &value).await?;
            Ok(json!({ "key": key, "saved": true }))
        }
    }
}

fn require_known_model(model: &str) -> Result<(), CoreError> {
    if catalog::is_known_model(model) {
        Ok(())
    } else {
        Err(CoreError::Invalid(format!("unknown model: {model}")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
