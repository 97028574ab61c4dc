// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The tool loop: drive one LLM generation, gate tool calls on approval,
//! execute them sequentially, persist results, and recurse until the model
//! answers in plain text or the round cap is reached.

use std::sync::Arc;

use async_recursion::async_recursion;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_model::{
    classify, PromptMessage, ProviderRegistry, StreamCancelled, StreamChunk, ToolResultData,
    Usage,
};
use parley_store::{
    ApprovalStatus, MessagePatch, MessageRecord, MessageRole, NewMessage, SessionPatch,
    SessionStore, DEFAULT_SESSION_TITLE,
};
use parley_tools::{ToolRegistry, Validation};

use crate::compact::auto_compact_if_needed;
use crate::context::build_history_from_db;
use crate::error::CoreError;
use crate::events::{ErrorPayload, SessionEvent};
use crate::streams::{StreamRegistry, StreamSnapshot};

/// Hard cap on consecutive tool rounds within one user turn.
pub const MAX_TOOL_ROUNDS: u32 = 10;

const INTERRUPTED_MESSAGE: &str = "[Interrupted by user]";
const INTERRUPTED_TOOL_RESULT: &str = "Tool execution was interrupted by user.";
const CANCELLED_PREVIOUS_FAILED: &str = "Cancelled: previous tool failed";
const CANCELLED_VALIDATION_FAILED: &str = "Cancelled: another tool failed validation";
const DENIED_TOOL_RESULT: &str = "Tool call denied by user";

/// Transport-side registry of clients watching a session.
///
/// The runner uses it to auto-subscribe pre-existing watchers whenever a
/// fresh stream entry starts (approval rounds, new turns) and to announce
/// session-list changes outside any stream.
pub trait SessionWatchers: Send + Sync {
    fn watcher_channels(&self, session_id: &str) -> Vec<mpsc::Sender<SessionEvent>>;
    fn broadcast_global(&self, topic: &str, payload: Value);
}

/// No-op watcher hub for tests and headless embedding.
pub struct NullWatchers;

impl SessionWatchers for NullWatchers {
    fn watcher_channels(&self, _session_id: &str) -> Vec<mpsc::Sender<SessionEvent>> {
        Vec::new()
    }
    fn broadcast_global(&self, _topic: &str, _payload: Value) {}
}

/// Drives the per-session round state machine.
///
/// Cheap to clone; all state lives behind `Arc`s so transport handlers can
/// spawn rounds in the background after ACKing.
#[derive(Clone)]
pub struct SessionRunner {
    store: SessionStore,
    streams: Arc<StreamRegistry>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    watchers: Arc<dyn SessionWatchers>,
}

impl SessionRunner {
    pub fn new(
        store: SessionStore,
        streams: Arc<StreamRegistry>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        watchers: Arc<dyn SessionWatchers>,
    ) -> Self {
        Self {
            store,
            streams,
            providers,
            tools,
            watchers,
        }
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Entry point for a new user turn: persist the user message, open a
    /// fresh stream entry, subscribe session watchers, and run the loop to
    /// completion.  Callers that need to ACK first spawn this.
    pub async fn run_user_turn(
        &self,
        session_id: &str,
        content: String,
        images: Vec<String>,
    ) -> Result<MessageRecord, CoreError> {
        let view = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let model = view.session.model;
        if model.is_empty() {
            return Err(CoreError::Invalid(
                "session has no model configured".to_string(),
            ));
        }

        let mut user = NewMessage::user(content);
        user.images = images;
        let user_record = self.store.add_message(session_id, user).await?;

        let assistant_id = Uuid::new_v4().to_string();
        self.streams.create(session_id, &assistant_id, &model);
        self.subscribe_watchers(session_id);
        self.stream_next_round(session_id, &model, 0).await?;
        Ok(user_record)
    }

    /// Approve a pending tool round.  The CAS happens here; the tool round
    /// itself runs on a fresh stream entry.  Losing the race is `Conflict`.
    pub async fn approve(&self, session_id: &str, message_id: &str) -> Result<(), CoreError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if message.session_id != session_id || message.tool_calls.is_empty() {
            return Err(CoreError::Invalid(
                "message has no tool calls awaiting approval".to_string(),
            ));
        }
        if !self.store.atomic_approve(message_id).await? {
            return Err(CoreError::Conflict);
        }
        let session = self
            .store
            .get_session_record(session_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        self.streams.create(session_id, message_id, &session.model);
        self.subscribe_watchers(session_id);
        let runner = self.clone();
        let (sid, mid, model) = (
            session_id.to_string(),
            message_id.to_string(),
            session.model,
        );
        tokio::spawn(async move {
            if let Err(e) = runner.execute_tool_round(&sid, &mid, &model, 0).await {
                warn!(session = %sid, "tool round failed: {e}");
            }
        });
        Ok(())
    }

    /// Deny a pending tool round: write denied results, persist the
    /// synthetic tool message, and do not open a new LLM round.
    pub async fn deny(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<MessageRecord, CoreError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if message.session_id != session_id || message.tool_calls.is_empty() {
            return Err(CoreError::Invalid(
                "message has no tool calls awaiting approval".to_string(),
            ));
        }
        if !self.store.atomic_deny(message_id).await? {
            return Err(CoreError::Conflict);
        }
        let results: Vec<ToolResultData> = message
            .tool_calls
            .iter()
            .map(|c| ToolResultData::err(&c.id, DENIED_TOOL_RESULT))
            .collect();
        self.store
            .update_message(
                message_id,
                MessagePatch {
                    tool_results: Some(results.clone()),
                    ..Default::default()
                },
            )
            .await?;
        let tool_message = self
            .store
            .add_message(session_id, NewMessage::tool(results))
            .await?;
        Ok(tool_message)
    }

    /// Cancel whatever round is in flight for the session.
    ///
    /// Sets `aborted` synchronously, fires the abort token, and pushes an
    /// explicit interruption marker so clients see the cut even though
    /// further token mutations are dropped.  Returns `false` when the
    /// session has no live entry.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.streams.mark_aborted(session_id) {
            Some(token) => {
                info!(session = %session_id, "cancelling in-flight round");
                token.cancel();
                self.streams
                    .push_event(session_id, SessionEvent::token(INTERRUPTED_MESSAGE));
                true
            }
            None => false,
        }
    }

    fn subscribe_watchers(&self, session_id: &str) {
        for tx in self.watchers.watcher_channels(session_id) {
            self.streams.subscribe(session_id, tx);
        }
    }

    /// One LLM generation round.
    #[async_recursion]
    pub async fn stream_next_round(
        &self,
        session_id: &str,
        model: &str,
        round: u32,
    ) -> Result<(), CoreError> {
        let view = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let prompt = build_history_from_db(&view.messages);

        let assistant_id = Uuid::new_v4().to_string();
        let cancel = match self.streams.continue_round(session_id, &assistant_id) {
            Some(token) => token,
            None => self.streams.create(session_id, &assistant_id, model),
        };

        // A cancel that landed between rounds ends the turn before any
        // provider call.
        let Some(snap) = self.streams.snapshot(session_id) else {
            return Ok(());
        };
        if snap.aborted {
            return self
                .persist_interrupted(session_id, model, &snap, Some(INTERRUPTED_MESSAGE))
                .await;
        }

        self.streams.push_event(
            session_id,
            SessionEvent::Snapshot {
                assistant_id: assistant_id.clone(),
                content: String::new(),
                model: model.to_string(),
                tool_calls: Vec::new(),
            },
        );

        let schemas = self.tools.schemas();
        let request_snapshot = json!({
            "model": model,
            "messages": serde_json::to_value(&prompt).unwrap_or(Value::Null),
            "tools": schemas.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
        });
        self.streams.set_llm_request(session_id, request_snapshot);

        let mut debug_blobs: Vec<Value> = Vec::new();
        let mut stream_error: Option<anyhow::Error> = None;
        match self
            .providers
            .generate_stream(
                model,
                prompt,
                schemas,
                Some(session_id.to_string()),
                cancel.clone(),
            )
            .await
        {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(StreamChunk::Token(t)) => {
                            self.streams.push_event(session_id, SessionEvent::token(t));
                        }
                        Ok(StreamChunk::ToolCall(call)) => {
                            self.streams
                                .push_event(session_id, SessionEvent::ToolCall { call });
                        }
                        Ok(StreamChunk::Usage(usage)) => {
                            self.streams
                                .push_event(session_id, SessionEvent::Usage { usage });
                        }
                        Ok(StreamChunk::Debug(v)) => debug_blobs.push(v),
                        Err(e) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => stream_error = Some(e),
        }

        let Some(snap) = self.streams.snapshot(session_id) else {
            warn!(session = %session_id, "stream entry evicted mid-round");
            return Ok(());
        };

        if let Some(error) = stream_error {
            let cancelled = error.downcast_ref::<StreamCancelled>().is_some();
            if snap.aborted || cancelled {
                return self.persist_interrupted(session_id, model, &snap, None).await;
            }
            let message = error.to_string();
            let code = classify(&message);
            warn!(session = %session_id, code = code.as_str(), "provider stream failed: {message}");
            self.streams.push_event(
                session_id,
                SessionEvent::Error {
                    payload: ErrorPayload {
                        message,
                        code: code.as_str().to_string(),
                        recoverable: code.recoverable(),
                    },
                },
            );
            self.streams.schedule_removal(session_id, None);
            return Ok(());
        }

        // The stream may have ended normally after a cancel raced in.
        if snap.aborted {
            return self.persist_interrupted(session_id, model, &snap, None).await;
        }

        // Terminal persist, strictly before `done`: a client that refetches
        // on `done` must observe the message in durable storage.
        let has_tool_calls = !snap.tool_calls.is_empty();
        let mut assistant = NewMessage::assistant(snap.content.clone());
        assistant.id = Some(snap.assistant_id.clone());
        assistant.model = Some(model.to_string());
        assistant.tool_calls = snap.tool_calls.clone();
        assistant.approval_status = has_tool_calls.then_some(ApprovalStatus::Pending);
        assistant.raw_token_count = snap.usage.map(|u| u.output_tokens);
        assistant.llm_request = snap.llm_request.clone();
        assistant.llm_response =
            (!debug_blobs.is_empty()).then(|| Value::Array(std::mem::take(&mut debug_blobs)));
        let assistant_record = self.store.add_message(session_id, assistant).await?;

        if let Some(usage) = snap.usage {
            self.record_usage(session_id, &view.messages, usage).await?;
        }

        if has_tool_calls {
            // Auto-approve consults the flag as it is *now*, not a snapshot
            // from the start of the turn.
            let auto = self
                .store
                .get_session_record(session_id)
                .await?
                .is_some_and(|s| s.auto_approve);
            if auto && self.store.atomic_approve(&assistant_record.id).await? {
                self.streams.push_event(
                    session_id,
                    SessionEvent::AutoApproved {
                        message_id: assistant_record.id.clone(),
                    },
                );
                return self
                    .execute_tool_round(session_id, &assistant_record.id, model, round)
                    .await;
            }
            self.streams
                .push_event(session_id, SessionEvent::done(true));
            self.streams.schedule_removal(session_id, None);
            return Ok(());
        }

        self.streams
            .push_event(session_id, SessionEvent::done(false));
        if let Some(usage) = snap.usage {
            if let Some(compaction) =
                auto_compact_if_needed(&self.store, &self.providers, session_id, model, usage)
                    .await
            {
                self.streams.push_event(
                    session_id,
                    SessionEvent::Compaction {
                        message: Box::new(compaction),
                    },
                );
            }
        }
        self.maybe_auto_title(session_id, model).await;
        self.streams.schedule_removal(session_id, None);
        Ok(())
    }

    /// Execute the tool calls of an approved assistant message, in order.
    #[async_recursion]
    pub async fn execute_tool_round(
        &self,
        session_id: &str,
        message_id: &str,
        model: &str,
        round: u32,
    ) -> Result<(), CoreError> {
        if round >= MAX_TOOL_ROUNDS {
            warn!(
                session = %session_id,
                round,
                "tool round cap reached; leaving trailing tool calls unanswered"
            );
            return Ok(());
        }
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let calls = message.tool_calls;
        if calls.is_empty() {
            return Err(CoreError::Invalid(
                "message has no tool calls to execute".to_string(),
            ));
        }

        // Pre-validation: one bad call poisons the whole round so the model
        // sees a consistent picture instead of partial execution.
        let validations: Vec<Validation> = calls
            .iter()
            .map(|c| self.tools.validate_call(&c.name, &c.arguments))
            .collect();
        if validations.iter().any(|v| !v.is_valid()) {
            let results: Vec<ToolResultData> = calls
                .iter()
                .zip(&validations)
                .map(|(call, validation)| match validation {
                    Validation::Invalid(error) => ToolResultData::err(&call.id, error.clone()),
                    Validation::Valid => {
                        ToolResultData::err(&call.id, CANCELLED_VALIDATION_FAILED)
                    }
                })
                .collect();
            for result in &results {
                self.streams.push_event(
                    session_id,
                    SessionEvent::ToolResult {
                        result: result.clone(),
                    },
                );
            }
            self.persist_round_results(session_id, message_id, results, None).await?;
            // The model sees the validation errors and may correct itself.
            return self.stream_next_round(session_id, model, round + 1).await;
        }

        let mut results: Vec<ToolResultData> = Vec::new();
        let mut had_error = false;
        let mut was_interrupted = false;
        for call in &calls {
            if self.streams.is_aborted(session_id) {
                was_interrupted = true;
                break;
            }
            let result = if had_error {
                ToolResultData::err(&call.id, CANCELLED_PREVIOUS_FAILED)
            } else {
                debug!(session = %session_id, tool = %call.name, "executing tool call");
                match self
                    .tools
                    .execute(&call.name, call.arguments.clone(), Some(session_id))
                    .await
                {
                    Ok(output) => ToolResultData::ok(&call.id, output),
                    Err(e) => {
                        had_error = true;
                        ToolResultData::err(&call.id, format!("Error: {e}"))
                    }
                }
            };
            self.streams.push_event(
                session_id,
                SessionEvent::ToolResult {
                    result: result.clone(),
                },
            );
            results.push(result);
            if self.streams.is_aborted(session_id) {
                was_interrupted = true;
                break;
            }
        }

        if was_interrupted {
            for call in &calls {
                if !results.iter().any(|r| r.tool_call_id == call.id) {
                    results.push(ToolResultData::err(&call.id, INTERRUPTED_TOOL_RESULT));
                }
            }
            self.persist_round_results(
                session_id,
                message_id,
                results,
                Some(ApprovalStatus::Denied),
            )
            .await?;
            self.streams
                .push_event(session_id, SessionEvent::done(false));
            self.streams.schedule_removal(session_id, None);
            return Ok(());
        }

        self.persist_round_results(
            session_id,
            message_id,
            results,
            Some(ApprovalStatus::Approved),
        )
        .await?;
        self.stream_next_round(session_id, model, round + 1).await
    }

    /// Store the round's results twice: on the parent assistant message
    /// (the approval-outcome copy) and as the tool message the prompt is
    /// rebuilt from.
    async fn persist_round_results(
        &self,
        session_id: &str,
        message_id: &str,
        results: Vec<ToolResultData>,
        approval: Option<ApprovalStatus>,
    ) -> Result<(), CoreError> {
        self.store
            .update_message(
                message_id,
                MessagePatch {
                    tool_results: Some(results.clone()),
                    approval_status: approval,
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .add_message(session_id, NewMessage::tool(results))
            .await?;
        Ok(())
    }

    /// Terminal persist for an interrupted round.
    async fn persist_interrupted(
        &self,
        session_id: &str,
        model: &str,
        snap: &StreamSnapshot,
        content_override: Option<&str>,
    ) -> Result<(), CoreError> {
        let content = content_override.unwrap_or(&snap.content);
        let mut assistant = NewMessage::assistant(content);
        assistant.id = Some(snap.assistant_id.clone());
        assistant.model = Some(model.to_string());
        if content_override.is_none() {
            assistant.tool_calls = snap.tool_calls.clone();
            assistant.approval_status = (!snap.tool_calls.is_empty())
                .then_some(ApprovalStatus::Denied);
        }
        self.store.add_message(session_id, assistant).await?;
        self.streams
            .push_event(session_id, SessionEvent::done(false));
        self.streams.schedule_removal(session_id, None);
        Ok(())
    }

    /// Fold the round's usage into the session accumulator and stamp the
    /// triggering user message's raw input count if it is still unset.
    async fn record_usage(
        &self,
        session_id: &str,
        messages: &[MessageRecord],
        usage: Usage,
    ) -> Result<(), CoreError> {
        if let Some(user) = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
        {
            if user.raw_token_count.is_none() {
                self.store
                    .update_message(
                        &user.id,
                        MessagePatch {
                            raw_token_count: Some(usage.input_tokens),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        if let Some(session) = self.store.get_session_record(session_id).await? {
            let accumulated = Usage {
                input_tokens: session.token_usage.input_tokens + usage.input_tokens,
                output_tokens: session.token_usage.output_tokens + usage.output_tokens,
            };
            self.store
                .update_session_token_usage(session_id, accumulated)
                .await?;
        }
        Ok(())
    }

    /// Give untitled sessions a short generated title after their first
    /// completed turn.  Failures are logged and ignored.
    async fn maybe_auto_title(&self, session_id: &str, model: &str) {
        let Ok(Some(session)) = self.store.get_session_record(session_id).await else {
            return;
        };
        if session.title != DEFAULT_SESSION_TITLE {
            return;
        }
        let Ok(Some(view)) = self.store.get_session(session_id).await else {
            return;
        };
        let Some(first_user) = view.messages.iter().find(|m| m.role == MessageRole::User)
        else {
            return;
        };
        let opening: String = first_user.content.chars().take(500).collect();
        let prompt = format!(
            "Write a title of at most six words for a conversation that opens with \
             the message below. Reply with the title only, no quotes.\n\n{opening}"
        );
        match self
            .providers
            .generate_response(model, vec![PromptMessage::user(prompt)])
            .await
        {
            Ok(completion) => {
                let title = completion.text.trim().trim_matches('"').to_string();
                if title.is_empty() {
                    return;
                }
                if self
                    .store
                    .update_session(
                        session_id,
                        SessionPatch {
                            title: Some(title.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .is_ok()
                {
                    self.watchers.broadcast_global(
                        "sessions",
                        json!({
                            "type": "session_updated",
                            "sessionId": session_id,
                            "title": title,
                        }),
                    );
                }
            }
            Err(e) => debug!(session = %session_id, "auto-title failed: {e}"),
        }
    }
}
