// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic in-process providers for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::error::StreamCancelled;
use crate::provider::{ChunkStream, Completion, GenerationRequest, Provider};
use crate::types::{PromptMessage, PromptRole, StreamChunk, ToolCallData, Usage};

/// Echoes the last user message back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_stream(
        &self,
        req: GenerationRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == PromptRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".to_string());

        let events: Vec<anyhow::Result<StreamChunk>> = vec![
            Ok(StreamChunk::Token(format!("MOCK: {reply}"))),
            Ok(StreamChunk::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
            })),
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    async fn generate_response(
        &self,
        messages: Vec<PromptMessage>,
        _model: &str,
    ) -> anyhow::Result<Completion> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == PromptRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(Completion {
            text: format!("MOCK: {reply}"),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 10,
            }),
        })
    }
}

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(StreamChunk),
    /// Sleep before the next step so tests can interleave cancels
    Pause(Duration),
    /// Park until the cancellation token fires, then end with
    /// [`StreamCancelled`]
    WaitCancelled,
    /// Fail the stream with this error message
    Fail(String),
}

/// A pre-scripted provider.  Each `generate_stream` call pops the next
/// script from the front of the queue, so tests can specify exact chunk
/// sequences (including tool calls and failures) without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ScriptStep>>>>,
    responses: Arc<Mutex<Vec<Completion>>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<GenerationRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            responses: Arc::new(Mutex::new(Vec::new())),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue results for `generate_response` calls (front first).
    pub fn with_responses(self, responses: Vec<Completion>) -> Self {
        *self.responses.lock().unwrap() = responses;
        self
    }

    /// Convenience: a single round that streams `text` token-by-token and
    /// reports the given usage.
    pub fn text_round(text: &str, usage: Usage) -> Vec<ScriptStep> {
        let mut steps: Vec<ScriptStep> = text
            .split_inclusive(' ')
            .map(|t| ScriptStep::Chunk(StreamChunk::Token(t.to_string())))
            .collect();
        steps.push(ScriptStep::Chunk(StreamChunk::Usage(usage)));
        steps
    }

    /// Convenience: a round that emits one tool call and no text.
    pub fn tool_round(
        id: &str,
        name: &str,
        arguments: serde_json::Value,
        usage: Usage,
    ) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Chunk(StreamChunk::ToolCall(ToolCallData {
                id: id.into(),
                name: name.into(),
                arguments,
            })),
            ScriptStep::Chunk(StreamChunk::Usage(usage)),
        ]
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_stream(
        &self,
        req: GenerationRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Vec::new()
            } else {
                scripts.remove(0)
            }
        };

        let stream = stream::unfold(
            (script.into_iter(), cancel, false),
            |(mut steps, cancel, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if cancel.is_cancelled() {
                        return Some((
                            Err(anyhow::Error::new(StreamCancelled)),
                            (steps, cancel, true),
                        ));
                    }
                    match steps.next() {
                        None => return None,
                        Some(ScriptStep::Chunk(c)) => {
                            return Some((Ok(c), (steps, cancel, false)))
                        }
                        Some(ScriptStep::Pause(d)) => {
                            tokio::select! {
                                _ = tokio::time::sleep(d) => {}
                                _ = cancel.cancelled() => {}
                            }
                        }
                        Some(ScriptStep::WaitCancelled) => {
                            cancel.cancelled().await;
                        }
                        Some(ScriptStep::Fail(msg)) => {
                            return Some((
                                Err(anyhow::anyhow!(msg)),
                                (steps, cancel, true),
                            ))
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn generate_response(
        &self,
        _messages: Vec<PromptMessage>,
        _model: &str,
    ) -> anyhow::Result<Completion> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Completion {
                text: "Summary of the conversation.".to_string(),
                usage: Some(Usage {
                    input_tokens: 20,
                    output_tokens: 10,
                }),
            })
        } else {
            Ok(responses.remove(0))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
