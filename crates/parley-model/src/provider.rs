// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::types::{PromptMessage, StreamChunk, ToolSchema, Usage};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// A streaming generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub messages: Vec<PromptMessage>,
    /// Bare model id (the provider prefix is already resolved)
    pub model: String,
    pub tools: Vec<ToolSchema>,
    /// Stable session identifier forwarded to providers that support an
    /// explicit prompt-cache key.
    pub session_id: Option<String>,
}

/// A complete (non-streamed) generation result.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Adapter over one upstream LLM API.
///
/// Implementations bridge provider-native streaming into [`ChunkStream`] so
/// the tool loop stays provider-agnostic.  A cooperative cancel must surface
/// as an `Err` whose chain contains [`crate::StreamCancelled`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier, the prefix of `"provider:model-id"` strings.
    fn name(&self) -> &str;

    /// Open a streaming generation.  The stream ends when the provider
    /// finishes; it yields `Err` on provider failure or cooperative cancel.
    async fn generate_stream(
        &self,
        req: GenerationRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream>;

    /// One-shot generation without tools.  Used by compaction summaries and
    /// session auto-titling only.
    async fn generate_response(
        &self,
        messages: Vec<PromptMessage>,
        model: &str,
    ) -> anyhow::Result<Completion>;
}
