// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;

use crate::catalog;
use crate::provider::{ChunkStream, Completion, GenerationRequest, Provider};
use crate::types::{PromptMessage, ToolSchema};

/// A parsed `"provider:model-id"` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub id: String,
}

impl ModelRef {
    /// Parse a model string.  Fails on missing or empty parts.
    pub fn parse(model: &str) -> anyhow::Result<Self> {
        let (provider, id) = catalog::split_model(model)
            .with_context(|| format!("malformed model string: {model:?}"))?;
        Ok(Self {
            provider: provider.to_string(),
            id: id.to_string(),
        })
    }
}

/// Process-wide table of provider adapters, keyed by provider name.
///
/// Constructed once at startup and shared by `Arc`; registration happens
/// before the server starts accepting work, so lookups take `&self`.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a `"provider:model-id"` string and open a streaming
    /// generation on the matching adapter.
    pub async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolSchema>,
        session_id: Option<String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let mref = ModelRef::parse(model)?;
        let Some(provider) = self.get(&mref.provider) else {
            bail!("no provider registered for {:?}", mref.provider);
        };
        provider
            .generate_stream(
                GenerationRequest {
                    messages,
                    model: mref.id,
                    tools,
                    session_id,
                },
                cancel,
            )
            .await
    }

    /// One-shot generation used by compaction and auto-titling.
    pub async fn generate_response(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
    ) -> anyhow::Result<Completion> {
        let mref = ModelRef::parse(model)?;
        let Some(provider) = self.get(&mref.provider) else {
            bail!("no provider registered for {:?}", mref.provider);
        };
        provider.generate_response(messages, &mref.id).await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
