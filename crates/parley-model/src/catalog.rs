// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-sonnet-4-5")
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Provider identifier: "openai" | "anthropic" | "mock" | ...
    pub provider: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    #[serde(default)]
    pub description: String,
    /// Whether the model accepts image input
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a model by its `"provider:model-id"` string.
/// Returns `None` for malformed strings or unknown models.
pub fn lookup(model: &str) -> Option<ModelCatalogEntry> {
    let (provider, id) = split_model(model)?;
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == id || e.name == id))
}

/// Context window for a `"provider:model-id"` string, `None` when unknown.
pub fn context_window(model: &str) -> Option<u32> {
    lookup(model).map(|e| e.context_window)
}

/// Return `true` when the string names a model present in the catalog.
pub fn is_known_model(model: &str) -> bool {
    lookup(model).is_some()
}

/// Split `"provider:model-id"` into its parts.  The model id itself may
/// contain colons (e.g. ollama tags), so only the first separator counts.
pub fn split_model(model: &str) -> Option<(&str, &str)> {
    let (provider, id) = model.split_once(':')?;
    if provider.is_empty() || id.is_empty() {
        return None;
    }
    Some((provider, id))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
