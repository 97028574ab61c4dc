// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

// ─── Tool call / result payloads ──────────────────────────────────────────────

/// A single tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub arguments: serde_json::Value,
}

/// The outcome of one tool call, keyed back to the call by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultData {
    pub tool_call_id: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResultData {
    pub fn ok(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn err(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            is_error: true,
        }
    }
}

// ─── Prompt messages ──────────────────────────────────────────────────────────

/// Roles that exist on the provider wire.  Durable history additionally has
/// compaction messages; those never reach a provider directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
    Tool,
}

/// One part of the prompt sent to a provider.
///
/// This is the reconstructed view of a durable message: text content plus
/// whichever of images / tool calls / tool results the message carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultData>,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Approximate token count used for context accounting.
    ///
    /// 4-chars-per-token heuristic for text; images use a flat 765-token
    /// estimate (the typical cost of a 512×512 region at high detail).
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.arguments.to_string().len();
        }
        for tr in &self.tool_results {
            chars += tr.output.len();
        }
        chars += self.images.len() * 765 * 4;
        (chars / 4).max(1)
    }
}

// ─── Streaming chunks ─────────────────────────────────────────────────────────

/// Token usage reported by a provider for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single streamed chunk from a provider generation.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A text delta
    Token(String),
    /// A complete tool call (providers accumulate partial argument deltas
    /// themselves and emit the call once its JSON is whole)
    ToolCall(ToolCallData),
    /// Usage statistics; may be emitted more than once, last wins
    Usage(Usage),
    /// Provider-specific diagnostic payload, stored with the message
    Debug(serde_json::Value),
}

/// JSON-schema-like descriptor for one tool, as sent to providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
