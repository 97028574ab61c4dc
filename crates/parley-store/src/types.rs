// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_model::{ToolCallData, ToolResultData, Usage};

/// Durable message roles.  `Compaction` marks a summary cut-point; it never
/// reaches a provider directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    Compaction,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Compaction => "compaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            "compaction" => Some(Self::Compaction),
            _ => None,
        }
    }
}

/// Approval state of an assistant message that carries tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// One conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    /// `"provider:model-id"`; empty on legacy rows until lazy migration
    pub model: String,
    /// Same shape as `model`; may be empty
    pub vision_model: String,
    pub auto_approve: bool,
    /// Rolling accumulator across all turns
    pub token_usage: Usage,
    /// Milliseconds since the epoch
    pub created_at: i64,
    pub updated_at: i64,
}

/// One durable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Milliseconds; weakly increasing within a session
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    /// Compaction messages only: how many preceding messages stay verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbatim_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<Value>,
}

/// Payload for appending a message; the store assigns the timestamp and,
/// unless one is supplied, the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Explicit id, for callers that hand the id out before persisting
    /// (stream entries name their assistant message up front)
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub tool_calls: Vec<ToolCallData>,
    pub tool_results: Vec<ToolResultData>,
    pub approval_status: Option<ApprovalStatus>,
    pub verbatim_count: Option<u32>,
    pub token_count: Option<u32>,
    pub raw_token_count: Option<u32>,
    pub llm_request: Option<Value>,
    pub llm_response: Option<Value>,
}

impl Default for NewMessage {
    fn default() -> Self {
        Self {
            id: None,
            role: MessageRole::User,
            content: String::new(),
            images: Vec::new(),
            model: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            approval_status: None,
            verbatim_count: None,
            token_count: None,
            raw_token_count: None,
            llm_request: None,
            llm_response: None,
        }
    }
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool(results: Vec<ToolResultData>) -> Self {
        Self {
            role: MessageRole::Tool,
            tool_results: results,
            ..Default::default()
        }
    }

    pub fn compaction(summary: impl Into<String>, verbatim_count: u32) -> Self {
        Self {
            role: MessageRole::Compaction,
            content: summary.into(),
            verbatim_count: Some(verbatim_count),
            ..Default::default()
        }
    }
}

/// Partial update for a message; `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub tool_results: Option<Vec<ToolResultData>>,
    pub approval_status: Option<ApprovalStatus>,
    pub token_count: Option<u32>,
    pub raw_token_count: Option<u32>,
    pub llm_request: Option<Value>,
    pub llm_response: Option<Value>,
}

/// Partial update for a session; `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub model: Option<String>,
    pub vision_model: Option<String>,
    pub auto_approve: Option<bool>,
}

/// A whole conversation as returned by `get_session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub messages: Vec<MessageRecord>,
}

/// One page of a paginated tail read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// Ascending timestamp order
    pub messages: Vec<MessageRecord>,
    pub has_more: bool,
}

/// Full-text search result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub messages: Vec<MessageRecord>,
    pub total: u64,
}
