// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use parley_model::{ToolCallData, ToolResultData, Usage};
use parley_store::{ApprovalStatus, MessageRecord};

/// Error payload carried by terminal `error` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    /// Stable classifier code, e.g. `"RATE_LIMIT"`
    pub code: String,
    pub recoverable: bool,
}

/// Events delivered to stream subscribers.
///
/// The union is fixed; payload fields serialise camelCase to match the
/// client protocol.  Every terminal stream carries exactly one of `done`
/// or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Cumulative state delivered to a (re)connecting subscriber
    #[serde(rename_all = "camelCase")]
    Snapshot {
        assistant_id: String,
        content: String,
        model: String,
        tool_calls: Vec<ToolCallData>,
    },
    Token {
        content: String,
    },
    ToolCall {
        #[serde(flatten)]
        call: ToolCallData,
    },
    ToolResult {
        #[serde(flatten)]
        result: ToolResultData,
    },
    #[serde(rename_all = "camelCase")]
    ToolProgress {
        tool_call_id: String,
        progress: u64,
        total: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Usage {
        #[serde(flatten)]
        usage: Usage,
    },
    #[serde(rename_all = "camelCase")]
    AutoApproved {
        message_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ApprovalChanged {
        message_id: String,
        approval_status: ApprovalStatus,
    },
    #[serde(rename_all = "camelCase")]
    CompactionStarted {
        session_id: String,
    },
    Compaction {
        message: Box<MessageRecord>,
    },
    #[serde(rename_all = "camelCase")]
    CompactionError {
        session_id: String,
        error: String,
    },
    NewMessage {
        message: Box<MessageRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        has_tool_calls: bool,
    },
    Error {
        #[serde(flatten)]
        payload: ErrorPayload,
    },
}

impl SessionEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn done(has_tool_calls: bool) -> Self {
        Self::Done { has_tool_calls }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
