// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Classification of provider errors from their message text.
//!
//! Provider SDKs surface failures as strings with little structure; the
//! pattern lists below live in one place so the mapping is testable.

use thiserror::Error;

/// Marker error injected into a provider stream when the caller's
/// cancellation token fires.  The tool loop downcasts for this to tell a
/// user interrupt apart from a real provider failure.
#[derive(Debug, Error)]
#[error("stream cancelled")]
pub struct StreamCancelled;

/// Classified provider error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorCode {
    /// The request exceeded the model's context window; the client can
    /// compact and retry.
    ContextLimit,
    /// Retryable with backoff.
    RateLimit,
    /// Bad or missing credentials.
    AuthError,
    /// Upstream network or 5xx failure.
    ProviderError,
    Unknown,
}

impl LlmErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextLimit => "CONTEXT_LIMIT",
            Self::RateLimit => "RATE_LIMIT",
            Self::AuthError => "AUTH_ERROR",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::ContextLimit | Self::RateLimit | Self::ProviderError
        )
    }
}

const CONTEXT_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "exceed_context_size",
    "maximum context length",
    "context window",
    "prompt is too long",
    "too many tokens",
];

const RATE_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "quota exceeded",
    "429",
];

const AUTH_PATTERNS: &[&str] = &[
    "invalid api key",
    "invalid x-api-key",
    "authentication",
    "unauthorized",
    "permission denied",
    "401",
    "403",
];

const PROVIDER_PATTERNS: &[&str] = &[
    "overloaded",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "connection refused",
    "connection reset",
    "timed out",
    "500",
    "502",
    "503",
    "529",
];

/// Map a provider error message to an [`LlmErrorCode`].
///
/// Pure function of the message text; matching is case-insensitive.  Order
/// matters: context and rate limits are checked before the generic provider
/// patterns because some backends wrap them in a 4xx/5xx envelope.
pub fn classify(message: &str) -> LlmErrorCode {
    let msg = message.to_lowercase();
    let any = |patterns: &[&str]| patterns.iter().any(|p| msg.contains(p));
    if any(CONTEXT_PATTERNS) {
        LlmErrorCode::ContextLimit
    } else if any(RATE_PATTERNS) {
        LlmErrorCode::RateLimit
    } else if any(AUTH_PATTERNS) {
        LlmErrorCode::AuthError
    } else if any(PROVIDER_PATTERNS) {
        LlmErrorCode::ProviderError
    } else {
        LlmErrorCode::Unknown
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
