// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use parley_model::LlmErrorCode;
use parley_store::StoreError;

/// Tagged failure kinds for runtime operations.  The transport layer maps
/// these to its status equivalents (NotFound → 404, Conflict → 409,
/// Invalid → 400).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    /// Lost an approval/denial race, or the message is not pending.
    #[error("conflict")]
    Conflict,
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("stale element reference")]
    StaleElement,
    #[error("llm error ({}): {message}", code.as_str())]
    Llm {
        code: LlmErrorCode,
        message: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::Invalid(msg) => Self::Invalid(msg),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
