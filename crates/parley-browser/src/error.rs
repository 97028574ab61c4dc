// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no browser session for {0}")]
    SessionNotFound(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("stale element reference")]
    StaleElement,
    #[error("virtual display failed to start: {0}")]
    DisplayUnavailable(String),
    #[error("failed to spawn {process}: {source}")]
    SpawnFailed {
        process: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
