// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Server-side runtime for a multi-session LLM chat agent.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
pub struct Cli {
    /// SQLite database file (default: platform data dir).
    /// Env: PARLEY_DB
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Listen address for the WebSocket server.
    /// Env: PARLEY_LISTEN
    #[arg(long)]
    pub listen: Option<String>,

    /// Log to stderr at debug level (RUST_LOG still wins when set).
    #[arg(long, short)]
    pub verbose: bool,
}
