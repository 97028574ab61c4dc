// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen() -> String {
    "127.0.0.1:8014".to_string()
}

fn default_stream_removal_secs() -> u64 {
    30
}

fn default_browser_idle_secs() -> i64 {
    900
}

/// Runtime configuration for the server process.
///
/// Values come from environment variables via [`Config::from_env`]; unset
/// variables fall back to the serde defaults, so the struct can also be
/// deserialized from a config file as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.  Defaults to
    /// `<data-dir>/parley/parley.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Address the WebSocket server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Idle TTL in seconds for per-session browser sessions.
    /// A value ≤ 0 disables idle eviction entirely.
    /// Env: `BROWSER_IDLE_TIMEOUT`.
    #[serde(default = "default_browser_idle_secs")]
    pub browser_idle_timeout: i64,

    /// Directory where per-session VNC token files are written for the
    /// companion frontend.  Defaults to `<data-dir>/parley/vnc`.
    #[serde(default)]
    pub vnc_token_dir: Option<PathBuf>,

    /// Explicit Chrome/Chromium executable.  When unset the browser driver
    /// auto-detects an installed binary.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    /// Delay in seconds before a finished stream entry is evicted from the
    /// in-memory registry.  Reconnecting clients within this window resume
    /// from the entry's snapshot.
    #[serde(default = "default_stream_removal_secs")]
    pub stream_removal_delay: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            listen: default_listen(),
            browser_idle_timeout: default_browser_idle_secs(),
            vnc_token_dir: None,
            chrome_executable: None,
            stream_removal_delay: default_stream_removal_secs(),
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PARLEY_DB") {
            if !v.is_empty() {
                cfg.database_path = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("PARLEY_LISTEN") {
            if !v.is_empty() {
                cfg.listen = v;
            }
        }
        if let Ok(v) = std::env::var("BROWSER_IDLE_TIMEOUT") {
            if let Ok(n) = v.trim().parse::<i64>() {
                cfg.browser_idle_timeout = n;
            }
        }
        if let Ok(v) = std::env::var("PARLEY_VNC_TOKEN_DIR") {
            if !v.is_empty() {
                cfg.vnc_token_dir = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("CHROME_EXECUTABLE") {
            if !v.is_empty() {
                cfg.chrome_executable = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("PARLEY_STREAM_REMOVAL_DELAY") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.stream_removal_delay = n;
            }
        }
        cfg
    }

    /// Resolved database path (explicit value or the platform data dir).
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            data_dir().join("parley.db")
        })
    }

    /// Resolved VNC token directory.
    pub fn vnc_token_dir(&self) -> PathBuf {
        self.vnc_token_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("vnc"))
    }

    /// Browser idle TTL as a duration; `None` when eviction is disabled.
    pub fn browser_idle_ttl(&self) -> Option<Duration> {
        if self.browser_idle_timeout <= 0 {
            None
        } else {
            Some(Duration::from_secs(self.browser_idle_timeout as u64))
        }
    }

    /// Stream-entry eviction delay as a duration.
    pub fn stream_removal_delay(&self) -> Duration {
        Duration::from_secs(self.stream_removal_delay)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("parley")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
