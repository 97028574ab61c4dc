// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod service;
mod watchers;
mod ws;

pub use service::{error_code, handle_command, AppState, ClientCommand, CommandFrame};
pub use watchers::WatcherRegistry;
pub use ws::router;
