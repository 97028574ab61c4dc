// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use parley_browser::{BrowserManager, BrowserManagerConfig, LatestImageStore};
use parley_config::Config;
use parley_core::{SessionRunner, StreamRegistry};
use parley_model::{mock::MockProvider, ProviderRegistry};
use parley_server::{AppState, WatcherRegistry};
use parley_store::SessionStore;
use parley_tools::ToolRegistry;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SessionStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    info!(db = %db_path.display(), "store opened");

    let streams = Arc::new(StreamRegistry::new(config.stream_removal_delay()));
    // Real provider adapters register here; the deterministic mock keeps
    // the server usable without upstream credentials.
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(MockProvider));
    let providers = Arc::new(providers);
    // Session-scoped tools (browser, screenshot, shell, ...) are plugged in
    // by the embedding deployment.
    let tools = Arc::new(ToolRegistry::new());
    let watchers = Arc::new(WatcherRegistry::new());
    let browser = BrowserManager::new(BrowserManagerConfig {
        idle_ttl: config.browser_idle_ttl(),
        token_dir: config.vnc_token_dir(),
        chrome_executable: config.chrome_executable.clone(),
    });
    let images = Arc::new(LatestImageStore::new());

    let runner = SessionRunner::new(
        store.clone(),
        Arc::clone(&streams),
        Arc::clone(&providers),
        Arc::clone(&tools),
        watchers.clone(),
    );

    let state = AppState {
        runner,
        store,
        streams,
        watchers,
        browser: Arc::clone(&browser),
        images,
    };

    let app = parley_server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(listen = %config.listen, "parley server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down; destroying browser sessions");
    browser.destroy_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
