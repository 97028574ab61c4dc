// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Registry of connected clients and their session watches.
//!
//! A *watch* is a client's declared interest in a session.  Each watch owns
//! a bounded adapter channel: the stream registry (and direct broadcasts)
//! write [`SessionEvent`]s into it, and a forwarder task wraps them in a
//! topic frame and moves them onto the client's outbound queue.  New stream
//! entries auto-subscribe every existing watch through
//! [`parley_core::SessionWatchers`].

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use parley_core::{SessionEvent, SessionWatchers};

const WATCH_BUFFER: usize = 256;

struct Watch {
    client_id: String,
    tx: mpsc::Sender<SessionEvent>,
    forwarder: JoinHandle<()>,
}

#[derive(Default)]
pub struct WatcherRegistry {
    /// client id → serialized outbound frames
    clients: DashMap<String, mpsc::Sender<String>>,
    /// session id → watches
    watches: DashMap<String, Vec<Watch>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&self, client_id: &str, outbound: mpsc::Sender<String>) {
        self.clients.insert(client_id.to_string(), outbound);
    }

    /// Remove the client and tear down all its watches.
    pub fn unregister_client(&self, client_id: &str) {
        self.clients.remove(client_id);
        for mut entry in self.watches.iter_mut() {
            entry.value_mut().retain(|w| {
                if w.client_id == client_id {
                    w.forwarder.abort();
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Declare interest in a session.  Returns the adapter sender so the
    /// caller can additionally subscribe it to a live stream entry.
    pub fn watch(&self, session_id: &str, client_id: &str) -> Option<mpsc::Sender<SessionEvent>> {
        let outbound = self.clients.get(client_id)?.value().clone();
        let (tx, mut rx) = mpsc::channel::<SessionEvent>(WATCH_BUFFER);
        let topic = format!("session:{session_id}");
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let frame = json!({ "topic": topic, "event": event }).to_string();
                if outbound.send(frame).await.is_err() {
                    break;
                }
            }
        });
        let mut watches = self.watches.entry(session_id.to_string()).or_default();
        // Re-watching replaces the previous watch for this client.
        watches.retain(|w| {
            if w.client_id == client_id {
                w.forwarder.abort();
                false
            } else {
                true
            }
        });
        watches.push(Watch {
            client_id: client_id.to_string(),
            tx: tx.clone(),
            forwarder,
        });
        Some(tx)
    }

    pub fn unwatch(&self, session_id: &str, client_id: &str) {
        if let Some(mut watches) = self.watches.get_mut(session_id) {
            watches.retain(|w| {
                if w.client_id == client_id {
                    w.forwarder.abort();
                    false
                } else {
                    true
                }
            });
        }
    }

    pub fn watcher_count(&self, session_id: &str) -> usize {
        self.watches.get(session_id).map_or(0, |w| w.len())
    }

    /// Fan an event out to every client watching the session, except the
    /// originating client when given.
    pub fn broadcast_to_session(
        &self,
        session_id: &str,
        event: &SessionEvent,
        except_client: Option<&str>,
    ) {
        if let Some(watches) = self.watches.get(session_id) {
            for watch in watches.iter() {
                if except_client == Some(watch.client_id.as_str()) {
                    continue;
                }
                if watch.tx.try_send(event.clone()).is_err() {
                    debug!(
                        session = %session_id,
                        client = %watch.client_id,
                        "dropping broadcast for saturated watcher"
                    );
                }
            }
        }
    }
}

impl SessionWatchers for WatcherRegistry {
    fn watcher_channels(&self, session_id: &str) -> Vec<mpsc::Sender<SessionEvent>> {
        self.watches
            .get(session_id)
            .map(|watches| watches.iter().map(|w| w.tx.clone()).collect())
            .unwrap_or_default()
    }

    fn broadcast_global(&self, topic: &str, payload: Value) {
        let frame = json!({ "topic": topic, "event": payload }).to_string();
        for entry in self.clients.iter() {
            if entry.value().try_send(frame.clone()).is_err() {
                debug!(client = %entry.key(), "dropping global frame for saturated client");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
