// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory registry of active (or recently finished) generations.
//!
//! One entry per session fans a single producer out to any number of
//! subscribers.  Fan-out is non-blocking: each subscriber owns a bounded
//! channel and a subscriber whose buffer is full is disconnected rather
//! than allowed to stall the producer.  A disconnected client re-subscribes
//! and resumes from the snapshot, so the cut is lossless at the protocol
//! level.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_model::{ToolCallData, Usage};

use crate::events::{ErrorPayload, SessionEvent};

pub type SubscriberId = String;

struct SubscriberSlot {
    id: SubscriberId,
    tx: mpsc::Sender<SessionEvent>,
}

struct StreamEntry {
    assistant_id: String,
    content: String,
    model: String,
    tool_calls: Vec<ToolCallData>,
    has_tool_calls: bool,
    done: bool,
    error: Option<ErrorPayload>,
    usage: Option<Usage>,
    aborted: bool,
    cancel: CancellationToken,
    generation: u64,
    llm_request: Option<Value>,
    subscribers: Vec<SubscriberSlot>,
}

/// Read-only view of an entry's current state.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub assistant_id: String,
    pub content: String,
    pub model: String,
    pub tool_calls: Vec<ToolCallData>,
    pub has_tool_calls: bool,
    pub done: bool,
    pub error: Option<ErrorPayload>,
    pub usage: Option<Usage>,
    pub aborted: bool,
    pub generation: u64,
    pub llm_request: Option<Value>,
}

pub struct StreamRegistry {
    entries: Mutex<HashMap<String, StreamEntry>>,
    next_generation: AtomicU64,
    removal_delay: Duration,
}

impl StreamRegistry {
    pub fn new(removal_delay: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            removal_delay,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamEntry>> {
        // A poisoned registry mutex means a panic mid-mutation; entries hold
        // only plain data, so continuing with the inner map is safe.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a fresh entry for a new round, returning its abort token.
    ///
    /// An existing `done` entry is silently replaced.  Replacing a live one
    /// violates the per-session single-writer rule; the registry logs and
    /// overwrites.
    pub fn create(&self, session_id: &str, assistant_id: &str, model: &str) -> CancellationToken {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        if let Some(prior) = entries.get(session_id) {
            if !prior.done {
                warn!(
                    session = %session_id,
                    "replacing a live stream entry; caller violated the single-writer rule"
                );
            }
        }
        let cancel = CancellationToken::new();
        entries.insert(
            session_id.to_string(),
            StreamEntry {
                assistant_id: assistant_id.to_string(),
                content: String::new(),
                model: model.to_string(),
                tool_calls: Vec::new(),
                has_tool_calls: false,
                done: false,
                error: None,
                usage: None,
                aborted: false,
                cancel: cancel.clone(),
                generation,
                llm_request: None,
                subscribers: Vec::new(),
            },
        );
        cancel
    }

    /// Reuse an entry across tool-loop rounds: reset the accumulated
    /// content and tool calls, keep subscribers and the abort token, bump
    /// the generation.  Returns `None` when no entry exists.
    pub fn continue_round(
        &self,
        session_id: &str,
        new_assistant_id: &str,
    ) -> Option<CancellationToken> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        let entry = entries.get_mut(session_id)?;
        entry.assistant_id = new_assistant_id.to_string();
        entry.content.clear();
        entry.tool_calls.clear();
        entry.has_tool_calls = false;
        entry.done = false;
        entry.error = None;
        entry.generation = generation;
        Some(entry.cancel.clone())
    }

    pub fn snapshot(&self, session_id: &str) -> Option<StreamSnapshot> {
        let entries = self.lock();
        entries.get(session_id).map(|e| StreamSnapshot {
            assistant_id: e.assistant_id.clone(),
            content: e.content.clone(),
            model: e.model.clone(),
            tool_calls: e.tool_calls.clone(),
            has_tool_calls: e.has_tool_calls,
            done: e.done,
            error: e.error.clone(),
            usage: e.usage,
            aborted: e.aborted,
            generation: e.generation,
            llm_request: e.llm_request.clone(),
        })
    }

    pub fn is_aborted(&self, session_id: &str) -> bool {
        self.lock().get(session_id).is_some_and(|e| e.aborted)
    }

    /// Store the request body snapshot for diagnostics.
    pub fn set_llm_request(&self, session_id: &str, request: Value) {
        if let Some(entry) = self.lock().get_mut(session_id) {
            entry.llm_request = Some(request);
        }
    }

    /// Mark the entry aborted and return its token for cancellation.
    ///
    /// Mutation happens synchronously under the registry lock, so no
    /// `token`/`tool_call` pushed after this call can reach the entry's
    /// accumulated state.
    pub fn mark_aborted(&self, session_id: &str) -> Option<CancellationToken> {
        let mut entries = self.lock();
        let entry = entries.get_mut(session_id)?;
        entry.aborted = true;
        Some(entry.cancel.clone())
    }

    /// Apply an event to the entry, then fan it out to every subscriber in
    /// insertion order.  Unknown sessions are a no-op (late chunks after
    /// eviction land here).
    pub fn push_event(&self, session_id: &str, event: SessionEvent) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(session_id) else {
            debug!(session = %session_id, "dropping event for evicted stream entry");
            return;
        };
        match &event {
            SessionEvent::Token { content } if !entry.aborted => {
                entry.content.push_str(content);
            }
            SessionEvent::Token { .. } => {}
            SessionEvent::ToolCall { call } if !entry.aborted => {
                entry.tool_calls.push(call.clone());
                entry.has_tool_calls = true;
            }
            SessionEvent::ToolCall { .. } => {}
            SessionEvent::Usage { usage } => {
                entry.usage = Some(*usage);
            }
            SessionEvent::Done { has_tool_calls } => {
                entry.done = true;
                entry.has_tool_calls = *has_tool_calls;
            }
            SessionEvent::Error { payload } => {
                entry.error = Some(payload.clone());
                entry.done = true;
            }
            _ => {}
        }
        deliver(entry, event, session_id);
    }

    /// Add a subscriber and immediately deliver the current snapshot; a
    /// finished entry additionally replays its last usage and terminal
    /// event so reconnecting clients converge without waiting.
    ///
    /// Returns `None` when the session has no entry.
    pub fn subscribe(
        &self,
        session_id: &str,
        tx: mpsc::Sender<SessionEvent>,
    ) -> Option<SubscriberId> {
        let mut entries = self.lock();
        let entry = entries.get_mut(session_id)?;
        let snapshot = SessionEvent::Snapshot {
            assistant_id: entry.assistant_id.clone(),
            content: entry.content.clone(),
            model: entry.model.clone(),
            tool_calls: entry.tool_calls.clone(),
        };
        let mut backlog = vec![snapshot];
        if entry.done {
            if let Some(usage) = entry.usage {
                backlog.push(SessionEvent::Usage { usage });
            }
            backlog.push(match &entry.error {
                Some(payload) => SessionEvent::Error {
                    payload: payload.clone(),
                },
                None => SessionEvent::done(entry.has_tool_calls),
            });
        }
        for event in backlog {
            if tx.try_send(event).is_err() {
                return None;
            }
        }
        let id = Uuid::new_v4().to_string();
        entry.subscribers.push(SubscriberSlot {
            id: id.clone(),
            tx,
        });
        Some(id)
    }

    pub fn unsubscribe(&self, session_id: &str, subscriber: &SubscriberId) {
        if let Some(entry) = self.lock().get_mut(session_id) {
            entry.subscribers.retain(|s| &s.id != subscriber);
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map_or(0, |e| e.subscribers.len())
    }

    /// Evict the entry after a delay, unless a newer round has taken over
    /// the session in the meantime (the generation guard) or the entry has
    /// been restarted and is no longer `done`.
    pub fn schedule_removal(self: &Arc<Self>, session_id: &str, delay: Option<Duration>) {
        let registry = Arc::clone(self);
        let session_id = session_id.to_string();
        let delay = delay.unwrap_or(registry.removal_delay);
        let Some(observed) = self.snapshot(&session_id).map(|s| s.generation) else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut entries = registry.lock();
            if let Some(entry) = entries.get(&session_id) {
                if entry.done && entry.generation == observed {
                    entries.remove(&session_id);
                    debug!(session = %session_id, "evicted finished stream entry");
                }
            }
        });
    }
}

/// Fan out one event.  Subscribers that cannot keep up (full buffer) or are
/// gone (closed channel) are dropped from the set.
fn deliver(entry: &mut StreamEntry, event: SessionEvent, session_id: &str) {
    let mut dropped: Vec<SubscriberId> = Vec::new();
    for slot in &entry.subscribers {
        match slot.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session = %session_id,
                    subscriber = %slot.id,
                    "subscriber buffer full; disconnecting slow consumer"
                );
                dropped.push(slot.id.clone());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                dropped.push(slot.id.clone());
            }
        }
    }
    if !dropped.is_empty() {
        entry.subscribers.retain(|s| !dropped.contains(&s.id));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Arc<StreamRegistry> {
        Arc::new(StreamRegistry::new(Duration::from_millis(20)))
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn create_and_snapshot() {
        let reg = registry();
        reg.create("s1", "a1", "mock:mock-model");
        let snap = reg.snapshot("s1").unwrap();
        assert_eq!(snap.assistant_id, "a1");
        assert!(!snap.done);
        assert!(!snap.aborted);
    }

    #[tokio::test]
    async fn push_accumulates_content_and_tool_calls() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        reg.push_event("s1", SessionEvent::token("Hi"));
        reg.push_event("s1", SessionEvent::token(" there"));
        reg.push_event(
            "s1",
            SessionEvent::ToolCall {
                call: ToolCallData {
                    id: "tc1".into(),
                    name: "echo".into(),
                    arguments: json!({}),
                },
            },
        );
        let snap = reg.snapshot("s1").unwrap();
        assert_eq!(snap.content, "Hi there");
        assert_eq!(snap.tool_calls.len(), 1);
        assert!(snap.has_tool_calls);
    }

    #[tokio::test]
    async fn push_to_unknown_session_is_noop() {
        let reg = registry();
        reg.push_event("ghost", SessionEvent::token("x"));
    }

    #[tokio::test]
    async fn subscriber_sees_events_in_push_order() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        let (tx, mut rx) = mpsc::channel(16);
        reg.subscribe("s1", tx).unwrap();
        reg.push_event("s1", SessionEvent::token("a"));
        reg.push_event("s1", SessionEvent::token("b"));
        reg.push_event("s1", SessionEvent::done(false));
        let events = drain(&mut rx);
        assert!(matches!(events[0], SessionEvent::Snapshot { .. }));
        assert!(matches!(&events[1], SessionEvent::Token { content } if content == "a"));
        assert!(matches!(&events[2], SessionEvent::Token { content } if content == "b"));
        assert!(matches!(events[3], SessionEvent::Done { .. }));
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot_and_terminal_replay() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        reg.push_event("s1", SessionEvent::token("hello"));
        reg.push_event(
            "s1",
            SessionEvent::Usage {
                usage: Usage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
            },
        );
        reg.push_event("s1", SessionEvent::done(false));

        let (tx, mut rx) = mpsc::channel(16);
        reg.subscribe("s1", tx).unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3, "snapshot + usage + done");
        assert!(matches!(&events[0], SessionEvent::Snapshot { content, .. } if content == "hello"));
        assert!(matches!(events[1], SessionEvent::Usage { .. }));
        assert!(matches!(events[2], SessionEvent::Done { .. }));
    }

    #[tokio::test]
    async fn aborted_entry_drops_token_mutation_but_fans_out() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        reg.push_event("s1", SessionEvent::token("kept"));
        let token = reg.mark_aborted("s1").unwrap();
        token.cancel();
        let (tx, mut rx) = mpsc::channel(16);
        reg.subscribe("s1", tx).unwrap();
        reg.push_event("s1", SessionEvent::token("[Interrupted by user]"));
        assert_eq!(reg.snapshot("s1").unwrap().content, "kept");
        let events = drain(&mut rx);
        // The interrupt marker still reaches subscribers.
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Token { content } if content.contains("Interrupted"))));
    }

    #[tokio::test]
    async fn continue_round_keeps_subscribers_and_token() {
        let reg = registry();
        let t1 = reg.create("s1", "a1", "m");
        let (tx, mut rx) = mpsc::channel(16);
        reg.subscribe("s1", tx).unwrap();
        let gen1 = reg.snapshot("s1").unwrap().generation;
        reg.push_event("s1", SessionEvent::token("round1"));

        let t2 = reg.continue_round("s1", "a2").unwrap();
        assert!(t2.is_cancelled() == t1.is_cancelled());
        let snap = reg.snapshot("s1").unwrap();
        assert_eq!(snap.assistant_id, "a2");
        assert_eq!(snap.content, "");
        assert!(snap.generation > gen1);
        assert_eq!(reg.subscriber_count("s1"), 1);

        reg.push_event("s1", SessionEvent::token("round2"));
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(SessionEvent::Token { content }) if content == "round2"));
    }

    #[tokio::test]
    async fn continue_round_without_entry_returns_none() {
        let reg = registry();
        assert!(reg.continue_round("ghost", "a1").is_none());
    }

    #[tokio::test]
    async fn scheduled_removal_respects_generation() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        reg.push_event("s1", SessionEvent::done(false));
        reg.schedule_removal("s1", Some(Duration::from_millis(10)));
        // A new round claims the session before the delay expires.
        reg.create("s1", "a2", "m");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(reg.snapshot("s1").is_some(), "newer generation survives");
    }

    #[tokio::test]
    async fn scheduled_removal_evicts_done_entry() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        reg.push_event("s1", SessionEvent::done(false));
        reg.schedule_removal("s1", Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(reg.snapshot("s1").is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_not_blocking() {
        let reg = registry();
        reg.create("s1", "a1", "m");
        let (tx, _rx) = mpsc::channel(1);
        reg.subscribe("s1", tx).unwrap();
        // Snapshot already fills the 1-slot buffer; the next push overflows
        // and must drop the subscriber rather than stall.
        reg.push_event("s1", SessionEvent::token("a"));
        assert_eq!(reg.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn distinct_sessions_have_distinct_entries() {
        let reg = registry();
        reg.create("a", "a1", "m");
        reg.create("b", "b1", "m");
        reg.push_event("a", SessionEvent::token("A"));
        reg.push_event("b", SessionEvent::token("B"));
        assert_eq!(reg.snapshot("a").unwrap().content, "A");
        assert_eq!(reg.snapshot("b").unwrap().content, "B");
    }
}
