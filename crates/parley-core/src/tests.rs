// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios for the session runtime, driven by scripted
//! providers and in-memory stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use parley_model::{
    mock::{ScriptStep, ScriptedProvider},
    ProviderRegistry, Usage,
};
use parley_store::{
    ApprovalStatus, MessageRecord, MessageRole, NewMessage, SessionPatch, SessionStore,
};
use parley_tools::{Tool, ToolDefinition, ToolRegistry, Validation};

use crate::build_history_from_db;
use crate::error::CoreError;
use crate::events::SessionEvent;
use crate::runner::{SessionRunner, SessionWatchers, MAX_TOOL_ROUNDS};
use crate::streams::StreamRegistry;

// ─── Test fixtures ────────────────────────────────────────────────────────────

struct TestWatchers {
    txs: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    global: Mutex<Vec<(String, Value)>>,
}

impl TestWatchers {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            txs: Mutex::new(Vec::new()),
            global: Mutex::new(Vec::new()),
        })
    }

    fn watch(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.txs.lock().unwrap().push(tx);
        rx
    }

    fn global_events(&self) -> Vec<(String, Value)> {
        self.global.lock().unwrap().clone()
    }
}

impl SessionWatchers for TestWatchers {
    fn watcher_channels(&self, _session_id: &str) -> Vec<mpsc::Sender<SessionEvent>> {
        self.txs.lock().unwrap().clone()
    }
    fn broadcast_global(&self, topic: &str, payload: Value) {
        self.global
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
    }
}

/// Echoes its `x` argument.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "echo the x argument".into(),
            operations: HashMap::new(),
        }
    }
    async fn execute(&self, args: Value, _session_id: Option<&str>) -> anyhow::Result<String> {
        Ok(args
            .get("x")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Always fails.
struct BoomTool;

#[async_trait]
impl Tool for BoomTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "boom".into(),
            description: "always fails".into(),
            operations: HashMap::new(),
        }
    }
    async fn execute(&self, _args: Value, _session_id: Option<&str>) -> anyhow::Result<String> {
        anyhow::bail!("kaput")
    }
}

/// Requires an `x` argument at validation time.
struct PickyTool;

#[async_trait]
impl Tool for PickyTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "picky".into(),
            description: "requires x".into(),
            operations: HashMap::new(),
        }
    }
    fn validate(&self, args: &Value) -> Validation {
        if args.get("x").is_some() {
            Validation::Valid
        } else {
            Validation::invalid("picky: missing required argument x")
        }
    }
    async fn execute(&self, _args: Value, _session_id: Option<&str>) -> anyhow::Result<String> {
        Ok("ok".into())
    }
}

/// Completes successfully while simulating a user cancel arriving during
/// its execution.
struct TripTool {
    streams: Arc<StreamRegistry>,
}

#[async_trait]
impl Tool for TripTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "trip".into(),
            description: "completes, then the user cancels".into(),
            operations: HashMap::new(),
        }
    }
    async fn execute(&self, _args: Value, session_id: Option<&str>) -> anyhow::Result<String> {
        if let Some(sid) = session_id {
            if let Some(token) = self.streams.mark_aborted(sid) {
                token.cancel();
            }
        }
        Ok("A done".into())
    }
}

struct Harness {
    runner: SessionRunner,
    store: SessionStore,
    streams: Arc<StreamRegistry>,
    watchers: Arc<TestWatchers>,
    provider: Arc<ScriptedProvider>,
}

fn harness(scripts: Vec<Vec<ScriptStep>>) -> Harness {
    let store = SessionStore::open_in_memory().unwrap();
    let streams = Arc::new(StreamRegistry::new(Duration::from_secs(5)));
    let provider = Arc::new(ScriptedProvider::new(scripts));
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(BoomTool);
    tools.register(PickyTool);
    tools.register(TripTool {
        streams: Arc::clone(&streams),
    });
    let watchers = TestWatchers::new();
    let runner = SessionRunner::new(
        store.clone(),
        Arc::clone(&streams),
        Arc::new(providers),
        Arc::new(tools),
        watchers.clone(),
    );
    Harness {
        runner,
        store,
        streams,
        watchers,
        provider,
    }
}

async fn titled_session(h: &Harness) -> String {
    let session = h
        .store
        .create_session(Some("Test".into()), Some("mock:mock-model".into()), None)
        .await
        .unwrap();
    session.id
}

fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

fn done_events(events: &[SessionEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Done { has_tool_calls } => Some(*has_tool_calls),
            _ => None,
        })
        .collect()
}

async fn messages(h: &Harness, session_id: &str) -> Vec<MessageRecord> {
    h.store
        .get_session(session_id)
        .await
        .unwrap()
        .unwrap()
        .messages
}

/// Poll until a background round settles.
async fn wait_until<F>(h: &Harness, session_id: &str, cond: F) -> Vec<MessageRecord>
where
    F: Fn(&[MessageRecord]) -> bool,
{
    for _ in 0..200 {
        let msgs = messages(h, session_id).await;
        if cond(&msgs) {
            return msgs;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn pending_tool_message(calls: Vec<(&str, &str, Value)>) -> NewMessage {
    let mut msg = NewMessage::assistant("");
    msg.tool_calls = calls
        .into_iter()
        .map(|(id, name, arguments)| parley_model::ToolCallData {
            id: id.into(),
            name: name.into(),
            arguments,
        })
        .collect();
    msg.approval_status = Some(ApprovalStatus::Pending);
    msg
}

// ─── S1: plain turn without tools ─────────────────────────────────────────────

#[tokio::test]
async fn plain_turn_streams_and_persists() {
    let h = harness(vec![ScriptedProvider::text_round(
        "Hi there",
        Usage {
            input_tokens: 3,
            output_tokens: 2,
        },
    )]);
    let sid = titled_session(&h).await;
    let mut rx = h.watchers.watch();

    h.runner.run_user_turn(&sid, "Hello".into(), vec![]).await.unwrap();

    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].role, MessageRole::User);
    assert_eq!(msgs[0].raw_token_count, Some(3));
    let assistant = &msgs[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.content, "Hi there");
    assert_eq!(assistant.model.as_deref(), Some("mock:mock-model"));
    assert!(assistant.approval_status.is_none());
    assert_eq!(assistant.raw_token_count, Some(2));
    assert!(assistant.llm_request.is_some());

    let session = h.store.get_session_record(&sid).await.unwrap().unwrap();
    assert_eq!(session.token_usage.input_tokens, 3);
    assert_eq!(session.token_usage.output_tokens, 2);

    let events = drain(&mut rx);
    assert!(matches!(events[0], SessionEvent::Snapshot { .. }));
    assert_eq!(done_events(&events), vec![false]);
}

// ─── S2: auto-approve tool round ──────────────────────────────────────────────

#[tokio::test]
async fn auto_approve_runs_tools_and_recurses() {
    let h = harness(vec![
        ScriptedProvider::tool_round(
            "tc1",
            "echo",
            json!({"x": "hi"}),
            Usage {
                input_tokens: 5,
                output_tokens: 1,
            },
        ),
        ScriptedProvider::text_round(
            "all done",
            Usage {
                input_tokens: 8,
                output_tokens: 2,
            },
        ),
    ]);
    let sid = titled_session(&h).await;
    h.store
        .update_session(
            &sid,
            SessionPatch {
                auto_approve: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut rx = h.watchers.watch();

    h.runner.run_user_turn(&sid, "go".into(), vec![]).await.unwrap();

    let msgs = messages(&h, &sid).await;
    // user, assistant(tool call), tool, assistant(text)
    assert_eq!(msgs.len(), 4);
    let first_assistant = &msgs[1];
    assert_eq!(first_assistant.tool_calls.len(), 1);
    assert_eq!(first_assistant.approval_status, Some(ApprovalStatus::Approved));
    assert_eq!(first_assistant.tool_results.len(), 1);
    assert_eq!(first_assistant.tool_results[0].output, "hi");
    assert_eq!(msgs[2].role, MessageRole::Tool);
    assert_eq!(msgs[2].tool_results[0].output, "hi");
    assert_eq!(msgs[3].content, "all done");

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::AutoApproved { message_id } if *message_id == first_assistant.id)));
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::ToolResult { result } if result.output == "hi" && !result.is_error)
    ));
    // Exactly one terminal done, with no tool calls outstanding.
    assert_eq!(done_events(&events), vec![false]);

    // Both rounds' usage accumulate on the session.
    let session = h.store.get_session_record(&sid).await.unwrap().unwrap();
    assert_eq!(session.token_usage.input_tokens, 13);
    assert_eq!(session.token_usage.output_tokens, 3);
}

// ─── S3: deny ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn deny_writes_results_without_new_round() {
    let h = harness(vec![]);
    let sid = titled_session(&h).await;
    let m1 = h
        .store
        .add_message(&sid, pending_tool_message(vec![("tc1", "echo", json!({}))]))
        .await
        .unwrap();

    let tool_message = h.runner.deny(&sid, &m1.id).await.unwrap();

    let parent = h.store.get_message(&m1.id).await.unwrap().unwrap();
    assert_eq!(parent.approval_status, Some(ApprovalStatus::Denied));
    assert_eq!(parent.tool_results[0].output, "Tool call denied by user");
    assert!(parent.tool_results[0].is_error);
    assert_eq!(tool_message.role, MessageRole::Tool);
    assert_eq!(tool_message.tool_results[0].tool_call_id, "tc1");

    // No LLM round was opened.
    assert!(h.provider.last_request.lock().unwrap().is_none());
    // Denying again is a conflict.
    assert!(matches!(
        h.runner.deny(&sid, &m1.id).await,
        Err(CoreError::Conflict)
    ));
}

// ─── S4: mid-round cancel ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_between_tool_calls_interrupts_round() {
    let h = harness(vec![]);
    let sid = titled_session(&h).await;
    let m = h
        .store
        .add_message(
            &sid,
            pending_tool_message(vec![
                ("tcA", "trip", json!({})),
                ("tcB", "echo", json!({"x": "b"})),
                ("tcC", "echo", json!({"x": "c"})),
            ]),
        )
        .await
        .unwrap();
    assert!(h.store.atomic_approve(&m.id).await.unwrap());
    h.streams.create(&sid, &m.id, "mock:mock-model");
    let mut rx = h.watchers.watch();
    h.streams.subscribe(&sid, h.watchers.watcher_channels(&sid)[0].clone());

    h.runner
        .execute_tool_round(&sid, &m.id, "mock:mock-model", 0)
        .await
        .unwrap();

    let parent = h.store.get_message(&m.id).await.unwrap().unwrap();
    assert_eq!(parent.approval_status, Some(ApprovalStatus::Denied));
    let by_id: HashMap<&str, &parley_model::ToolResultData> = parent
        .tool_results
        .iter()
        .map(|r| (r.tool_call_id.as_str(), r))
        .collect();
    assert_eq!(by_id["tcA"].output, "A done");
    assert!(!by_id["tcA"].is_error);
    assert_eq!(by_id["tcB"].output, "Tool execution was interrupted by user.");
    assert!(by_id["tcB"].is_error);
    assert_eq!(by_id["tcC"].output, "Tool execution was interrupted by user.");
    assert!(by_id["tcC"].is_error);

    let events = drain(&mut rx);
    assert_eq!(done_events(&events), vec![false]);
    // tcB and tcC never executed.
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::ToolResult { result } if result.output == "b" || result.output == "c")));
}

// ─── S5: compaction trigger ───────────────────────────────────────────────────

#[tokio::test]
async fn turn_at_high_utilisation_triggers_compaction() {
    let h = harness(vec![ScriptedProvider::text_round(
        "reply",
        Usage {
            input_tokens: 55_000,
            output_tokens: 10_000,
        },
    )]);
    let sid = titled_session(&h).await;
    h.store
        .set_setting(
            parley_store::settings::COMPACTION_AUTO_THRESHOLD_PCT,
            "90",
        )
        .await
        .unwrap();
    for i in 0..3 {
        h.store
            .add_message(&sid, NewMessage::user(format!("warmup {i}")))
            .await
            .unwrap();
    }
    let mut rx = h.watchers.watch();

    h.runner.run_user_turn(&sid, "big".into(), vec![]).await.unwrap();

    let events = drain(&mut rx);
    let compaction = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Compaction { message } => Some(message.clone()),
            _ => None,
        })
        .expect("compaction event");
    assert_eq!(compaction.role, MessageRole::Compaction);
    let verbatim = compaction.verbatim_count.unwrap();
    assert!(verbatim >= 2);

    // The rebuilt prompt honours the cut: summary pair, then exactly the
    // verbatim tail, then whatever follows the compaction (nothing yet).
    let msgs = messages(&h, &sid).await;
    let parts = build_history_from_db(&msgs);
    assert_eq!(parts.len(), 2 + verbatim as usize);
    assert!(parts[0].content.starts_with("[Summary of conversation"));
}

// ─── S6: cross-client sync ────────────────────────────────────────────────────

#[tokio::test]
async fn watchers_receive_identical_event_streams() {
    let h = harness(vec![ScriptedProvider::text_round(
        "shared",
        Usage {
            input_tokens: 1,
            output_tokens: 1,
        },
    )]);
    let sid = titled_session(&h).await;
    let mut rx_a = h.watchers.watch();
    let mut rx_b = h.watchers.watch();

    h.runner.run_user_turn(&sid, "hello".into(), vec![]).await.unwrap();

    let a = drain(&mut rx_a);
    let b = drain(&mut rx_b);
    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());
    match (&a[0], &b[0]) {
        (
            SessionEvent::Snapshot {
                content: ca,
                tool_calls: ta,
                ..
            },
            SessionEvent::Snapshot {
                content: cb,
                tool_calls: tb,
                ..
            },
        ) => {
            assert_eq!(ca, "");
            assert_eq!(cb, "");
            assert!(ta.is_empty() && tb.is_empty());
        }
        other => panic!("expected snapshots, got {other:?}"),
    }
    let render = |events: &[SessionEvent]| {
        events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(render(&a), render(&b));
}

// ─── Approval idempotence under concurrency ───────────────────────────────────

#[tokio::test]
async fn concurrent_approves_run_exactly_one_round() {
    let h = harness(vec![
        ScriptedProvider::text_round("after tools", Usage::default()),
    ]);
    let sid = titled_session(&h).await;
    let m = h
        .store
        .add_message(
            &sid,
            pending_tool_message(vec![("tc1", "echo", json!({"x": "once"}))]),
        )
        .await
        .unwrap();

    let (r1, r2) = tokio::join!(
        h.runner.approve(&sid, &m.id),
        h.runner.approve(&sid, &m.id),
    );
    let outcomes = [r1.is_ok(), r2.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(
        [r1, r2].into_iter().find(|r| r.is_err()).unwrap(),
        Err(CoreError::Conflict)
    ));

    // Exactly one tool message and one follow-up assistant reply appear.
    let msgs = wait_until(&h, &sid, |msgs| {
        msgs.iter().any(|m| m.content == "after tools")
    })
    .await;
    let tool_messages = msgs.iter().filter(|m| m.role == MessageRole::Tool).count();
    assert_eq!(tool_messages, 1);
    let parent = h.store.get_message(&m.id).await.unwrap().unwrap();
    assert_eq!(parent.approval_status, Some(ApprovalStatus::Approved));
}

// ─── Tool failure semantics ───────────────────────────────────────────────────

#[tokio::test]
async fn failed_tool_cancels_the_rest_of_the_round() {
    let h = harness(vec![ScriptedProvider::text_round(
        "model saw the errors",
        Usage::default(),
    )]);
    let sid = titled_session(&h).await;
    let m = h
        .store
        .add_message(
            &sid,
            pending_tool_message(vec![
                ("tc1", "boom", json!({})),
                ("tc2", "echo", json!({"x": "skipped"})),
            ]),
        )
        .await
        .unwrap();
    assert!(h.store.atomic_approve(&m.id).await.unwrap());
    h.streams.create(&sid, &m.id, "mock:mock-model");

    h.runner
        .execute_tool_round(&sid, &m.id, "mock:mock-model", 0)
        .await
        .unwrap();

    let parent = h.store.get_message(&m.id).await.unwrap().unwrap();
    assert_eq!(parent.tool_results[0].output, "Error: kaput");
    assert!(parent.tool_results[0].is_error);
    assert_eq!(parent.tool_results[1].output, "Cancelled: previous tool failed");
    assert!(parent.tool_results[1].is_error);
    // Errors are local: the loop returned to the model afterwards.
    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.last().unwrap().content, "model saw the errors");
}

#[tokio::test]
async fn validation_failure_poisons_the_whole_round() {
    let h = harness(vec![ScriptedProvider::text_round(
        "let me fix that",
        Usage::default(),
    )]);
    let sid = titled_session(&h).await;
    let m = h
        .store
        .add_message(
            &sid,
            pending_tool_message(vec![
                ("tc1", "picky", json!({})),
                ("tc2", "echo", json!({"x": "never"})),
            ]),
        )
        .await
        .unwrap();
    assert!(h.store.atomic_approve(&m.id).await.unwrap());
    h.streams.create(&sid, &m.id, "mock:mock-model");

    h.runner
        .execute_tool_round(&sid, &m.id, "mock:mock-model", 0)
        .await
        .unwrap();

    let parent = h.store.get_message(&m.id).await.unwrap().unwrap();
    assert!(parent.tool_results[0].output.contains("missing required argument x"));
    assert_eq!(
        parent.tool_results[1].output,
        "Cancelled: another tool failed validation"
    );
    // The round still recursed so the model can correct itself.
    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.last().unwrap().content, "let me fix that");
}

// ─── Round cap ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn round_cap_returns_silently() {
    let h = harness(vec![]);
    let sid = titled_session(&h).await;
    let m = h
        .store
        .add_message(
            &sid,
            pending_tool_message(vec![("tc1", "echo", json!({"x": "hi"}))]),
        )
        .await
        .unwrap();
    h.streams.create(&sid, &m.id, "mock:mock-model");

    h.runner
        .execute_tool_round(&sid, &m.id, "mock:mock-model", MAX_TOOL_ROUNDS)
        .await
        .unwrap();

    // Nothing executed, nothing persisted: the trailing assistant message
    // keeps its unanswered tool calls.
    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].tool_results.is_empty());
}

// ─── Provider errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_failure_surfaces_classified_error() {
    let h = harness(vec![vec![ScriptStep::Fail(
        "429 Too Many Requests".into(),
    )]]);
    let sid = titled_session(&h).await;
    let mut rx = h.watchers.watch();

    h.runner.run_user_turn(&sid, "hi".into(), vec![]).await.unwrap();

    let events = drain(&mut rx);
    let error = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Error { payload } => Some(payload.clone()),
            _ => None,
        })
        .expect("error event");
    assert_eq!(error.code, "RATE_LIMIT");
    assert!(error.recoverable);
    // Terminal is error, never done as well.
    assert!(done_events(&events).is_empty());
    // No assistant message was persisted for the failed round.
    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.len(), 1);
}

// ─── Cancellation before the round starts ─────────────────────────────────────

#[tokio::test]
async fn pre_round_cancel_persists_interruption_marker() {
    let h = harness(vec![]);
    let sid = titled_session(&h).await;
    h.streams.create(&sid, "seed", "mock:mock-model");
    assert!(h.runner.cancel(&sid));
    let mut rx = h.watchers.watch();
    h.streams.subscribe(&sid, h.watchers.watcher_channels(&sid)[0].clone());

    h.runner
        .stream_next_round(&sid, "mock:mock-model", 0)
        .await
        .unwrap();

    let msgs = messages(&h, &sid).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].content, "[Interrupted by user]");
    assert_eq!(msgs[0].role, MessageRole::Assistant);
    assert!(msgs[0].approval_status.is_none());
    let events = drain(&mut rx);
    assert_eq!(done_events(&events), vec![false]);
}

#[tokio::test]
async fn cancel_during_stream_persists_partial_content() {
    let h = harness(vec![vec![
        ScriptStep::Chunk(parley_model::StreamChunk::Token("partial ".into())),
        ScriptStep::WaitCancelled,
    ]]);
    let sid = titled_session(&h).await;

    let runner = h.runner.clone();
    let sid2 = sid.clone();
    let turn = tokio::spawn(async move {
        runner.run_user_turn(&sid2, "go".into(), vec![]).await
    });
    // Wait for the entry to exist, then cancel mid-stream.
    for _ in 0..100 {
        if h.streams.snapshot(&sid).is_some_and(|s| !s.content.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.runner.cancel(&sid));
    turn.await.unwrap().unwrap();

    let msgs = messages(&h, &sid).await;
    let assistant = msgs.last().unwrap();
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.content, "partial ");
    assert!(assistant.approval_status.is_none());
}

// ─── Auto-titling ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn default_titled_session_gets_generated_title() {
    let h = harness(vec![ScriptedProvider::text_round(
        "sure",
        Usage::default(),
    )]);
    let session = h
        .store
        .create_session(None, Some("mock:mock-model".into()), None)
        .await
        .unwrap();

    h.runner
        .run_user_turn(&session.id, "name this".into(), vec![])
        .await
        .unwrap();

    let record = h
        .store
        .get_session_record(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(record.title, parley_store::DEFAULT_SESSION_TITLE);
    let globals = h.watchers.global_events();
    assert!(globals.iter().any(|(topic, _)| topic == "sessions"));
}
