// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Compaction: summarise the old prefix of a conversation while keeping a
//! verbatim tail of recent messages, and the auto-trigger that invokes it
//! when context utilisation crosses the configured threshold.
//!
//! Compaction never deletes messages; it appends a `compaction` message
//! that `build_history_from_db` honours as a cut-point.

use tracing::{info, warn};

use parley_model::{catalog, PromptMessage, ProviderRegistry, Usage};
use parley_store::{settings, MessageRecord, MessageRole, NewMessage, SessionStore};

use crate::context::DEFAULT_VERBATIM_COUNT;
use crate::error::CoreError;

const SUMMARIZE_PROMPT: &str = "\
You are a context compaction assistant. Summarise the conversation below in a \
concise, information-dense way. Preserve all key facts, decisions, tool usage \
results, file names, and open questions that may matter for future turns. The \
summary will stand in for the original history, so nothing essential may be \
lost.";

const TOOL_RESULT_PREVIEW_CHARS: usize = 500;

const MIN_MESSAGES_TO_COMPACT: usize = 4;

/// Per-message token estimate for context accounting.
///
/// Prefers the stored count when one exists (the provider's own number is
/// strictly better than any heuristic), then falls back to 4 chars/token
/// across content and tool payloads.  Images cost a flat 765 tokens.
pub fn estimate_message_tokens(message: &MessageRecord) -> usize {
    if let Some(t) = message.token_count {
        return t as usize;
    }
    if let Some(t) = message.raw_token_count {
        return t as usize;
    }
    let mut chars = message.content.len();
    for tc in &message.tool_calls {
        chars += tc.name.len() + tc.arguments.to_string().len();
    }
    for tr in &message.tool_results {
        chars += tr.output.len();
    }
    chars += message.images.len() * 765 * 4;
    (chars / 4).max(1)
}

/// How many trailing messages stay verbatim after a compaction.
///
/// Walks the history from the end, accumulating token estimates until the
/// verbatim budget (`context_window * pct / 100`) would be exceeded or
/// fewer than two messages would remain to summarise.
pub fn calculate_verbatim_count(
    messages: &[MessageRecord],
    context_window: i64,
    pct: u32,
) -> usize {
    if pct == 0 || messages.is_empty() {
        return 0;
    }
    if context_window <= 0 {
        return DEFAULT_VERBATIM_COUNT.min(messages.len().saturating_sub(2));
    }
    let budget = (context_window as u64).saturating_mul(pct as u64) / 100;
    let mut count = 0usize;
    let mut cumulative = 0u64;
    for message in messages.iter().rev() {
        // Including this message must leave at least two to summarise.
        if messages.len() - count <= 2 {
            break;
        }
        let tokens = estimate_message_tokens(message) as u64;
        if cumulative + tokens > budget {
            break;
        }
        cumulative += tokens;
        count += 1;
    }
    count.max(2.min(messages.len().saturating_sub(2)))
}

/// Render a message list as a human-readable transcript for the
/// summarisation prompt.
fn render_transcript(messages: &[MessageRecord]) -> String {
    messages
        .iter()
        .map(|m| {
            if m.role == MessageRole::Compaction {
                return format!("[Previous summary] {}", m.content);
            }
            let label = match m.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::Tool => "Tool",
                MessageRole::Compaction => unreachable!(),
            };
            let mut line = format!("{label}: {}", m.content);
            for tc in &m.tool_calls {
                line.push_str(&format!("\n[Tool call: {}({})]", tc.name, tc.arguments));
            }
            for tr in &m.tool_results {
                line.push_str(&format!(
                    "\n[Tool result: {}]",
                    truncate_chars(&tr.output, TOOL_RESULT_PREVIEW_CHARS)
                ));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

/// Summarise the old prefix of a session and append the compaction message.
///
/// Returns the stored compaction message and the raw summary text.
pub async fn compact_session(
    store: &SessionStore,
    providers: &ProviderRegistry,
    session_id: &str,
    model: &str,
    context_window: i64,
) -> Result<(MessageRecord, String), CoreError> {
    let view = store
        .get_session(session_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let messages = view.messages;
    if messages.len() < MIN_MESSAGES_TO_COMPACT {
        return Err(CoreError::Invalid(
            "Not enough messages to compact".to_string(),
        ));
    }

    let pct = read_pct(
        store,
        settings::COMPACTION_VERBATIM_BUDGET,
        40,
        0,
        50,
    )
    .await;
    let tail_count = calculate_verbatim_count(&messages, context_window, pct);
    let summarize_set = &messages[..messages.len() - tail_count];
    let transcript = render_transcript(summarize_set);

    let prompt = format!("{SUMMARIZE_PROMPT}\n\n---\n\n{transcript}");
    let completion = providers
        .generate_response(model, vec![PromptMessage::user(prompt)])
        .await
        .map_err(|e| CoreError::Llm {
            code: parley_model::classify(&e.to_string()),
            message: e.to_string(),
        })?;

    let mut new_message = NewMessage::compaction(&completion.text, tail_count as u32);
    new_message.token_count = Some(((completion.text.len() / 4).max(1)) as u32);
    new_message.raw_token_count = completion.usage.map(|u| u.output_tokens);
    let record = store.add_message(session_id, new_message).await?;
    info!(
        session = %session_id,
        summarized = summarize_set.len(),
        verbatim = tail_count,
        "session compacted"
    );
    Ok((record, completion.text))
}

/// Fire compaction when the last turn's usage crosses the configured share
/// of the model's context window.  Unknown models and failures are
/// swallowed: auto-compaction never breaks the turn that triggered it.
pub async fn auto_compact_if_needed(
    store: &SessionStore,
    providers: &ProviderRegistry,
    session_id: &str,
    model: &str,
    last_usage: Usage,
) -> Option<MessageRecord> {
    let pct = read_pct(
        store,
        settings::COMPACTION_AUTO_THRESHOLD_PCT,
        80,
        50,
        95,
    )
    .await;
    let context_window = catalog::context_window(model).filter(|w| *w > 0)? as i64;
    let used = (last_usage.input_tokens + last_usage.output_tokens) as i64;
    let threshold = context_window * pct as i64 / 100;
    if used < threshold {
        return None;
    }
    info!(
        session = %session_id,
        used,
        threshold,
        "context utilisation crossed threshold; auto-compacting"
    );
    match compact_session(store, providers, session_id, model, context_window).await {
        Ok((record, _)) => Some(record),
        Err(e) => {
            warn!(session = %session_id, "auto-compaction failed: {e}");
            None
        }
    }
}

/// Read an integer percent setting, clamped to `[min, max]`.
async fn read_pct(store: &SessionStore, key: &str, default: u32, min: u32, max: u32) -> u32 {
    let raw = store.get_setting(key).await.ok().flatten();
    let value = raw
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default);
    value.clamp(min, max)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
