// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt reconstruction from durable history.
//!
//! The latest compaction message is a cut-point: everything before it is
//! represented by a synthetic summary pair plus a verbatim tail of the
//! messages that were deliberately preserved when the compaction was
//! created.  Everything after it is emitted as-is, minus tool messages
//! that would be unreadable to a provider (empty, duplicated, or orphaned
//! by the cut).

use std::collections::HashSet;

use parley_model::{PromptMessage, PromptRole};
use parley_store::{MessageRecord, MessageRole};

/// Verbatim tail length assumed for legacy compactions that predate the
/// stored count, and when no context window is known.
pub(crate) const DEFAULT_VERBATIM_COUNT: usize = 4;

const SUMMARY_PREFIX: &str = "[Summary of conversation prior to the messages below]\n";
const SUMMARY_ACK: &str = "Understood. I have the context summary. The messages that follow \
                           continue from where the summary ends.";

/// Rebuild the provider prompt from the full ordered message list.
pub fn build_history_from_db(messages: &[MessageRecord]) -> Vec<PromptMessage> {
    let mut parts: Vec<PromptMessage> = Vec::with_capacity(messages.len() + 2);
    let compaction_idx = messages
        .iter()
        .rposition(|m| m.role == MessageRole::Compaction);

    // Tool-call ids whose parent assistant message made it into the prompt,
    // and result ids already emitted (for duplicate suppression).
    let mut emitted_call_ids: HashSet<&str> = HashSet::new();
    let mut emitted_result_ids: HashSet<&str> = HashSet::new();

    if let Some(k) = compaction_idx {
        let compaction = &messages[k];
        parts.push(PromptMessage::user(format!(
            "{SUMMARY_PREFIX}{}",
            compaction.content
        )));
        parts.push(PromptMessage::assistant(SUMMARY_ACK));

        // Reconstruct the verbatim tail preserved by the compaction.
        let verbatim = compaction
            .verbatim_count
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_VERBATIM_COUNT);
        let mut tail_start = k.saturating_sub(verbatim);
        // Never reach back across an earlier compaction.
        for i in tail_start..k {
            if messages[i].role == MessageRole::Compaction {
                tail_start = i + 1;
            }
        }
        // Widen left so a (assistant with tool-calls, tool results) pair is
        // never split at the tail boundary.
        while tail_start > 0 && messages[tail_start].role == MessageRole::Tool {
            tail_start -= 1;
        }
        for message in &messages[tail_start..k] {
            if let Some(part) = to_prompt_part(message) {
                note_ids(message, &mut emitted_call_ids, &mut emitted_result_ids);
                parts.push(part);
            }
        }
    }

    let after = compaction_idx.map_or(0, |k| k + 1);
    // Directly after a cut, tool messages whose parent assistant was
    // summarised away have nothing to attach to; walk past them.
    let mut leading = compaction_idx.is_some();
    for message in &messages[after..] {
        if message.role == MessageRole::Compaction {
            continue;
        }
        if message.role == MessageRole::Tool {
            if message.tool_results.is_empty() {
                continue;
            }
            let all_seen = message
                .tool_results
                .iter()
                .all(|r| emitted_result_ids.contains(r.tool_call_id.as_str()));
            if all_seen {
                continue; // duplicate tool message
            }
            if leading {
                let parent_present = message
                    .tool_results
                    .iter()
                    .any(|r| emitted_call_ids.contains(r.tool_call_id.as_str()));
                if !parent_present {
                    continue; // orphaned by the cut
                }
            }
        }
        if let Some(part) = to_prompt_part(message) {
            note_ids(message, &mut emitted_call_ids, &mut emitted_result_ids);
            parts.push(part);
            leading = false;
        }
    }

    parts
}

fn note_ids<'a>(
    message: &'a MessageRecord,
    emitted_call_ids: &mut HashSet<&'a str>,
    emitted_result_ids: &mut HashSet<&'a str>,
) {
    for tc in &message.tool_calls {
        emitted_call_ids.insert(tc.id.as_str());
    }
    for tr in &message.tool_results {
        emitted_result_ids.insert(tr.tool_call_id.as_str());
    }
}

/// Translate one durable message into a prompt part.
///
/// Tool messages with no results render as empty and are filtered out;
/// compaction messages only ever appear through the synthetic summary pair.
fn to_prompt_part(message: &MessageRecord) -> Option<PromptMessage> {
    let role = match message.role {
        MessageRole::User => PromptRole::User,
        MessageRole::Assistant => PromptRole::Assistant,
        MessageRole::Tool => {
            if message.tool_results.is_empty() {
                return None;
            }
            PromptRole::Tool
        }
        MessageRole::Compaction => return None,
    };
    Some(PromptMessage {
        role,
        content: message.content.clone(),
        images: message.images.clone(),
        tool_calls: message.tool_calls.clone(),
        tool_results: message.tool_results.clone(),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
