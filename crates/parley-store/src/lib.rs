// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod store;
mod types;

pub use store::{SessionStore, StoreError, DEFAULT_SESSION_TITLE};
pub use types::{
    ApprovalStatus, MessagePage, MessagePatch, MessageRecord, MessageRole, NewMessage,
    SearchResult, SessionPatch, SessionRecord, SessionView,
};

/// Runtime setting keys persisted in the store.
pub mod settings {
    /// Percent of the context window reserved for the verbatim tail on
    /// compaction.  Integer string, clamped to 0–50 by readers.
    pub const COMPACTION_VERBATIM_BUDGET: &str = "compaction_verbatim_budget";
    /// Context utilisation percentage at which auto-compaction fires.
    /// Integer string, clamped to 50–95 by readers.
    pub const COMPACTION_AUTO_THRESHOLD_PCT: &str = "compaction_auto_threshold_pct";
    /// `"provider:model-id"` used to lazy-migrate legacy sessions whose
    /// model field is empty.
    pub const DEFAULT_MODEL: &str = "default_model";
    /// UI convenience: the most recently active session id.
    pub const LAST_ACTIVE_SESSION_ID: &str = "last_active_session_id";
}
