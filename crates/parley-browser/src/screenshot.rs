// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Latest-screenshot buffer, keyed by session id.
//!
//! Vision-capable tools write here after every capture; the vision model
//! reads the most recent frame without re-driving the browser.  Entries are
//! cleared on session deletion.

use dashmap::DashMap;

/// One captured frame.
#[derive(Debug, Clone)]
pub struct LatestImage {
    pub base64: String,
    pub mime_type: String,
    /// Raw bytes when the producer kept them (saves a decode round-trip)
    pub raw_bytes: Option<Vec<u8>>,
}

impl LatestImage {
    /// Render as a data URL for providers that take inline images.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Process-wide buffer of the most recent screenshot per session.
#[derive(Debug, Default)]
pub struct LatestImageStore {
    images: DashMap<String, LatestImage>,
}

impl LatestImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session_id: &str, image: LatestImage) {
        self.images.insert(session_id.to_string(), image);
    }

    pub fn get(&self, session_id: &str) -> Option<LatestImage> {
        self.images.get(session_id).map(|e| e.value().clone())
    }

    pub fn clear(&self, session_id: &str) {
        self.images.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn png(session: &str) -> LatestImage {
        LatestImage {
            base64: format!("bytes-of-{session}"),
            mime_type: "image/png".into(),
            raw_bytes: None,
        }
    }

    #[test]
    fn set_get_round_trip() {
        let store = LatestImageStore::new();
        store.set("a", png("a"));
        assert_eq!(store.get("a").unwrap().base64, "bytes-of-a");
        assert!(store.get("b").is_none());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = LatestImageStore::new();
        store.set("a", png("a"));
        store.set("b", png("b"));
        store.clear("a");
        assert!(store.get("a").is_none());
        assert_eq!(store.get("b").unwrap().base64, "bytes-of-b");
    }

    #[test]
    fn set_overwrites_previous_frame() {
        let store = LatestImageStore::new();
        store.set("a", png("old"));
        store.set("a", png("new"));
        assert_eq!(store.get("a").unwrap().base64, "bytes-of-new");
    }

    #[test]
    fn data_url_includes_mime() {
        let url = png("x").to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
