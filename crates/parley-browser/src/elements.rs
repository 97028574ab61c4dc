// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Integer-indexed table of interactable DOM nodes.
//!
//! `get_content` produces the map; `click`/`type`/`scroll` consume it.  Each
//! refresh bumps `map_version` and stamps the entries, so a reference that
//! survived a refresh can be recognised as stale when a CDP call on it
//! fails.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::BrowserError;

/// One interactable node as last observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementEntry {
    /// Accessibility role ("button", "link", ...)
    pub role: String,
    /// Accessible name shown to the model
    pub name: String,
    /// CDP backend node id used to resolve the live DOM node
    pub backend_dom_node_id: i64,
    /// Map version this entry was produced under
    pub map_version: u64,
}

/// A resolved reference handed to browser operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub index: u32,
    pub role: String,
    pub name: String,
    pub backend_dom_node_id: i64,
    pub map_version: u64,
}

/// The per-session element table.
#[derive(Debug, Default)]
pub struct ElementMap {
    entries: HashMap<u32, ElementEntry>,
    version: u64,
}

impl ElementMap {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the table with a fresh snapshot; every entry is stamped with
    /// the new version.
    pub fn update(&mut self, entries: HashMap<u32, ElementEntry>) -> u64 {
        self.version += 1;
        self.entries = entries;
        for entry in self.entries.values_mut() {
            entry.map_version = self.version;
        }
        self.version
    }

    /// Drop all entries.  The version still advances so outstanding refs
    /// are detectably stale.
    pub fn clear(&mut self) -> u64 {
        self.version += 1;
        self.entries.clear();
        self.version
    }

    /// Resolve an index to a reference.  The error message distinguishes an
    /// empty map (the page content was never fetched, or was cleared by a
    /// navigation) from an out-of-range index.
    pub fn resolve(&self, index: u32) -> Result<ElementRef, BrowserError> {
        if self.entries.is_empty() {
            return Err(BrowserError::ElementNotFound(format!(
                "element {index} not found: the element map is empty; \
                 refresh the page content first"
            )));
        }
        match self.entries.get(&index) {
            Some(entry) => Ok(ElementRef {
                index,
                role: entry.role.clone(),
                name: entry.name.clone(),
                backend_dom_node_id: entry.backend_dom_node_id,
                map_version: entry.map_version,
            }),
            None => Err(BrowserError::ElementNotFound(format!(
                "element {index} not found: the map has {} elements; \
                 it may be out of date",
                self.entries.len()
            ))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
