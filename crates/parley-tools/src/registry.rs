// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use parley_model::ToolSchema;

use crate::tool::{Tool, Validation};

/// Central registry holding all available tools.
///
/// Immutable after construction; the agent loop shares it by `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools
            .insert(tool.definition().name.clone(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider-facing schemas for all registered tools, name-sorted.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| t.definition().to_schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Pre-validate one call: known tool, structural checks from the
    /// definition, then the tool's own synchronous validation.
    pub fn validate_call(&self, name: &str, args: &Value) -> Validation {
        let Some(tool) = self.tools.get(name) else {
            return Validation::invalid(format!("unknown tool: {name}"));
        };
        let structural = tool.definition().validate_args(args);
        if !structural.is_valid() {
            return structural;
        }
        tool.validate(args)
    }

    /// Execute a call.  Unknown tools fail as an `Err` (callers turn tool
    /// errors into error results, never into aborts).
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> anyhow::Result<String> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args, session_id).await,
            None => anyhow::bail!("unknown tool: {name}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
