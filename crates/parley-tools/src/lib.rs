// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod registry;
mod tool;

pub use registry::ToolRegistry;
pub use tool::{OperationSpec, ParamSpec, Tool, ToolDefinition, Validation};
