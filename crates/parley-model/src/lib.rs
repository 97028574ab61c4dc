// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod error;
pub mod mock;
mod provider;
mod registry;
mod types;

pub use error::{classify, LlmErrorCode, StreamCancelled};
pub use provider::{ChunkStream, Completion, GenerationRequest, Provider};
pub use registry::{ModelRef, ProviderRegistry};
pub use types::{
    PromptMessage, PromptRole, StreamChunk, ToolCallData, ToolResultData, ToolSchema, Usage,
};
