//! Inference gateway providers for GateClaw
//!
//! - [`LLMProvider`]: the gateway contract the engine depends on
//! - [`openai::OpenAIProvider`]: Chat Completions compatible HTTP gateway

pub mod openai;
pub mod types;

pub use openai::OpenAIProvider;
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};
