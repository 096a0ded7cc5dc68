//! Inference gateway types for GateClaw
//!
//! The engine treats the language model as an opaque capability: given an
//! ordered message history and optionally a tool catalog, it returns text
//! and/or proposed tool calls. [`LLMProvider`] is that contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{Message, ToolCall};

/// Definition of a tool as bound to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name the model uses in calls
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// The inference gateway contract.
///
/// Implementations must not retry internally on behalf of the engine; a
/// returned error ends the run with lifecycle ERROR.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run one inference call.
    ///
    /// `tools` empty means the call is not bound to a catalog (used for
    /// justification and tool generation calls).
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse>;

    /// Model used when the caller passes `None`.
    fn default_model(&self) -> &str;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Sampling options for a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl ChatOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Gateway reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Text content (may be empty when tool calls are present)
    pub content: String,
    /// Proposed tool calls, in proposal order
    pub tool_calls: Vec<LLMToolCall>,
    /// Token usage, when reported
    pub usage: Option<Usage>,
}

impl LLMResponse {
    /// Text-only reply.
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            tool_calls: vec![],
            usage: None,
        }
    }

    /// Reply proposing tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            usage: None,
        }
    }

    /// Whether any tool calls were proposed.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Attach usage information.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Convert into an assistant message for the session history.
    pub fn into_message(self) -> Message {
        let calls: Vec<ToolCall> = self
            .tool_calls
            .iter()
            .map(LLMToolCall::to_tool_call)
            .collect();
        Message::assistant_with_tools(&self.content, calls)
    }
}

/// A tool call as returned by the gateway; arguments are raw JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMToolCall {
    /// Call id
    pub id: String,
    /// Tool name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl LLMToolCall {
    /// Create a new gateway tool call.
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Convert to a session [`ToolCall`], generating an id when the gateway gave none.
    pub fn to_tool_call(&self) -> ToolCall {
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id.clone()
        };
        ToolCall::from_raw(&id, &self.name, &self.arguments)
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Sum of both
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage stats.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_response_text() {
        let response = LLMResponse::text("Hello, world!");
        assert_eq!(response.content, "Hello, world!");
        assert!(!response.has_tool_calls());
        assert!(response.usage.is_none());
    }

    #[test]
    fn test_llm_response_with_usage() {
        let response = LLMResponse::text("Hello").with_usage(Usage::new(100, 50));
        assert_eq!(response.usage.unwrap().total_tokens, 150);
    }

    #[test]
    fn test_into_message_parses_arguments() {
        let response = LLMResponse::with_tools(
            "",
            vec![LLMToolCall::new("call_1", "read_file", r#"{"path": "a.txt"}"#)],
        );
        let message = response.into_message();
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn test_missing_call_id_is_generated() {
        let call = LLMToolCall::new("", "list_directory", "{}").to_tool_call();
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn test_chat_options_builder() {
        let options = ChatOptions::new().with_max_tokens(1000).with_temperature(0.2);
        assert_eq!(options.max_tokens, Some(1000));
        assert_eq!(options.temperature, Some(0.2));
    }
}
