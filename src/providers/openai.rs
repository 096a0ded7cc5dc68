//! OpenAI-compatible inference gateway
//!
//! Implements [`LLMProvider`] against any Chat Completions endpoint
//! (OpenAI, Azure, vLLM, Ollama, OpenRouter, ...).
//!
//! # Example
//!
//! ```rust,ignore
//! use gateclaw::providers::{openai::OpenAIProvider, ChatOptions, LLMProvider};
//! use gateclaw::session::Message;
//!
//! async fn example() {
//!     let provider = OpenAIProvider::new("your-api-key");
//!     let response = provider
//!         .chat(vec![Message::user("Hello!")], vec![], None, ChatOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{}", response.content);
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{parse_provider_error, GateError, ProviderError, Result};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// The OpenAI API endpoint URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// The default model to use.
const DEFAULT_MODEL: &str = "gpt-4o";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCallRequest {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallResponse>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallResponse {
    #[serde(default)]
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible inference gateway.
pub struct OpenAIProvider {
    api_key: String,
    api_base: String,
    model: String,
    client: Client,
}

impl OpenAIProvider {
    /// Create a provider for the public OpenAI endpoint.
    ///
    /// ```
    /// use gateclaw::providers::openai::OpenAIProvider;
    /// use gateclaw::providers::LLMProvider;
    ///
    /// let provider = OpenAIProvider::new("sk-xxx");
    /// assert_eq!(provider.name(), "openai");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_client(api_key, OPENAI_API_URL, Client::new())
    }

    /// Create a provider for a custom base URL with a request timeout.
    pub fn with_base_url(api_key: &str, api_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(api_key, api_base, client))
    }

    /// Create a provider with a preconfigured HTTP client.
    pub fn with_client(api_key: &str, api_base: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    /// Override the default model.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

// ============================================================================
// Conversion
// ============================================================================

fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| match msg {
            Message::System { content } => WireMessage {
                role: "system",
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::User { content } => WireMessage {
                role: "user",
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let calls: Vec<WireToolCallRequest> = tool_calls
                    .into_iter()
                    .map(|tc| WireToolCallRequest {
                        id: tc.id,
                        r#type: "function",
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: match tc.arguments {
                                serde_json::Value::String(raw) => raw,
                                other => other.to_string(),
                            },
                        },
                    })
                    .collect();
                let has_calls = !calls.is_empty();
                WireMessage {
                    role: "assistant",
                    content: if content.is_empty() && has_calls {
                        None
                    } else {
                        Some(content)
                    },
                    tool_calls: has_calls.then_some(calls),
                    tool_call_id: None,
                }
            }
            Message::ToolResult {
                tool_call_id,
                content,
                ..
            } => WireMessage {
                role: "tool",
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            },
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

fn convert_response(response: ChatResponse) -> LLMResponse {
    let (content, tool_calls) = match response.choices.into_iter().next() {
        Some(choice) => {
            let calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| LLMToolCall::new(&tc.id, &tc.function.name, &tc.function.arguments))
                .collect();
            (choice.message.content.unwrap_or_default(), calls)
        }
        None => (String::new(), Vec::new()),
    };

    let mut llm_response = LLMResponse::with_tools(&content, tool_calls);
    if let Some(usage) = response.usage {
        llm_response =
            llm_response.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    llm_response
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.model);
        let request = ChatRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        debug!(model = %model, "Chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GateError::ProviderTyped(ProviderError::Timeout(e.to_string()))
                } else {
                    GateError::Provider(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<WireErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(parse_provider_error(status.as_u16(), &detail).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GateError::Provider(format!("Failed to parse response: {}", e)))?;

        info!(model = %model, "Chat completion received");
        Ok(convert_response(parsed))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;
    use serde_json::json;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAIProvider::new("test-key");
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), "gpt-4o");
        assert_eq!(provider.api_base, "https://api.openai.com/v1");

        let provider = OpenAIProvider::with_client("k", "http://localhost:8000/v1/", Client::new())
            .with_model("qwen2.5");
        assert_eq!(provider.api_base, "http://localhost:8000/v1");
        assert_eq!(provider.default_model(), "qwen2.5");
    }

    #[test]
    fn test_convert_messages_roles() {
        let call = ToolCall::new("call_1", "read_file", json!({"path": "a.txt"}));
        let converted = convert_messages(vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("call_1", "ERROR: Path not found: a.txt", true),
        ]);

        let roles: Vec<&str> = converted.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert!(converted[2].content.is_none());
        let calls = converted[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"path":"a.txt"}"#);
        assert_eq!(converted[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_convert_messages_plain_assistant_has_no_tool_calls() {
        let converted = convert_messages(vec![Message::assistant("done")]);
        assert!(converted[0].tool_calls.is_none());
        assert_eq!(converted[0].content.as_deref(), Some("done"));
    }

    #[test]
    fn test_convert_tools() {
        let converted = convert_tools(vec![ToolDefinition::new(
            "delete_file",
            "Delete a file",
            json!({"type": "object"}),
        )]);
        assert_eq!(converted[0].r#type, "function");
        assert_eq!(converted[0].function.name, "delete_file");
    }

    #[test]
    fn test_convert_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "list_directory", "arguments": "{\"path\":\".\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let parsed: ChatResponse = serde_json::from_value(raw).unwrap();
        let response = convert_response(parsed);
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].name, "list_directory");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_convert_response_empty_choices() {
        let parsed: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let response = convert_response(parsed);
        assert!(response.content.is_empty());
        assert!(!response.has_tool_calls());
    }
}
