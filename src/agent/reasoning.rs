//! Reasoning step
//!
//! One inference call per turn. Before calling the gateway the step makes
//! sure the system prompt sits at position 0 and, when the previous tool
//! call failed, appends a targeted recovery hint as a USER message. Duplicate
//! calls in the reply are dropped before the assistant message is recorded.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::providers::{ChatOptions, LLMProvider, ToolDefinition};
use crate::session::{Message, Session, ToolCall};

// ============================================================================
// Error classification
// ============================================================================

/// Broad class of a failed tool result, used to pick a recovery hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    PathNotFound,
    BinaryFile,
    MalformedQuery,
    Generic,
}

impl ErrorClass {
    /// Classify a tool error payload.
    pub fn classify(content: &str) -> Self {
        let lower = content.to_lowercase();
        if lower.contains("binary")
            || lower.contains("utf-8")
            || lower.contains("invalid utf")
            || lower.contains("not valid text")
        {
            ErrorClass::BinaryFile
        } else if lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("no such file")
        {
            ErrorClass::PathNotFound
        } else if lower.contains("syntax")
            || lower.contains("malformed")
            || lower.contains("invalid argument")
            || lower.contains("missing '")
            || lower.contains("invalid regex")
            || lower.contains("parse")
        {
            ErrorClass::MalformedQuery
        } else {
            ErrorClass::Generic
        }
    }

    /// Guidance text for this class.
    pub fn hint(&self, tool: &str) -> String {
        let advice = match self {
            ErrorClass::PathNotFound => {
                "The path does not exist. List the directory first and only use paths that appear in the listing."
            }
            ErrorClass::BinaryFile => {
                "That file is binary or structured data and cannot be read as text. Use a tool made for that format, or pick a different file."
            }
            ErrorClass::MalformedQuery => {
                "The request was malformed. Check the arguments and their syntax before trying a corrected version."
            }
            ErrorClass::Generic => {
                "Read the error message and choose a different approach."
            }
        };
        format!(
            "The previous `{}` call failed. Do NOT repeat the exact same action. {}",
            tool, advice
        )
    }
}

/// Recovery hint for a session whose last message is a failed tool result.
pub fn recovery_hint(session: &Session) -> Option<String> {
    let Some(Message::ToolResult {
        tool_call_id,
        content,
        is_error: true,
    }) = session.last_message()
    else {
        return None;
    };

    let tool = session
        .last_assistant()
        .and_then(|m| m.tool_calls().iter().find(|c| &c.id == tool_call_id))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "tool".to_string());

    Some(ErrorClass::classify(content).hint(&tool))
}

/// Keep the first call for every signature, preserving order.
pub fn dedup_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| seen.insert(c.signature()))
        .collect()
}

// ============================================================================
// Reasoning step
// ============================================================================

pub struct ReasoningStep {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
    options: ChatOptions,
    system_prompt: String,
}

impl ReasoningStep {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: Option<String>,
        options: ChatOptions,
        system_prompt: &str,
    ) -> Self {
        Self {
            provider,
            model,
            options,
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Run one turn, appending the hint (if any) and the assistant reply.
    ///
    /// # Errors
    ///
    /// Gateway failures are returned unchanged; the session then holds
    /// everything appended before the call.
    pub async fn run(&self, session: &mut Session, tools: Vec<ToolDefinition>) -> Result<()> {
        session.ensure_system_prompt(&self.system_prompt);

        if let Some(hint) = recovery_hint(session) {
            debug!(session_id = %session.id, "Injecting recovery hint");
            session.add_message(Message::user(&hint));
        }

        let response = self
            .provider
            .chat(
                session.messages.clone(),
                tools,
                self.model.as_deref(),
                self.options.clone(),
            )
            .await?;

        let message = match response.into_message() {
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let proposed = tool_calls.len();
                let tool_calls = dedup_calls(tool_calls);
                if tool_calls.len() < proposed {
                    info!(
                        session_id = %session.id,
                        dropped = proposed - tool_calls.len(),
                        "Dropped duplicate tool calls"
                    );
                }
                Message::assistant_with_tools(&content, tool_calls)
            }
            other => other,
        };
        session.add_message(message);
        Ok(())
    }
}
