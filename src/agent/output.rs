//! Records exposed to callers and governance collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{LifecycleState, Message, PendingAction, Session};

/// `{session_id, state, message}` status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub session_id: String,
    pub state: LifecycleState,
    pub message: String,
}

impl ExecutionStatus {
    pub fn of(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            state: session.state,
            message: status_message(session),
        }
    }
}

/// Human-readable message for a session's current state.
pub fn status_message(session: &Session) -> String {
    match session.state {
        LifecycleState::Running => "Running".to_string(),
        LifecycleState::AwaitingApproval => match &session.pending_action {
            Some(action) => format!(
                "Awaiting approval for `{}`: {}",
                action.call.name, action.justification
            ),
            None => "Awaiting approval".to_string(),
        },
        LifecycleState::Completed => session
            .last_assistant()
            .map(|m| m.content().trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "Completed".to_string()),
        LifecycleState::Error | LifecycleState::Blocked => session
            .last_error
            .clone()
            .unwrap_or_else(|| session.state.to_string()),
    }
}

/// The pending critical action, as shown to reviewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingActionRecord {
    pub session_id: String,
    /// Identifier a decision may quote
    pub action_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub justification: String,
    pub timestamp: DateTime<Utc>,
}

impl PendingActionRecord {
    pub fn new(session_id: &str, action: &PendingAction) -> Self {
        Self {
            session_id: session_id.to_string(),
            action_id: action.id.clone(),
            tool_name: action.call.name.clone(),
            arguments: action.call.arguments.clone(),
            justification: action.justification.clone(),
            timestamp: action.requested_at,
        }
    }
}

/// One entry of the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEntry {
    Ai {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

/// Typed trace plus summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub messages: Vec<TraceEntry>,
    pub tool_call_count: usize,
    pub nodes_visited: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FinalOutput {
    pub fn from_session(session: &Session, nodes_visited: Vec<String>) -> Self {
        let mut messages = Vec::new();
        for message in &session.messages {
            match message {
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    if !content.trim().is_empty() {
                        messages.push(TraceEntry::Ai {
                            content: content.clone(),
                        });
                    }
                    for call in tool_calls {
                        messages.push(TraceEntry::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        });
                    }
                }
                Message::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => messages.push(TraceEntry::ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                }),
                Message::System { .. } | Message::User { .. } => {}
            }
        }
        let tool_call_count = messages
            .iter()
            .filter(|e| matches!(e, TraceEntry::ToolCall { .. }))
            .count();

        let (summary, error) = match session.state {
            LifecycleState::Error | LifecycleState::Blocked => (None, Some(status_message(session))),
            _ => (Some(status_message(session)), None),
        };

        Self {
            messages,
            tool_call_count,
            nodes_visited,
            summary,
            error,
        }
    }
}

/// What a `submit_query` or approval decision returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: String,
    pub state: LifecycleState,
    pub message: String,
    pub output: FinalOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingActionRecord>,
}

impl RunReport {
    pub fn new(session: &Session, nodes_visited: Vec<String>) -> Self {
        Self {
            session_id: session.id.clone(),
            state: session.state,
            message: status_message(session),
            output: FinalOutput::from_session(session, nodes_visited),
            pending: session
                .pending_action
                .as_ref()
                .map(|a| PendingActionRecord::new(&session.id, a)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;
    use serde_json::json;

    #[test]
    fn test_final_output_trace() {
        let mut session = Session::new("s");
        session.add_message(Message::system("sys"));
        session.add_message(Message::user("list files"));
        let call = ToolCall::new("c1", "list_directory", json!({"path": "."}));
        session.add_message(Message::assistant_with_tools("", vec![call]));
        session.add_message(Message::tool_result("c1", "a.txt", false));
        session.add_message(Message::assistant("One file: a.txt"));
        session.set_state(LifecycleState::Completed);

        let output = FinalOutput::from_session(&session, vec!["reasoning".into()]);
        assert_eq!(output.tool_call_count, 1);
        assert_eq!(output.messages.len(), 3);
        assert_eq!(output.summary.as_deref(), Some("One file: a.txt"));
        assert!(output.error.is_none());
    }

    #[test]
    fn test_error_status_message() {
        let mut session = Session::new("s");
        session.fail(LifecycleState::Error, "Inference failed: timeout");
        let status = ExecutionStatus::of(&session);
        assert_eq!(status.message, "Inference failed: timeout");
        let output = FinalOutput::from_session(&session, vec![]);
        assert_eq!(output.error.as_deref(), Some("Inference failed: timeout"));
    }

    #[test]
    fn test_pending_record() {
        let mut session = Session::new("s");
        let call = ToolCall::new("c1", "delete_file", json!({"path": "task_tracker.db"}));
        session.pending_action = Some(PendingAction::new(call, "Removes the tracker."));
        session.set_state(LifecycleState::AwaitingApproval);

        let report = RunReport::new(&session, vec![]);
        let pending = report.pending.unwrap();
        assert_eq!(pending.tool_name, "delete_file");
        assert_eq!(pending.arguments, json!({"path": "task_tracker.db"}));
        assert!(report.message.contains("delete_file"));
    }
}
