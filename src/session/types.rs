//! Session types for GateClaw
//!
//! This module defines the core types for conversation and execution state:
//! messages, tool calls, lifecycle states, pending critical actions and the
//! checkpoint envelope persisted by the [`CheckpointStore`](super::CheckpointStore).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::forge::ToolProposal;

// ============================================================================
// Tool calls
// ============================================================================

/// A tool invocation proposed by the model.
///
/// Two calls are the same logical action when their [`signature`](Self::signature)
/// matches; the `id` only correlates a call with its result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier correlating the call with its TOOL_RESULT
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Argument mapping (a JSON object when the model produced valid JSON)
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    ///
    /// # Example
    /// ```
    /// use gateclaw::session::ToolCall;
    /// use serde_json::json;
    ///
    /// let call = ToolCall::new("call_1", "read_file", json!({"path": "notes.md"}));
    /// assert_eq!(call.name, "read_file");
    /// ```
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    /// Build a call from raw gateway output, where arguments arrive as a JSON string.
    ///
    /// Arguments that do not parse are kept verbatim as a JSON string so the
    /// executor can report them back to the model.
    pub fn from_raw(id: &str, name: &str, raw_arguments: &str) -> Self {
        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw_arguments)
                .unwrap_or_else(|_| Value::String(raw_arguments.to_string()))
        };
        Self::new(id, name, arguments)
    }

    /// Arguments serialized with keys in sorted order.
    pub fn canonical_arguments(&self) -> String {
        // serde_json's default map is ordered, so serialization is canonical.
        self.arguments.to_string()
    }

    /// `(name, canonical arguments)` identity used for dedup and loop detection.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.canonical_arguments())
    }

    /// Whether the arguments form a JSON object.
    pub fn has_valid_arguments(&self) -> bool {
        self.arguments.is_object()
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A single message in a session's history.
///
/// Closed set of kinds; each carries only the fields it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instructions for the model, always at position 0.
    System { content: String },
    /// Human input, rejection notices and recovery hints.
    User { content: String },
    /// Model output: text and zero or more proposed tool calls.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call.
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    /// Create a new system message.
    pub fn system(content: &str) -> Self {
        Message::System {
            content: content.to_string(),
        }
    }

    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use gateclaw::session::Message;
    ///
    /// let msg = Message::user("Hello!");
    /// assert_eq!(msg.content(), "Hello!");
    /// assert_eq!(msg.kind(), "user");
    /// ```
    pub fn user(content: &str) -> Self {
        Message::User {
            content: content.to_string(),
        }
    }

    /// Create an assistant message without tool calls.
    pub fn assistant(content: &str) -> Self {
        Message::Assistant {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message proposing tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.to_string(),
            tool_calls,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: &str, content: &str, is_error: bool) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.to_string(),
            content: content.to_string(),
            is_error,
        }
    }

    /// Text content of the message.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    /// Tool calls proposed by an assistant message; empty for every other kind.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Short lowercase tag for logs and context excerpts.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "tool",
        }
    }

    /// True for a TOOL_RESULT flagged as an error.
    pub fn is_tool_error(&self) -> bool {
        matches!(self, Message::ToolResult { is_error: true, .. })
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// The engine is (or may resume) reasoning.
    Running,
    /// Suspended at the critical gate, waiting for an external decision.
    AwaitingApproval,
    /// Finished with a final answer or a loop-guard verdict.
    Completed,
    /// The inference gateway failed.
    Error,
    /// The governance countersign could not be obtained.
    Blocked,
}

impl LifecycleState {
    /// True once the last run has ended; approval decisions are refused
    /// until a new query suspends the session again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Error | LifecycleState::Blocked
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Running => "RUNNING",
            LifecycleState::AwaitingApproval => "AWAITING_APPROVAL",
            LifecycleState::Completed => "COMPLETED",
            LifecycleState::Error => "ERROR",
            LifecycleState::Blocked => "BLOCKED",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Pending critical action
// ============================================================================

/// A critical tool call frozen at the gate, waiting for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Identifier a decision may quote to prove it refers to this action
    pub id: String,
    /// The call exactly as proposed; executed verbatim on approval
    pub call: ToolCall,
    /// Human-readable justification from the secondary inference call
    pub justification: String,
    /// When the gate suspended the session
    pub requested_at: DateTime<Utc>,
    /// Generated tool awaiting registration (tool-creation requests only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ToolProposal>,
    /// Other calls from the same turn, answered after the decision
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<ToolCall>,
}

impl PendingAction {
    /// Freeze a call for review.
    pub fn new(call: ToolCall, justification: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call,
            justification: justification.to_string(),
            requested_at: Utc::now(),
            proposal: None,
            deferred: Vec::new(),
        }
    }

    /// Attach the generated tool this action would register.
    pub fn with_proposal(mut self, proposal: ToolProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    /// Attach co-proposed calls held back by the gate.
    pub fn with_deferred(mut self, deferred: Vec<ToolCall>) -> Self {
        self.deferred = deferred;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// One execution lineage: message history plus gate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Append-only message history
    pub messages: Vec<Message>,
    /// Critical action awaiting a decision (at most one)
    pub pending_action: Option<PendingAction>,
    /// Justification recorded by the most recent gate
    pub justification: Option<String>,
    /// Current lifecycle state
    pub state: LifecycleState,
    /// Captured failure message for ERROR / BLOCKED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Index of the USER message that opened the current query
    #[serde(default)]
    pub query_start: usize,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When this session was last modified
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given id.
    ///
    /// # Example
    /// ```
    /// use gateclaw::session::{LifecycleState, Session};
    ///
    /// let session = Session::new("s-1");
    /// assert!(session.messages.is_empty());
    /// assert_eq!(session.state, LifecycleState::Running);
    /// ```
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            pending_action: None,
            justification: None,
            state: LifecycleState::Running,
            last_error: None,
            query_start: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, updating `updated_at`.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Get the last message in this session, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent assistant message.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::Assistant { .. }))
    }

    /// Make sure a system message sits at position 0, inserting `prompt` if not.
    ///
    /// Returns `true` when a message was inserted.
    pub fn ensure_system_prompt(&mut self, prompt: &str) -> bool {
        if matches!(self.messages.first(), Some(Message::System { .. })) {
            return false;
        }
        if !self.messages.is_empty() {
            self.query_start += 1;
        }
        self.messages.insert(0, Message::system(prompt));
        self.updated_at = Utc::now();
        true
    }

    /// Move to a new lifecycle state.
    pub fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record a failure and move to `state` (ERROR or BLOCKED).
    pub fn fail(&mut self, state: LifecycleState, message: &str) {
        self.last_error = Some(message.to_string());
        self.set_state(state);
    }

    /// Append a new user query and mark it as the start of the current query.
    pub fn begin_query(&mut self, query: &str) {
        self.query_start = self.messages.len();
        self.add_message(Message::user(query));
    }

    /// Messages since the current query began.
    pub fn current_query(&self) -> &[Message] {
        &self.messages[self.query_start.min(self.messages.len())..]
    }
}

// ============================================================================
// Checkpoint
// ============================================================================

/// Which node runs next when a checkpoint is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePoint {
    /// Apply the pending approval decision.
    CriticalExecutor,
}

/// Durable snapshot of a session and its resume pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The session state at the time of the snapshot
    pub session: Session,
    /// Node to run on resume; `None` when nothing is pending
    pub next: Option<ResumePoint>,
    /// Monotonic write counter, assigned by the store
    #[serde(default)]
    pub version: u64,
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot a session.
    pub fn new(session: Session, next: Option<ResumePoint>) -> Self {
        Self {
            session,
            next,
            version: 0,
            saved_at: Utc::now(),
        }
    }

    /// Session id of this checkpoint.
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_is_order_independent() {
        let a = ToolCall::from_raw("1", "write_file", r#"{"path": "a.txt", "content": "x"}"#);
        let b = ToolCall::from_raw("2", "write_file", r#"{"content": "x", "path": "a.txt"}"#);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_signature_differs_by_name_and_args() {
        let a = ToolCall::new("1", "read_file", json!({"path": "a"}));
        let b = ToolCall::new("1", "read_file", json!({"path": "b"}));
        let c = ToolCall::new("1", "list_directory", json!({"path": "a"}));
        assert_ne!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_from_raw_invalid_json_kept_verbatim() {
        let call = ToolCall::from_raw("1", "read_file", "{not json");
        assert!(!call.has_valid_arguments());
        assert_eq!(call.arguments, Value::String("{not json".into()));

        let empty = ToolCall::from_raw("2", "list_directory", "");
        assert!(empty.has_valid_arguments());
    }

    #[test]
    fn test_message_serialization_is_tagged() {
        let msg = Message::tool_result("call_1", "ERROR: nope", true);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["is_error"], true);

        let assistant = Message::assistant("done");
        let json = serde_json::to_value(&assistant).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_message_accessors() {
        let call = ToolCall::new("c1", "list_directory", json!({"path": "."}));
        let msg = Message::assistant_with_tools("checking", vec![call]);
        assert_eq!(msg.content(), "checking");
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.kind(), "assistant");
        assert!(Message::user("hi").tool_calls().is_empty());
        assert!(Message::tool_result("c1", "boom", true).is_tool_error());
        assert!(!Message::tool_result("c1", "ok", false).is_tool_error());
    }

    #[test]
    fn test_ensure_system_prompt_only_once() {
        let mut session = Session::new("s");
        session.add_message(Message::user("hello"));
        assert!(session.ensure_system_prompt("sys"));
        assert!(!session.ensure_system_prompt("sys"));
        assert_eq!(session.messages.len(), 2);
        assert!(matches!(session.messages[0], Message::System { .. }));
    }

    #[test]
    fn test_current_query_tracks_latest_user_query() {
        let mut session = Session::new("s");
        session.begin_query("first");
        session.ensure_system_prompt("sys");
        assert_eq!(session.current_query().len(), 1);
        assert_eq!(session.current_query()[0].content(), "first");

        session.add_message(Message::assistant("answer"));
        session.begin_query("second");
        assert_eq!(session.current_query().len(), 1);
        assert_eq!(session.current_query()[0].content(), "second");
    }

    #[test]
    fn test_lifecycle_display_and_terminal() {
        assert_eq!(LifecycleState::AwaitingApproval.to_string(), "AWAITING_APPROVAL");
        assert!(LifecycleState::Completed.is_terminal());
        assert!(LifecycleState::Blocked.is_terminal());
        assert!(!LifecycleState::Running.is_terminal());
        assert!(!LifecycleState::AwaitingApproval.is_terminal());

        let json = serde_json::to_string(&LifecycleState::AwaitingApproval).unwrap();
        assert_eq!(json, "\"AWAITING_APPROVAL\"");
    }

    #[test]
    fn test_checkpoint_roundtrip_is_identical() {
        let mut session = Session::new("s-roundtrip");
        session.add_message(Message::system("sys"));
        session.add_message(Message::user("delete the db"));
        let call = ToolCall::new("c1", "delete_file", json!({"path": "task_tracker.db"}));
        session.add_message(Message::assistant_with_tools("", vec![call.clone()]));
        session.pending_action = Some(PendingAction::new(call, "Removes the database."));
        session.set_state(LifecycleState::AwaitingApproval);

        let checkpoint = Checkpoint::new(session, Some(ResumePoint::CriticalExecutor));
        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, checkpoint);
        assert_eq!(restored.session_id(), "s-roundtrip");
    }
}
