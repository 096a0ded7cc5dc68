//! Tool types for GateClaw
//!
//! This module defines the core types for tool execution: the `Tool` trait
//! every tool implements, the `RiskTier` the router consults before anything
//! runs, the `ToolOutput` result with its error-marker convention, and the
//! `ToolContext` passed to tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Leading token that marks a tool result string as a failure.
pub const ERROR_MARKER: &str = "ERROR";

/// Risk classification of a tool.
///
/// SAFE tools run automatically; CRITICAL tools run only after an external
/// approval decision for the exact pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    /// Read-only or otherwise reversible; auto-executed.
    Safe,
    /// Irreversible or externally visible; requires approval.
    Critical,
}

impl RiskTier {
    /// Parse a tier name case-insensitively (`"safe"`, `"CRITICAL"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Some(RiskTier::Safe),
            "CRITICAL" => Some(RiskTier::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Returns `true` when a result payload starts with the error marker token.
///
/// ```
/// use gateclaw::tools::is_error_payload;
///
/// assert!(is_error_payload("ERROR: file not found"));
/// assert!(is_error_payload("  ERROR"));
/// assert!(!is_error_payload("ERRORS: 0"));
/// assert!(!is_error_payload("all good"));
/// ```
pub fn is_error_payload(payload: &str) -> bool {
    let trimmed = payload.trim_start();
    match trimmed.strip_prefix(ERROR_MARKER) {
        Some(rest) => rest.is_empty() || rest.starts_with(':') || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Result of a tool invocation, as fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content sent to the model as the tool result.
    pub content: String,
    /// Whether this result represents an error condition.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result; the content always carries the error marker.
    pub fn error(content: impl Into<String>) -> Self {
        let content = content.into();
        let content = if is_error_payload(&content) {
            content
        } else {
            format!("{}: {}", ERROR_MARKER, content)
        };
        Self {
            content,
            is_error: true,
        }
    }

    /// Classify a raw result string using the error-marker convention.
    pub fn from_payload(payload: impl Into<String>) -> Self {
        let content = payload.into();
        let is_error = is_error_payload(&content);
        Self { content, is_error }
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use gateclaw::tools::{RiskTier, Tool, ToolContext, ToolOutput};
/// use gateclaw::error::Result;
///
/// struct Clock;
///
/// #[async_trait]
/// impl Tool for Clock {
///     fn name(&self) -> &str { "clock" }
///     fn description(&self) -> &str { "Returns the current time" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}, "required": []})
///     }
///     fn risk_tier(&self) -> RiskTier { RiskTier::Safe }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::text("12:00"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name the model uses to request it.
    fn name(&self) -> &str;

    /// Description sent to the model.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Risk tier consulted by the router before the call executes.
    ///
    /// Defaults to `RiskTier::Critical` (fail-closed): a tool that forgets to
    /// declare itself SAFE always goes through the approval gate.
    fn risk_tier(&self) -> RiskTier {
        RiskTier::Critical
    }
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Session the call belongs to
    pub session_id: Option<String>,
    /// The workspace directory for file operations
    pub workspace: Option<String>,
}

impl ToolContext {
    /// Create a new empty tool context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session id.
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Set the workspace directory.
    ///
    /// # Example
    /// ```
    /// use gateclaw::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_workspace("/srv/sandbox");
    /// assert_eq!(ctx.workspace.as_deref(), Some("/srv/sandbox"));
    /// ```
    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unlabelled;

    #[async_trait]
    impl Tool for Unlabelled {
        fn name(&self) -> &str {
            "unlabelled"
        }
        fn description(&self) -> &str {
            "forgot to declare a tier"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::text("ran"))
        }
    }

    #[test]
    fn test_default_tier_is_critical() {
        assert_eq!(Unlabelled.risk_tier(), RiskTier::Critical);
    }

    #[test]
    fn test_risk_tier_parse_and_display() {
        assert_eq!(RiskTier::parse("safe"), Some(RiskTier::Safe));
        assert_eq!(RiskTier::parse(" CRITICAL "), Some(RiskTier::Critical));
        assert_eq!(RiskTier::parse("medium"), None);
        assert_eq!(RiskTier::Safe.to_string(), "SAFE");
        assert_eq!(
            serde_json::to_string(&RiskTier::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }

    #[test]
    fn test_tool_output_error_adds_marker_once() {
        let out = ToolOutput::error("path not found");
        assert_eq!(out.content, "ERROR: path not found");
        assert!(out.is_error);

        let out = ToolOutput::error("ERROR: already marked");
        assert_eq!(out.content, "ERROR: already marked");
    }

    #[test]
    fn test_from_payload_classifies() {
        assert!(ToolOutput::from_payload("ERROR: boom").is_error);
        assert!(!ToolOutput::from_payload("42 files").is_error);
        assert!(!ToolOutput::from_payload("ERRORLESS").is_error);
    }

    #[test]
    fn test_tool_context_builders() {
        let ctx = ToolContext::new().with_session("s1").with_workspace("/w");
        assert_eq!(ctx.session_id.as_deref(), Some("s1"));
        assert_eq!(ctx.workspace.as_deref(), Some("/w"));
    }
}
