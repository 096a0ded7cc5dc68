//! Prompt text used by the engine.
//!
//! Everything the engine says to the model (or shows a reviewer) is built
//! here so the wording stays in one place.

use crate::forge::ToolProposal;
use crate::session::{Message, ToolCall};
use crate::utils::string::preview;

/// Default system prompt, inserted at position 0 of every session.
pub const SYSTEM_PROMPT: &str = r#"You are an autonomous software engineer working inside a sandboxed workspace.

TOOLS:
- list_directory, read_file, search_codebase: read-only, run immediately
- write_file, delete_file: change the workspace and require human approval
- create_tool: request a brand new tool when no existing tool can do the job;
  the generated tool is reviewed by a human before it becomes available

APPROVAL:
Some actions are CRITICAL. When you propose one, execution pauses and a human
reviews it. If the human rejects it you will be told why; propose an
alternative or explain why the task cannot be completed without it.

RULES:
- Start with list_directory(".") to understand the workspace
- Only read files that appear in directory listings
- NEVER read binary files (.db, .sqlite, .pyc, images) with read_file
- NEVER retry the exact same failed operation; choose a different approach
- Propose at most one critical action per response
- When the task is complete, give a short summary WITHOUT further tool calls"#;

/// Fallback justification when the gateway returns nothing usable.
pub const DEFAULT_JUSTIFICATION: &str =
    "The agent proposed this action to continue the requested task.";

/// Notice appended as a USER message when a critical action is rejected.
pub fn rejection_notice(tool: &str, reason: &str) -> String {
    format!(
        "The human has REJECTED your proposed action.\n\n\
         Tool attempted: {}\n\
         Rejection reason: {}\n\n\
         You should:\n\
         1. Acknowledge the rejection\n\
         2. Propose an alternative approach if possible\n\
         3. Or explain why you cannot complete the task without this action",
        tool, reason
    )
}

/// Content of the TOOL_RESULT answering a rejected critical call.
pub fn rejected_result(tool: &str) -> String {
    format!("ERROR: `{}` was rejected by the reviewer and was not executed", tool)
}

/// Prompt for the secondary inference call that explains a critical action.
pub fn justification_request(context: &[Message], call: &ToolCall, truncate_chars: usize) -> String {
    let history: Vec<String> = context
        .iter()
        .map(|m| format!("{}: {}", m.kind(), preview(m.content(), truncate_chars)))
        .collect();
    let arguments =
        serde_json::to_string_pretty(&call.arguments).unwrap_or_else(|_| call.arguments.to_string());
    format!(
        "Based on this conversation history:\n\n{}\n\n\
         The agent wants to call the tool '{}' with these arguments:\n{}\n\n\
         In 1-3 sentences, explain what this action does, why it is needed to satisfy \
         the user's request, and what outcome is expected.",
        history.join("\n"),
        call.name,
        arguments
    )
}

/// Reviewer-facing summary of a pending critical call.
pub fn approval_summary(call: &ToolCall, justification: &str) -> String {
    let arguments =
        serde_json::to_string_pretty(&call.arguments).unwrap_or_else(|_| call.arguments.to_string());
    format!(
        "CRITICAL ACTION REQUESTED\n\nTool: {}\nArguments: {}\n\nWhy: {}\n\nApprove this action?",
        call.name, arguments, justification
    )
}

/// Reviewer-facing summary of a generated tool; includes the full source.
pub fn tool_approval_summary(proposal: &ToolProposal) -> String {
    let params: Vec<String> = proposal
        .parameters
        .iter()
        .map(|p| format!("  - {} ({}): {}", p.name, p.ty, p.description))
        .collect();
    format!(
        "NEW TOOL REQUESTED\n\n\
         Name: {}\n\
         Description: {}\n\
         Risk tier: {}\n\
         Parameters:\n{}\n\
         Rationale: {}\n\n\
         Source:\n{}\n\
         Approve registering this tool?",
        proposal.name,
        proposal.description,
        proposal.risk_tier,
        if params.is_empty() {
            "  (none)".to_string()
        } else {
            params.join("\n")
        },
        proposal.rationale,
        proposal.source
    )
}

/// Final assistant message written when the loop guard trips.
pub fn loop_diagnostic(tool: &str, repeats: usize) -> String {
    format!(
        "Stopping: `{}` was proposed {} times in a row with identical arguments. \
         Repeating it will not make progress, so execution ended here.",
        tool, repeats
    )
}

/// Final assistant message written when the iteration cap is hit.
pub fn iteration_limit(max_iterations: u32) -> String {
    format!(
        "Stopping: reached the limit of {} reasoning steps without a final answer.",
        max_iterations
    )
}

/// TOOL_RESULT for a generated tool that failed validation.
pub fn validation_feedback(name: &str, issues: &str) -> String {
    format!(
        "ERROR: generated tool `{}` failed validation:\n{}\n\
         Revise the capability request or solve the task with existing tools.",
        name, issues
    )
}

/// TOOL_RESULT after a generated tool was registered and loaded.
pub fn tool_created(name: &str, hash: &str, example_call: &str) -> String {
    format!(
        "Tool `{}` registered (hash {}) and is now available. Example: {}",
        name, hash, example_call
    )
}

/// TOOL_RESULT for an extra critical call held back by the gate.
pub const DEFERRED_CRITICAL: &str =
    "ERROR: Deferred: only one critical action per turn. Propose it again if still needed.";

/// TOOL_RESULT for a co-proposed call skipped because the gated action was rejected.
pub const SKIPPED_AFTER_REJECTION: &str =
    "ERROR: Skipped: the critical action proposed in the same turn was rejected.";

/// TOOL_RESULT for calls not run because governance blocked the session.
pub const BLOCKED_BY_GOVERNANCE: &str =
    "ERROR: Blocked: the governance authority did not countersign this action.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{ParamSpec, ParamType};
    use crate::tools::RiskTier;
    use serde_json::json;

    #[test]
    fn test_rejection_notice_names_tool_and_reason() {
        let notice = rejection_notice("delete_file", "policy violation");
        assert!(notice.starts_with("The human has REJECTED"));
        assert!(notice.contains("Tool attempted: delete_file"));
        assert!(notice.contains("Rejection reason: policy violation"));
    }

    #[test]
    fn test_justification_request_truncates_context() {
        let long = "x".repeat(500);
        let context = vec![Message::user(&long)];
        let call = ToolCall::new("c1", "delete_file", json!({"path": "a.db"}));
        let prompt = justification_request(&context, &call, 20);
        assert!(prompt.contains(&format!("user: {}...", "x".repeat(20))));
        assert!(!prompt.contains(&"x".repeat(21)));
        assert!(prompt.contains("'delete_file'"));
        assert!(prompt.contains("\"path\": \"a.db\""));
    }

    #[test]
    fn test_tool_approval_summary_includes_source() {
        let proposal = ToolProposal {
            name: "double".into(),
            description: "Doubles a number".into(),
            parameters: vec![ParamSpec::new("n", ParamType::Int, "number")],
            source: "@tool\nfn double(n: int) -> str {\n    return str(n * 2);\n}\n".into(),
            risk_tier: RiskTier::Safe,
            rationale: "needed for math".into(),
            example_invocation: json!({"n": 42}),
        };
        let summary = tool_approval_summary(&proposal);
        assert!(summary.contains("Name: double"));
        assert!(summary.contains("Risk tier: SAFE"));
        assert!(summary.contains("- n (int): number"));
        assert!(summary.contains("return str(n * 2);"));
    }

    #[test]
    fn test_marker_constants_are_errors() {
        use crate::tools::is_error_payload;
        assert!(is_error_payload(DEFERRED_CRITICAL));
        assert!(is_error_payload(SKIPPED_AFTER_REJECTION));
        assert!(is_error_payload(BLOCKED_BY_GOVERNANCE));
        assert!(is_error_payload(&rejected_result("delete_file")));
    }
}
