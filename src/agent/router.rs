//! Routing decision over the latest assistant message.

use std::fmt;

use crate::session::Message;
use crate::tools::RiskTier;

/// Phrases that mark an assistant reply as an explicit completion signal.
const COMPLETION_KEYWORDS: &[&str] = &[
    "task complete",
    "task completed",
    "task is complete",
    "all done",
    "done.",
];

/// Why the run terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Plain final answer
    Answer,
    /// The reply explicitly declared the task finished
    TaskComplete,
    /// Neither text nor tool calls
    Empty,
}

/// Next node after a reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SafeExecutor,
    /// Gate the CRITICAL call at `index` in the message's tool calls.
    CriticalGate { index: usize },
    Finish(FinishReason),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::SafeExecutor => write!(f, "safe_executor"),
            Route::CriticalGate { .. } => write!(f, "critical_gate"),
            Route::Finish(FinishReason::Answer) => write!(f, "finish"),
            Route::Finish(FinishReason::TaskComplete) => write!(f, "finish:task_complete"),
            Route::Finish(FinishReason::Empty) => write!(f, "finish:empty"),
        }
    }
}

/// Decide where a message goes.
///
/// `tier_of` resolves a tool name to its tier. Unknown names resolve as SAFE
/// so the safe executor reports them as missing; they can never execute.
/// The first CRITICAL call wins over any SAFE calls in the same message.
pub fn route<F>(message: &Message, tier_of: F) -> Route
where
    F: Fn(&str) -> Option<RiskTier>,
{
    let Message::Assistant {
        content,
        tool_calls,
    } = message
    else {
        return Route::Finish(FinishReason::Empty);
    };

    if tool_calls.is_empty() {
        let text = content.trim();
        if text.is_empty() {
            return Route::Finish(FinishReason::Empty);
        }
        if signals_completion(text) {
            return Route::Finish(FinishReason::TaskComplete);
        }
        return Route::Finish(FinishReason::Answer);
    }

    if let Some(index) = tool_calls
        .iter()
        .position(|c| tier_of(&c.name) == Some(RiskTier::Critical))
    {
        return Route::CriticalGate { index };
    }
    Route::SafeExecutor
}

fn signals_completion(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;
    use serde_json::json;

    fn tiers(name: &str) -> Option<RiskTier> {
        match name {
            "list_directory" | "read_file" => Some(RiskTier::Safe),
            "delete_file" | "write_file" => Some(RiskTier::Critical),
            _ => None,
        }
    }

    fn calls(names: &[&str]) -> Message {
        let calls = names
            .iter()
            .enumerate()
            .map(|(i, n)| ToolCall::new(&format!("c{}", i), n, json!({})))
            .collect();
        Message::assistant_with_tools("", calls)
    }

    #[test]
    fn test_text_only_finishes() {
        assert_eq!(
            route(&Message::assistant("There are 3 files."), tiers),
            Route::Finish(FinishReason::Answer)
        );
        assert_eq!(
            route(&Message::assistant("Task complete: removed it."), tiers),
            Route::Finish(FinishReason::TaskComplete)
        );
        assert_eq!(
            route(&Message::assistant("   "), tiers),
            Route::Finish(FinishReason::Empty)
        );
    }

    #[test]
    fn test_safe_calls_route_to_executor() {
        assert_eq!(route(&calls(&["list_directory", "read_file"]), tiers), Route::SafeExecutor);
    }

    #[test]
    fn test_first_critical_wins() {
        assert_eq!(
            route(&calls(&["list_directory", "write_file", "delete_file"]), tiers),
            Route::CriticalGate { index: 1 }
        );
    }

    #[test]
    fn test_unknown_tool_is_not_gated() {
        assert_eq!(route(&calls(&["made_up"]), tiers), Route::SafeExecutor);
    }

    #[test]
    fn test_non_assistant_message_finishes() {
        assert_eq!(
            route(&Message::user("hello"), tiers),
            Route::Finish(FinishReason::Empty)
        );
    }
}
