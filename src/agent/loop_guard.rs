//! Loop guard
//!
//! Looks at the tool calls of the most recent assistant turns. When the same
//! `(tool, canonical arguments)` signature shows up `threshold` times in a
//! row, the run is terminated instead of asking the model again.

use crate::session::Message;

/// A detected repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopVerdict {
    pub tool: String,
    pub signature: String,
    pub repeats: usize,
}

/// Sliding-window repetition detector.
#[derive(Debug, Clone, Copy)]
pub struct LoopGuard {
    window: usize,
    threshold: usize,
}

impl LoopGuard {
    /// `window` counts tool-call turns; `threshold` consecutive identical signatures trip it.
    pub fn new(window: usize, threshold: usize) -> Self {
        Self {
            window: window.max(1),
            threshold: threshold.max(2),
        }
    }

    /// Inspect `messages` (the current query) for a repeated signature.
    pub fn check(&self, messages: &[Message]) -> Option<LoopVerdict> {
        let turns: Vec<&Message> = messages
            .iter()
            .filter(|m| !m.tool_calls().is_empty())
            .collect();
        let start = turns.len().saturating_sub(self.window);

        let mut last: Option<String> = None;
        let mut repeats = 0;
        for turn in &turns[start..] {
            for call in turn.tool_calls() {
                let signature = call.signature();
                if last.as_deref() == Some(signature.as_str()) {
                    repeats += 1;
                } else {
                    repeats = 1;
                }
                if repeats >= self.threshold {
                    return Some(LoopVerdict {
                        tool: call.name.clone(),
                        signature,
                        repeats,
                    });
                }
                last = Some(signature);
            }
        }
        None
    }
}
