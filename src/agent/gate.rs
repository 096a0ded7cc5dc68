//! Critical gate
//!
//! Freezes the first CRITICAL call of a turn as the session's pending action.
//! An ordinary call gets a short justification from a secondary inference
//! call. A `create_tool` call runs the generator and validator here instead,
//! so what the reviewer approves is the exact tool that will be registered.
//! If a governance authority is configured it must countersign first.

use std::sync::Arc;

use tracing::{info, warn};

use super::governance::Governance;
use super::output::PendingActionRecord;
use super::prompts;
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{GateError, Result};
use crate::forge::meta_tool::capability_of;
use crate::forge::{validate_proposal, ToolGenerator, CREATE_TOOL};
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::{LifecycleState, Message, PendingAction, Session, ToolCall};

/// What the gate did with the call.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Pending action recorded; the session awaits a decision.
    Suspended(PendingActionRecord),
    /// Governance refused to countersign; the session is BLOCKED.
    Blocked(String),
    /// The call was answered with an error without suspending (e.g. a
    /// generated tool failed validation). The caller appends `content` as the
    /// call's result and settles `deferred`.
    Declined {
        call: ToolCall,
        content: String,
        deferred: Vec<ToolCall>,
    },
}

pub struct CriticalGate {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
    options: ChatOptions,
    governance: Option<Arc<dyn Governance>>,
    generator: ToolGenerator,
    context_messages: usize,
    truncate_chars: usize,
}

impl CriticalGate {
    pub fn new(provider: Arc<dyn LLMProvider>, model: Option<String>, options: ChatOptions) -> Self {
        let generator = ToolGenerator::new(provider.clone()).with_model(model.clone());
        Self {
            provider,
            model,
            options,
            governance: None,
            generator,
            context_messages: 6,
            truncate_chars: 200,
        }
    }

    pub fn with_governance(mut self, governance: Option<Arc<dyn Governance>>) -> Self {
        self.governance = governance;
        self
    }

    /// Justification context size and per-message truncation.
    pub fn with_context(mut self, messages: usize, truncate_chars: usize) -> Self {
        self.context_messages = messages;
        self.truncate_chars = truncate_chars;
        self
    }

    /// Generator context size and per-message truncation.
    pub fn with_generator_context(mut self, messages: usize, truncate_chars: usize) -> Self {
        self.generator = self.generator.with_context(messages, truncate_chars);
        self
    }

    /// Gate the call at `index` of the latest assistant message.
    ///
    /// # Errors
    ///
    /// Gateway failures (justification or generation) are returned as-is.
    pub async fn run(&self, session: &mut Session, index: usize) -> Result<GateOutcome> {
        let calls: Vec<ToolCall> = session
            .last_assistant()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        let Some(call) = calls.get(index).cloned() else {
            return Err(GateError::InvalidState(format!(
                "no tool call at index {} to gate",
                index
            )));
        };
        let deferred: Vec<ToolCall> = calls
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, c)| c.clone())
            .collect();

        let action = if call.name == CREATE_TOOL {
            match self.prepare_tool_creation(session, &call).await? {
                Ok(action) => action,
                Err(content) => {
                    return Ok(GateOutcome::Declined {
                        call,
                        content,
                        deferred,
                    })
                }
            }
        } else {
            let justification = self.justify(session, &call).await?;
            PendingAction::new(call, &justification)
        };
        let action = action.with_deferred(deferred);
        let record = PendingActionRecord::new(&session.id, &action);

        if let Some(governance) = &self.governance {
            if let Err(e) = governance.countersign(&record).await {
                let message = format!("Governance countersign failed: {}", e);
                warn!(session_id = %session.id, tool = %record.tool_name, error = %e, "Session blocked");
                log_audit_event(
                    AuditCategory::GovernanceBlocked,
                    AuditSeverity::Critical,
                    "countersign_failed",
                    &format!("{} in session {}: {}", record.tool_name, session.id, e),
                    true,
                );
                for c in &calls {
                    session.add_message(Message::tool_result(
                        &c.id,
                        prompts::BLOCKED_BY_GOVERNANCE,
                        true,
                    ));
                }
                session.fail(LifecycleState::Blocked, &message);
                return Ok(GateOutcome::Blocked(message));
            }
        }

        log_audit_event(
            AuditCategory::ApprovalRequested,
            AuditSeverity::Info,
            "critical_action_suspended",
            &format!("{} in session {}", record.tool_name, session.id),
            false,
        );
        info!(
            session_id = %session.id,
            tool = %record.tool_name,
            action_id = %record.action_id,
            "Awaiting approval"
        );
        session.justification = Some(action.justification.clone());
        session.pending_action = Some(action);
        session.set_state(LifecycleState::AwaitingApproval);
        Ok(GateOutcome::Suspended(record))
    }

    /// Ask the gateway why the agent wants to run `call`.
    async fn justify(&self, session: &Session, call: &ToolCall) -> Result<String> {
        let history: Vec<Message> = session
            .messages
            .iter()
            .filter(|m| !matches!(m, Message::System { .. }))
            .cloned()
            .collect();
        let start = history.len().saturating_sub(self.context_messages);
        let prompt = prompts::justification_request(&history[start..], call, self.truncate_chars);

        let response = self
            .provider
            .chat(
                vec![Message::user(&prompt)],
                vec![],
                self.model.as_deref(),
                self.options.clone(),
            )
            .await?;
        let text = response.content.trim();
        Ok(if text.is_empty() {
            prompts::DEFAULT_JUSTIFICATION.to_string()
        } else {
            text.to_string()
        })
    }

    /// Generate and validate the requested tool.
    ///
    /// The inner `Err` carries feedback for the model; the outer one is a
    /// gateway failure.
    async fn prepare_tool_creation(
        &self,
        session: &Session,
        call: &ToolCall,
    ) -> Result<std::result::Result<PendingAction, String>> {
        let Some(capability) = capability_of(&call.arguments) else {
            return Ok(Err(format!(
                "ERROR: `{}` needs a non-empty `capability_needed` argument",
                CREATE_TOOL
            )));
        };

        let proposal = match self.generator.generate(capability, &session.messages).await {
            Ok(proposal) => proposal,
            Err(GateError::Validation(msg)) => {
                return Ok(Err(prompts::validation_feedback("(unnamed)", &format!("- {}", msg))))
            }
            Err(e) => return Err(e),
        };

        let report = validate_proposal(&proposal);
        if !report.is_valid() {
            return Ok(Err(prompts::validation_feedback(
                &proposal.name,
                &report.issue_list(),
            )));
        }
        for warning in &report.warnings {
            warn!(tool = %proposal.name, warning = %warning, "Generated tool warning");
        }

        let summary = prompts::tool_approval_summary(&proposal);
        Ok(Ok(PendingAction::new(call.clone(), &summary).with_proposal(proposal)))
    }
}
