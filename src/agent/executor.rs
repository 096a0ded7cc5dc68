//! Safe and critical executors.
//!
//! [`SafeExecutor`] is the only path that runs SAFE tools and it refuses
//! anything CRITICAL. [`CriticalExecutor`] applies an approval decision to
//! the action frozen at the gate: on approval it runs exactly that call (or
//! registers the generated tool it carries), on rejection it runs nothing.

use std::sync::Arc;

use tracing::{info, warn};

use super::events::{EngineEvent, EventBus};
use super::prompts;
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::forge::{ToolProposal, ToolRegistry};
use crate::session::{Message, PendingAction, Session, ToolCall};
use crate::tools::{RiskTier, ToolCatalog, ToolContext, ToolOutput};

/// Runs SAFE tool calls.
#[derive(Clone)]
pub struct SafeExecutor {
    catalog: Arc<ToolCatalog>,
    events: EventBus,
}

impl SafeExecutor {
    pub fn new(catalog: Arc<ToolCatalog>, events: EventBus) -> Self {
        Self { catalog, events }
    }

    /// Execute one call. CRITICAL tools are refused, never run.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        if !call.has_valid_arguments() {
            return ToolOutput::error(format!(
                "Invalid arguments for `{}`: expected a JSON object, got {}",
                call.name, call.arguments
            ));
        }
        let tier = self.catalog.risk_tier(&call.name).await;
        if tier == Some(RiskTier::Critical) {
            warn!(tool = %call.name, "Safe executor refused critical tool");
            return ToolOutput::error(format!(
                "`{}` is CRITICAL and requires approval",
                call.name
            ));
        }
        let output = self
            .catalog
            .execute(&call.name, call.arguments.clone(), ctx)
            .await;
        self.publish(ctx, call, RiskTier::Safe, &output);
        output
    }

    /// Execute every call of the latest assistant message, in proposal order.
    pub async fn run(&self, session: &mut Session, ctx: &ToolContext) {
        let calls: Vec<ToolCall> = session
            .last_assistant()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        for call in &calls {
            let output = self.execute(call, ctx).await;
            session.add_message(Message::tool_result(&call.id, &output.content, output.is_error));
        }
    }

    fn publish(&self, ctx: &ToolContext, call: &ToolCall, tier: RiskTier, output: &ToolOutput) {
        self.events.publish(EngineEvent::ToolInvoked {
            session_id: ctx.session_id.clone().unwrap_or_default(),
            tool: call.name.clone(),
            tier,
            is_error: output.is_error,
        });
    }
}

/// Applies approval decisions to frozen critical actions.
pub struct CriticalExecutor {
    catalog: Arc<ToolCatalog>,
    registry: Option<Arc<ToolRegistry>>,
    safe: SafeExecutor,
}

impl CriticalExecutor {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        registry: Option<Arc<ToolRegistry>>,
        events: EventBus,
    ) -> Self {
        let safe = SafeExecutor::new(catalog.clone(), events);
        Self {
            catalog,
            registry,
            safe,
        }
    }

    /// Run the approved action exactly as frozen, then the deferred calls.
    pub async fn approve(
        &self,
        session: &mut Session,
        action: PendingAction,
        decided_by: &str,
        ctx: &ToolContext,
    ) {
        log_audit_event(
            AuditCategory::ApprovalGranted,
            AuditSeverity::Info,
            "critical_action_approved",
            &format!("{} approved by {} in session {}", action.call.name, decided_by, session.id),
            false,
        );

        let output = match &action.proposal {
            Some(proposal) => self.register(proposal, decided_by).await,
            None if !action.call.has_valid_arguments() => ToolOutput::error(format!(
                "Invalid arguments for `{}`: expected a JSON object",
                action.call.name
            )),
            None => {
                let output = self
                    .catalog
                    .execute(&action.call.name, action.call.arguments.clone(), ctx)
                    .await;
                self.safe
                    .publish(ctx, &action.call, RiskTier::Critical, &output);
                output
            }
        };
        info!(
            session_id = %session.id,
            tool = %action.call.name,
            is_error = output.is_error,
            "Critical action executed"
        );
        session.add_message(Message::tool_result(
            &action.call.id,
            &output.content,
            output.is_error,
        ));

        self.run_deferred(session, &action.deferred, ctx).await;
    }

    /// Answer the rejected call without running it; the USER notice goes last.
    pub async fn reject(&self, session: &mut Session, action: PendingAction, reason: &str) {
        log_audit_event(
            AuditCategory::ApprovalRejected,
            AuditSeverity::Warning,
            "critical_action_rejected",
            &format!("{} rejected in session {}: {}", action.call.name, session.id, reason),
            true,
        );

        session.add_message(Message::tool_result(
            &action.call.id,
            &prompts::rejected_result(&action.call.name),
            true,
        ));
        for call in &action.deferred {
            session.add_message(Message::tool_result(
                &call.id,
                prompts::SKIPPED_AFTER_REJECTION,
                true,
            ));
        }
        session.add_message(Message::user(&prompts::rejection_notice(
            &action.call.name,
            reason,
        )));
    }

    /// Settle calls held back by the gate: SAFE ones run, CRITICAL ones are deferred.
    pub async fn run_deferred(&self, session: &mut Session, deferred: &[ToolCall], ctx: &ToolContext) {
        for call in deferred {
            let output = if self.catalog.risk_tier(&call.name).await == Some(RiskTier::Critical) {
                ToolOutput::error(prompts::DEFERRED_CRITICAL)
            } else {
                self.safe.execute(call, ctx).await
            };
            session.add_message(Message::tool_result(&call.id, &output.content, output.is_error));
        }
    }

    async fn register(&self, proposal: &ToolProposal, decided_by: &str) -> ToolOutput {
        let Some(registry) = &self.registry else {
            return ToolOutput::error("No tool registry is configured; the tool was not created");
        };
        let entry = match registry.register(proposal, decided_by, &self.catalog).await {
            Ok(entry) => entry,
            Err(e) => return ToolOutput::error(format!("Tool registration failed: {}", e)),
        };
        if let Err(e) = registry.load_into(&entry.name, &self.catalog).await {
            return ToolOutput::error(format!("Tool `{}` registered but not loaded: {}", entry.name, e));
        }
        ToolOutput::text(prompts::tool_created(
            &entry.name,
            &entry.hash,
            &proposal.example_call(),
        ))
    }
}
