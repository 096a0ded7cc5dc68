//! The execution engine.
//!
//! [`Engine`] drives the fixed state machine
//! `reasoning → router → {safe executor | critical gate → (suspend) → critical executor} → reasoning`
//! and persists a checkpoint after every run. A suspended session is resumed
//! only by [`Engine::resolve`], which claims the checkpoint with a
//! compare-and-swap so a pending action is decided at most once, even across
//! processes sharing the same store: the swap re-reads the stored version
//! from disk while holding the checkpoint's claim file.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use super::events::{EngineEvent, EventBus, Node};
use super::executor::{CriticalExecutor, SafeExecutor};
use super::gate::{CriticalGate, GateOutcome};
use super::governance::{ApprovalDecision, Governance, WebhookGovernance};
use super::loop_guard::LoopGuard;
use super::output::{ExecutionStatus, PendingActionRecord, RunReport};
use super::prompts;
use super::reasoning::ReasoningStep;
use super::router::{route, Route};
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::{Config, EngineConfig};
use crate::error::{GateError, Result};
use crate::forge::{CreateToolTool, ToolRegistry};
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::{
    Checkpoint, CheckpointStore, LifecycleState, Message, ResumePoint, Session, ToolCall,
};
use crate::tools::{builtin_tools, ToolCatalog, ToolContext};

/// Resumable, risk-gated agent execution engine.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use gateclaw::agent::Engine;
/// use gateclaw::config::Config;
/// use gateclaw::providers::OpenAIProvider;
///
/// let config = Config::load()?;
/// let engine = Engine::from_config(&config, Arc::new(OpenAIProvider::new("sk-..."))).await?;
/// let report = engine.submit_query("list the workspace", None).await?;
/// println!("{}: {}", report.state, report.message);
/// ```
pub struct Engine {
    config: EngineConfig,
    provider: Arc<dyn LLMProvider>,
    catalog: Arc<ToolCatalog>,
    store: CheckpointStore,
    registry: Option<Arc<ToolRegistry>>,
    governance: Option<Arc<dyn Governance>>,
    events: EventBus,
    workspace: Option<PathBuf>,
    chat_options: ChatOptions,
    /// Serializes runs per session id within this process; entries are
    /// dropped once no run holds or waits for them
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn LLMProvider>,
        catalog: Arc<ToolCatalog>,
        store: CheckpointStore,
    ) -> Self {
        Self {
            config,
            provider,
            catalog,
            store,
            registry: None,
            governance: None,
            events: EventBus::default(),
            workspace: None,
            chat_options: ChatOptions::new(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Enable tool creation: registers the `create_tool` meta-tool.
    pub async fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.catalog.register(Arc::new(CreateToolTool)).await;
        self.registry = Some(registry);
        self
    }

    pub fn with_governance(mut self, governance: Arc<dyn Governance>) -> Self {
        self.governance = Some(governance);
        self
    }

    /// Root directory handed to tools through their context.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_chat_options(mut self, options: ChatOptions) -> Self {
        self.chat_options = options;
        self
    }

    /// Build a fully wired engine from configuration.
    ///
    /// Opens the checkpoint store and tool registry under the data directory,
    /// registers the built-in workspace tools, hot-loads every registered
    /// generated tool and installs webhook governance when configured.
    pub async fn from_config(config: &Config, provider: Arc<dyn LLMProvider>) -> Result<Self> {
        let store = CheckpointStore::with_path(config.sessions_dir())?;
        let catalog = Arc::new(ToolCatalog::new());

        let workspace = config.workspace_path();
        if config.workspace.builtin_tools {
            tokio::fs::create_dir_all(&workspace).await?;
            for tool in builtin_tools() {
                catalog.register(tool).await;
            }
        }

        let registry = Arc::new(ToolRegistry::open(config.tools_dir()).await?);
        let loaded = registry.load_all(&catalog).await;
        info!(loaded = loaded, "Generated tools loaded");

        let mut options = ChatOptions::new();
        options.max_tokens = config.provider.max_tokens;
        options.temperature = config.provider.temperature;

        let mut engine = Self::new(config.engine.clone(), provider, catalog, store)
            .with_workspace(workspace)
            .with_chat_options(options)
            .with_registry(registry)
            .await;

        if let Some(endpoint) = &config.governance.endpoint {
            let governance = WebhookGovernance::new(
                endpoint,
                Duration::from_secs(config.governance.timeout_secs),
            )?;
            engine = engine.with_governance(Arc::new(governance));
        }
        Ok(engine)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn registry(&self) -> Option<&Arc<ToolRegistry>> {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to the structured event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Start or continue a session with a new query.
    ///
    /// Runs until the session completes, fails, or suspends at the critical
    /// gate. A fresh session id is generated when none is given.
    ///
    /// # Errors
    ///
    /// - [`GateError::Session`] when the given session id is blank
    /// - [`GateError::InvalidState`] when the session awaits approval or is BLOCKED
    /// - [`GateError::Checkpoint`] when its checkpoint cannot be read
    pub async fn submit_query(&self, query: &str, session_id: Option<&str>) -> Result<RunReport> {
        let session_id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(GateError::Session("session id must not be empty".into()))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        self.with_session_lock(&session_id, self.submit_locked(query, &session_id))
            .await
    }

    async fn submit_locked(&self, query: &str, session_id: &str) -> Result<RunReport> {
        let mut session = match self.store.get(session_id).await? {
            Some(checkpoint) => {
                let session = checkpoint.session;
                match session.state {
                    LifecycleState::AwaitingApproval => {
                        return Err(GateError::InvalidState(format!(
                            "session {} is awaiting approval; decide the pending action first",
                            session_id
                        )))
                    }
                    LifecycleState::Blocked => {
                        return Err(GateError::InvalidState(format!(
                            "session {} is BLOCKED",
                            session_id
                        )))
                    }
                    _ => session,
                }
            }
            None => Session::new(session_id),
        };

        info!(session_id = %session_id, "Query submitted");
        session.last_error = None;
        session.set_state(LifecycleState::Running);
        session.begin_query(query);

        let mut nodes = Vec::new();
        self.run_loop(&mut session, &mut nodes).await;
        self.save(&session).await?;
        self.finish(&session);
        Ok(RunReport::new(&session, nodes))
    }

    /// Apply an external decision to the session's pending action and resume.
    ///
    /// # Errors
    ///
    /// - [`GateError::NotFound`] / [`GateError::Checkpoint`] when the checkpoint is missing or unreadable
    /// - [`GateError::InvalidState`] when nothing is pending, or the decision was already applied
    /// - [`GateError::ApprovalMismatch`] when `action_id` names a different action
    pub async fn resolve(&self, decision: ApprovalDecision) -> Result<RunReport> {
        let session_id = decision.session_id.clone();
        self.with_session_lock(&session_id, self.resolve_locked(decision))
            .await
    }

    async fn resolve_locked(&self, decision: ApprovalDecision) -> Result<RunReport> {
        let checkpoint = self.store.load(&decision.session_id).await?;
        if checkpoint.session.state.is_terminal() {
            return Err(GateError::InvalidState(format!(
                "session {} already finished as {}; decision not applied",
                decision.session_id, checkpoint.session.state
            )));
        }
        if checkpoint.session.state != LifecycleState::AwaitingApproval
            || checkpoint.next != Some(ResumePoint::CriticalExecutor)
        {
            return Err(GateError::InvalidState(format!(
                "session {} is {}, not AWAITING_APPROVAL",
                decision.session_id, checkpoint.session.state
            )));
        }
        let Some(action) = checkpoint.session.pending_action.clone() else {
            return Err(GateError::InvalidState(format!(
                "session {} has no pending action",
                decision.session_id
            )));
        };
        if let Some(action_id) = &decision.action_id {
            if action_id != &action.id {
                return Err(GateError::ApprovalMismatch(format!(
                    "decision names action {}, pending action is {}",
                    action_id, action.id
                )));
            }
        }

        // Claim the decision before anything runs.
        let mut session = checkpoint.session.clone();
        session.pending_action = None;
        session.set_state(LifecycleState::Running);
        let claimed = self
            .store
            .compare_and_swap(Checkpoint::new(session.clone(), None), checkpoint.version)
            .await?;
        if claimed.is_none() {
            return Err(GateError::InvalidState(format!(
                "a decision for session {} was already applied",
                decision.session_id
            )));
        }

        info!(
            session_id = %session.id,
            tool = %action.call.name,
            approved = decision.approved,
            "Applying approval decision"
        );
        self.events.publish(EngineEvent::Resumed {
            session_id: session.id.clone(),
            approved: decision.approved,
        });

        let mut nodes = Vec::new();
        self.enter(&session, Node::CriticalExecutor, &mut nodes);
        let ctx = self.tool_context(&session.id);
        let executor = self.critical_executor();
        if decision.approved {
            executor
                .approve(&mut session, action, &decision.decided_by, &ctx)
                .await;
        } else {
            executor
                .reject(&mut session, action, decision.reason_or_default())
                .await;
        }
        self.save(&session).await?;

        self.run_loop(&mut session, &mut nodes).await;
        self.save(&session).await?;
        self.finish(&session);
        Ok(RunReport::new(&session, nodes))
    }

    /// Convenience wrapper building an [`ApprovalDecision`].
    pub async fn resolve_approval(
        &self,
        session_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<RunReport> {
        self.resolve(ApprovalDecision::new(
            session_id,
            approved,
            reason.map(str::to_string),
        ))
        .await
    }

    /// Current lifecycle state and message of a session.
    pub async fn status(&self, session_id: &str) -> Result<ExecutionStatus> {
        let checkpoint = self.store.load(session_id).await?;
        Ok(ExecutionStatus::of(&checkpoint.session))
    }

    /// Status of every stored session, sorted by id. Unreadable checkpoints
    /// are logged and skipped.
    pub async fn sessions(&self) -> Result<Vec<ExecutionStatus>> {
        let mut statuses = Vec::new();
        for id in self.store.list().await? {
            match self.store.load(&id).await {
                Ok(checkpoint) => statuses.push(ExecutionStatus::of(&checkpoint.session)),
                Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(statuses)
    }

    /// The pending action, while the session awaits approval.
    pub async fn pending_action(&self, session_id: &str) -> Result<Option<PendingActionRecord>> {
        let checkpoint = self.store.load(session_id).await?;
        let session = &checkpoint.session;
        if session.state != LifecycleState::AwaitingApproval {
            return Ok(None);
        }
        Ok(session
            .pending_action
            .as_ref()
            .map(|a| PendingActionRecord::new(&session.id, a)))
    }

    /// Full message history of a session.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self.store.load(session_id).await?.session.messages)
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Run reasoning turns until the session leaves RUNNING.
    async fn run_loop(&self, session: &mut Session, nodes: &mut Vec<String>) {
        let guard = LoopGuard::new(self.config.loop_window, self.config.loop_threshold);
        let reasoning = ReasoningStep::new(
            self.provider.clone(),
            self.config.model.clone(),
            self.chat_options.clone(),
            self.config
                .system_prompt
                .as_deref()
                .unwrap_or(prompts::SYSTEM_PROMPT),
        );
        let ctx = self.tool_context(&session.id);

        for _ in 0..self.config.max_iterations {
            self.enter(session, Node::Reasoning, nodes);

            if let Some(verdict) = guard.check(session.current_query()) {
                warn!(
                    session_id = %session.id,
                    tool = %verdict.tool,
                    repeats = verdict.repeats,
                    "Loop detected"
                );
                log_audit_event(
                    AuditCategory::LoopDetected,
                    AuditSeverity::Warning,
                    "repeated_tool_call",
                    &format!("{} x{} in session {}", verdict.signature, verdict.repeats, session.id),
                    true,
                );
                self.events.publish(EngineEvent::LoopDetected {
                    session_id: session.id.clone(),
                    tool: verdict.tool.clone(),
                });
                session.add_message(Message::assistant(&prompts::loop_diagnostic(
                    &verdict.tool,
                    verdict.repeats,
                )));
                session.set_state(LifecycleState::Completed);
                return;
            }

            let tools = self.catalog.definitions().await;
            if let Err(e) = reasoning.run(session, tools).await {
                error!(session_id = %session.id, error = %e, "Inference failed");
                session.fail(LifecycleState::Error, &format!("Inference failed: {}", e));
                return;
            }

            self.enter(session, Node::Router, nodes);
            let tiers = self.catalog.tiers().await;
            let decision = match session.last_message() {
                Some(message) => route(message, |name| tiers.get(name).copied()),
                None => Route::Finish(super::router::FinishReason::Empty),
            };
            self.events.publish(EngineEvent::RouteDecided {
                session_id: session.id.clone(),
                route: decision.to_string(),
            });

            match decision {
                Route::Finish(_) => {
                    session.set_state(LifecycleState::Completed);
                    return;
                }
                Route::SafeExecutor => {
                    self.enter(session, Node::SafeExecutor, nodes);
                    self.safe_executor().run(session, &ctx).await;
                }
                Route::CriticalGate { index } => {
                    self.enter(session, Node::CriticalGate, nodes);
                    match self.critical_gate().run(session, index).await {
                        Ok(GateOutcome::Suspended(record)) => {
                            self.events.publish(EngineEvent::Suspended {
                                session_id: session.id.clone(),
                                tool: record.tool_name,
                                action_id: record.action_id,
                            });
                            return;
                        }
                        Ok(GateOutcome::Blocked(_)) => return,
                        Ok(GateOutcome::Declined {
                            call,
                            content,
                            deferred,
                        }) => {
                            session.add_message(Message::tool_result(&call.id, &content, true));
                            self.critical_executor()
                                .run_deferred(session, &deferred, &ctx)
                                .await;
                        }
                        Err(e) => {
                            error!(session_id = %session.id, error = %e, "Critical gate failed");
                            answer_unexecuted(session, &format!("ERROR: not executed: {}", e));
                            session.fail(LifecycleState::Error, &format!("Inference failed: {}", e));
                            return;
                        }
                    }
                }
            }
        }

        warn!(session_id = %session.id, max = self.config.max_iterations, "Iteration limit reached");
        session.add_message(Message::assistant(&prompts::iteration_limit(
            self.config.max_iterations,
        )));
        session.set_state(LifecycleState::Completed);
    }

    fn safe_executor(&self) -> SafeExecutor {
        SafeExecutor::new(self.catalog.clone(), self.events.clone())
    }

    fn critical_executor(&self) -> CriticalExecutor {
        CriticalExecutor::new(
            self.catalog.clone(),
            self.registry.clone(),
            self.events.clone(),
        )
    }

    fn critical_gate(&self) -> CriticalGate {
        CriticalGate::new(
            self.provider.clone(),
            self.config.model.clone(),
            self.chat_options.clone(),
        )
        .with_governance(self.governance.clone())
        .with_context(
            self.config.justification_window(),
            self.config.context_truncate_chars,
        )
        .with_generator_context(
            self.config.generator_context_messages,
            self.config.context_truncate_chars,
        )
    }

    fn tool_context(&self, session_id: &str) -> ToolContext {
        let ctx = ToolContext::new().with_session(session_id);
        match &self.workspace {
            Some(dir) => ctx.with_workspace(&dir.to_string_lossy()),
            None => ctx,
        }
    }

    fn enter(&self, session: &Session, node: Node, nodes: &mut Vec<String>) {
        nodes.push(node.to_string());
        self.events.publish(EngineEvent::NodeEntered {
            session_id: session.id.clone(),
            node,
        });
    }

    fn finish(&self, session: &Session) {
        info!(session_id = %session.id, state = %session.state, "Run finished");
        self.events.publish(EngineEvent::Finished {
            session_id: session.id.clone(),
            state: session.state,
        });
    }

    async fn save(&self, session: &Session) -> Result<u64> {
        let next = (session.state == LifecycleState::AwaitingApproval)
            .then_some(ResumePoint::CriticalExecutor);
        self.store.put(Checkpoint::new(session.clone(), next)).await
    }

    /// Run `work` while holding the in-process lock for `session_id`.
    async fn with_session_lock<T>(
        &self,
        session_id: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.session_locks.lock().await;
        drop(lock);
        if locks
            .get(session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(session_id);
        }
        result
    }
}

/// Give every call of the latest assistant message without a result an error result.
fn answer_unexecuted(session: &mut Session, content: &str) {
    let calls: Vec<ToolCall> = session
        .last_assistant()
        .map(|m| m.tool_calls().to_vec())
        .unwrap_or_default();
    let answered: Vec<String> = session
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        })
        .collect();
    for call in calls {
        if !answered.contains(&call.id) {
            session.add_message(Message::tool_result(&call.id, content, true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LLMResponse, LLMToolCall, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct Scripted(StdMutex<Vec<LLMResponse>>);

    impl Scripted {
        fn new(mut replies: Vec<LLMResponse>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self(StdMutex::new(replies)))
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| GateError::Provider("script exhausted".into()))
        }
        fn default_model(&self) -> &str {
            "test"
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn engine(replies: Vec<LLMResponse>) -> Engine {
        Engine::new(
            EngineConfig::default(),
            Scripted::new(replies),
            Arc::new(ToolCatalog::new()),
            CheckpointStore::new_memory(),
        )
    }

    #[tokio::test]
    async fn test_text_answer_completes() {
        let engine = engine(vec![LLMResponse::text("Hello there.")]);
        let report = engine.submit_query("hi", Some("s1")).await.unwrap();
        assert_eq!(report.state, LifecycleState::Completed);
        assert_eq!(report.message, "Hello there.");
        assert_eq!(report.output.nodes_visited, vec!["reasoning", "router"]);

        let status = engine.status("s1").await.unwrap();
        assert_eq!(status.state, LifecycleState::Completed);
    }

    #[tokio::test]
    async fn test_iteration_limit_completes() {
        let mut config = EngineConfig::default();
        config.max_iterations = 2;
        let replies = (0..2)
            .map(|i| {
                LLMResponse::with_tools(
                    "",
                    vec![LLMToolCall::new("c", "lookup", &format!(r#"{{"n": {}}}"#, i))],
                )
            })
            .collect();
        let engine = Engine::new(
            config,
            Scripted::new(replies),
            Arc::new(ToolCatalog::new()),
            CheckpointStore::new_memory(),
        );
        let report = engine.submit_query("go", Some("s")).await.unwrap();
        assert_eq!(report.state, LifecycleState::Completed);
        assert!(report.message.contains("limit of 2"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_session() {
        let engine = engine(vec![]);
        assert!(matches!(
            engine.status("nope").await.unwrap_err(),
            GateError::NotFound(_)
        ));
        assert!(matches!(
            engine.pending_action("nope").await.unwrap_err(),
            GateError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_sessions_lists_every_status() {
        let engine = engine(vec![LLMResponse::text("one"), LLMResponse::text("two")]);
        engine.submit_query("a", Some("b-session")).await.unwrap();
        engine.submit_query("b", Some("a-session")).await.unwrap();
        let sessions = engine.sessions().await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a-session", "b-session"]);
        assert!(sessions.iter().all(|s| s.state == LifecycleState::Completed));
    }

    #[tokio::test]
    async fn test_blank_session_id_rejected() {
        let engine = engine(vec![LLMResponse::text("unused")]);
        for id in ["", "   "] {
            let err = engine.submit_query("hi", Some(id)).await.unwrap_err();
            assert!(matches!(err, GateError::Session(_)));
        }
        assert!(engine.store().get("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_locks_pruned_after_runs() {
        let engine = engine(vec![LLMResponse::text("one"), LLMResponse::text("two")]);
        engine.submit_query("a", Some("s-a")).await.unwrap();
        engine.submit_query("b", None).await.unwrap();
        let _ = engine.resolve_approval("s-a", true, None).await;
        assert!(engine.session_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_decision_on_finished_session_refused() {
        let engine = engine(vec![LLMResponse::text("done")]);
        engine.submit_query("hi", Some("fin")).await.unwrap();
        let err = engine.resolve_approval("fin", true, None).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidState(ref m) if m.contains("already finished")));
    }

    #[test]
    fn test_answer_unexecuted_skips_answered_calls() {
        let mut session = Session::new("s");
        session.add_message(Message::assistant_with_tools(
            "",
            vec![
                ToolCall::new("a", "x", serde_json::json!({})),
                ToolCall::new("b", "y", serde_json::json!({})),
            ],
        ));
        session.add_message(Message::tool_result("a", "done", false));
        answer_unexecuted(&mut session, "ERROR: not executed");
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[2], Message::tool_result("b", "ERROR: not executed", true));
    }
}
