//! End-to-end tests for the execution engine.
//!
//! The inference gateway is replaced by a scripted provider that replays
//! canned replies and records every message list it was sent; tools are
//! counting stand-ins so side effects can be asserted exactly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use gateclaw::agent::{ApprovalDecision, Engine, EngineEvent, Governance, PendingActionRecord};
use gateclaw::config::EngineConfig;
use gateclaw::providers::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};
use gateclaw::session::{CheckpointStore, LifecycleState, Message};
use gateclaw::tools::{builtin_tools, RiskTier, Tool, ToolCatalog, ToolContext, ToolOutput};
use gateclaw::{GateError, Result};

// ============================================================================
// Test doubles
// ============================================================================

struct ScriptedProvider {
    replies: Mutex<Vec<LLMResponse>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn new(mut replies: Vec<LLMResponse>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        self.calls.lock().unwrap().push(messages);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| GateError::Provider("gateway unavailable".into()))
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct CountingTool {
    name: &'static str,
    tier: RiskTier,
    count: Arc<AtomicUsize>,
}

impl CountingTool {
    fn new(name: &'static str, tier: RiskTier) -> (Arc<Self>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let tool = Arc::new(Self {
            name,
            tier,
            count: count.clone(),
        });
        (tool, count)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Counts its invocations"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"target": {"type": "string"}}})
    }

    fn risk_tier(&self) -> RiskTier {
        self.tier
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolOutput::text(format!("{} ran ({})", self.name, n)))
    }
}

mockall::mock! {
    pub Gov {}

    #[async_trait]
    impl Governance for Gov {
        async fn countersign(&self, record: &PendingActionRecord) -> Result<()>;
    }
}

fn call(id: &str, name: &str, args: Value) -> LLMResponse {
    LLMResponse::with_tools("", vec![LLMToolCall::new(id, name, &args.to_string())])
}

fn wipe(id: &str) -> LLMResponse {
    call(id, "wipe", json!({"target": "db"}))
}

async fn engine_with(
    replies: Vec<LLMResponse>,
    store: CheckpointStore,
) -> (Engine, Arc<ScriptedProvider>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let provider = ScriptedProvider::new(replies);
    let catalog = Arc::new(ToolCatalog::new());
    let (lookup, lookups) = CountingTool::new("lookup", RiskTier::Safe);
    let (wipe, wipes) = CountingTool::new("wipe", RiskTier::Critical);
    catalog.register(lookup).await;
    catalog.register(wipe).await;
    let engine = Engine::new(EngineConfig::default(), provider.clone(), catalog, store);
    (engine, provider, lookups, wipes)
}

// ============================================================================
// Approval gating
// ============================================================================

#[tokio::test]
async fn test_critical_tool_runs_only_after_approval() {
    let (engine, _, _, wipes) = engine_with(
        vec![
            wipe("c1"),
            LLMResponse::text("Wiping clears stale rows."),
            LLMResponse::text("The database was wiped."),
        ],
        CheckpointStore::new_memory(),
    )
    .await;

    let report = engine.submit_query("wipe the db", Some("s1")).await.unwrap();
    assert_eq!(report.state, LifecycleState::AwaitingApproval);
    assert_eq!(wipes.load(Ordering::SeqCst), 0);

    let pending = report.pending.expect("pending action");
    assert_eq!(pending.tool_name, "wipe");
    assert_eq!(pending.arguments, json!({"target": "db"}));
    assert!(pending.justification.contains("Wiping clears stale rows."));

    let report = engine.resolve_approval("s1", true, None).await.unwrap();
    assert_eq!(wipes.load(Ordering::SeqCst), 1);
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(report.message, "The database was wiped.");
    assert!(engine.pending_action("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_safe_calls_run_without_approval() {
    let (engine, _, lookups, _) = engine_with(
        vec![
            call("c1", "lookup", json!({"target": "a"})),
            call("c2", "lookup", json!({"target": "b"})),
            LLMResponse::text("Looked up both."),
        ],
        CheckpointStore::new_memory(),
    )
    .await;

    let report = engine.submit_query("look up a and b", Some("s")).await.unwrap();
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(report.output.tool_call_count, 2);
    assert!(report
        .output
        .nodes_visited
        .iter()
        .any(|n| n == "safe_executor"));
}

#[tokio::test]
async fn test_co_proposed_safe_call_waits_for_approval() {
    let mixed = LLMResponse::with_tools(
        "",
        vec![
            LLMToolCall::new("c1", "lookup", r#"{"target": "a"}"#),
            LLMToolCall::new("c2", "wipe", r#"{"target": "db"}"#),
        ],
    );
    let (engine, _, lookups, wipes) = engine_with(
        vec![mixed, LLMResponse::text("needed"), LLMResponse::text("done")],
        CheckpointStore::new_memory(),
    )
    .await;

    let report = engine.submit_query("go", Some("s")).await.unwrap();
    assert_eq!(report.state, LifecycleState::AwaitingApproval);
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert_eq!(wipes.load(Ordering::SeqCst), 0);

    engine.resolve_approval("s", true, None).await.unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert_eq!(wipes.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Resumability
// ============================================================================

#[tokio::test]
async fn test_suspended_session_resumes_in_new_engine() {
    let dir = tempdir().unwrap();

    let (first, _, _, wipes) = engine_with(
        vec![wipe("c1"), LLMResponse::text("justified")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;
    let report = first.submit_query("wipe it", Some("persisted")).await.unwrap();
    assert_eq!(report.state, LifecycleState::AwaitingApproval);
    let before = first.history("persisted").await.unwrap();
    drop(first);

    let (second, _, _, second_wipes) = engine_with(
        vec![LLMResponse::text("All done.")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;
    assert_eq!(second.history("persisted").await.unwrap(), before);
    let pending = second.pending_action("persisted").await.unwrap().unwrap();
    assert_eq!(pending.tool_name, "wipe");

    let report = second.resolve_approval("persisted", true, None).await.unwrap();
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(wipes.load(Ordering::SeqCst), 0);
    assert_eq!(second_wipes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_decision_applies_at_most_once() {
    let (engine, _, _, wipes) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why"), LLMResponse::text("ok")],
        CheckpointStore::new_memory(),
    )
    .await;
    engine.submit_query("wipe", Some("s")).await.unwrap();
    engine.resolve_approval("s", true, None).await.unwrap();

    let err = engine.resolve_approval("s", true, None).await.unwrap_err();
    assert!(matches!(err, GateError::InvalidState(_)));
    assert_eq!(wipes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_decision_applies_once_across_engines_sharing_storage() {
    let dir = tempdir().unwrap();
    let (first, _, _, first_wipes) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why"), LLMResponse::text("first done")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;
    let (second, _, _, second_wipes) = engine_with(
        vec![LLMResponse::text("second done")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;

    first.submit_query("wipe", Some("shared")).await.unwrap();
    assert!(first.pending_action("shared").await.unwrap().is_some());

    let report = second.resolve_approval("shared", true, None).await.unwrap();
    assert_eq!(report.state, LifecycleState::Completed);

    // The first engine still has the suspended checkpoint cached.
    let err = first.resolve_approval("shared", true, None).await.unwrap_err();
    assert!(matches!(err, GateError::InvalidState(_)));
    assert_eq!(first_wipes.load(Ordering::SeqCst), 0);
    assert_eq!(second_wipes.load(Ordering::SeqCst), 1);
    assert_eq!(
        first.status("shared").await.unwrap().state,
        LifecycleState::Completed
    );
}

#[tokio::test]
async fn test_concurrent_decisions_from_two_engines_single_winner() {
    let dir = tempdir().unwrap();
    let (origin, _, _, _) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;
    origin.submit_query("wipe", Some("race")).await.unwrap();

    let (left, _, _, left_wipes) = engine_with(
        vec![LLMResponse::text("left done")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;
    let (right, _, _, right_wipes) = engine_with(
        vec![LLMResponse::text("right done")],
        CheckpointStore::with_path(dir.path().to_path_buf()).unwrap(),
    )
    .await;

    let (a, b) = tokio::join!(
        left.resolve_approval("race", true, None),
        right.resolve_approval("race", true, None)
    );
    assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
    assert_eq!(
        left_wipes.load(Ordering::SeqCst) + right_wipes.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_decision_for_other_action_is_refused() {
    let (engine, _, _, wipes) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::new_memory(),
    )
    .await;
    engine.submit_query("wipe", Some("s")).await.unwrap();

    let decision = ApprovalDecision::new("s", true, None).for_action("not-the-pending-one");
    let err = engine.resolve(decision).await.unwrap_err();
    assert!(matches!(err, GateError::ApprovalMismatch(_)));
    assert_eq!(wipes.load(Ordering::SeqCst), 0);

    let status = engine.status("s").await.unwrap();
    assert_eq!(status.state, LifecycleState::AwaitingApproval);
}

#[tokio::test]
async fn test_resolve_unknown_session() {
    let (engine, _, _, _) = engine_with(vec![], CheckpointStore::new_memory()).await;
    let err = engine.resolve_approval("ghost", true, None).await.unwrap_err();
    assert!(matches!(err, GateError::NotFound(_)));
}

#[tokio::test]
async fn test_query_refused_while_awaiting_approval() {
    let (engine, _, _, _) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::new_memory(),
    )
    .await;
    engine.submit_query("wipe", Some("s")).await.unwrap();

    let err = engine.submit_query("something else", Some("s")).await.unwrap_err();
    assert!(matches!(err, GateError::InvalidState(_)));
}

// ============================================================================
// Rejection
// ============================================================================

#[tokio::test]
async fn test_rejection_notice_is_last_message_sent() {
    let (engine, provider, _, wipes) = engine_with(
        vec![
            wipe("c1"),
            LLMResponse::text("why"),
            LLMResponse::text("Understood, I will not wipe anything."),
        ],
        CheckpointStore::new_memory(),
    )
    .await;
    engine.submit_query("wipe", Some("s")).await.unwrap();

    let report = engine
        .resolve_approval("s", false, Some("policy violation"))
        .await
        .unwrap();
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(wipes.load(Ordering::SeqCst), 0);

    let sent = provider.sent();
    let last = sent.last().unwrap().last().unwrap();
    match last {
        Message::User { content } => {
            assert!(content.contains("REJECTED"));
            assert!(content.contains("policy violation"));
            assert!(content.contains("wipe"));
        }
        other => panic!("expected the rejection notice, got {:?}", other),
    }

    let history = engine.history("s").await.unwrap();
    assert!(history
        .iter()
        .any(|m| matches!(m, Message::ToolResult { tool_call_id, is_error: true, .. } if tool_call_id == "c1")));
}

// ============================================================================
// Loop guard
// ============================================================================

#[tokio::test]
async fn test_identical_calls_are_cut_off() {
    let replies = (1..=6)
        .map(|i| call(&format!("c{}", i), "lookup", json!({"target": "same"})))
        .collect();
    let (engine, _, lookups, _) = engine_with(replies, CheckpointStore::new_memory()).await;

    let report = engine.submit_query("loop forever", Some("s")).await.unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 3);
    assert_eq!(report.state, LifecycleState::Completed);
    assert!(report.message.contains("lookup"));
}

// ============================================================================
// Governance and failures
// ============================================================================

#[tokio::test]
async fn test_governance_refusal_blocks_session() {
    let mut governance = MockGov::new();
    governance
        .expect_countersign()
        .times(1)
        .returning(|_| Err(GateError::Governance("countersignature denied".into())));

    let (engine, _, _, wipes) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::new_memory(),
    )
    .await;
    let engine = engine.with_governance(Arc::new(governance));

    let report = engine.submit_query("wipe", Some("s")).await.unwrap();
    assert_eq!(report.state, LifecycleState::Blocked);
    assert!(report.pending.is_none());
    assert_eq!(wipes.load(Ordering::SeqCst), 0);

    let err = engine.submit_query("try again", Some("s")).await.unwrap_err();
    assert!(matches!(err, GateError::InvalidState(_)));
}

#[tokio::test]
async fn test_governance_countersign_allows_suspension() {
    let mut governance = MockGov::new();
    governance
        .expect_countersign()
        .withf(|record| record.tool_name == "wipe")
        .times(1)
        .returning(|_| Ok(()));

    let (engine, _, _, _) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::new_memory(),
    )
    .await;
    let engine = engine.with_governance(Arc::new(governance));

    let report = engine.submit_query("wipe", Some("s")).await.unwrap();
    assert_eq!(report.state, LifecycleState::AwaitingApproval);
}

#[tokio::test]
async fn test_gateway_failure_is_error_state() {
    let (engine, _, _, _) = engine_with(vec![], CheckpointStore::new_memory()).await;
    let report = engine.submit_query("hello", Some("s")).await.unwrap();
    assert_eq!(report.state, LifecycleState::Error);
    assert!(report.message.contains("Inference failed"));

    let status = engine.status("s").await.unwrap();
    assert_eq!(status.state, LifecycleState::Error);
}

// ============================================================================
// Workspace tools
// ============================================================================

#[tokio::test]
async fn test_list_then_rejected_delete_keeps_file() {
    let workspace = tempdir().unwrap();
    std::fs::write(workspace.path().join("notes.txt"), "keep me").unwrap();

    let catalog = Arc::new(ToolCatalog::new());
    for tool in builtin_tools() {
        catalog.register(tool).await;
    }
    let provider = ScriptedProvider::new(vec![
        call("c1", "list_directory", json!({"path": "."})),
        call("c2", "delete_file", json!({"path": "notes.txt"})),
        LLMResponse::text("The user asked for the file to be removed."),
        LLMResponse::text("Understood, notes.txt stays."),
    ]);
    let engine = Engine::new(
        EngineConfig::default(),
        provider,
        catalog,
        CheckpointStore::new_memory(),
    )
    .with_workspace(workspace.path());

    let report = engine
        .submit_query("list the files then delete notes.txt", Some("ws"))
        .await
        .unwrap();
    assert_eq!(report.state, LifecycleState::AwaitingApproval);
    assert!(workspace.path().join("notes.txt").exists());
    let pending = report.pending.unwrap();
    assert_eq!(pending.tool_name, "delete_file");
    assert_eq!(pending.arguments, json!({"path": "notes.txt"}));

    let history = engine.history("ws").await.unwrap();
    assert!(history
        .iter()
        .any(|m| matches!(m, Message::ToolResult { content, .. } if content.contains("notes.txt"))));

    let report = engine
        .resolve_approval("ws", false, Some("destructive"))
        .await
        .unwrap();
    assert_ne!(report.state, LifecycleState::Error);
    assert!(workspace.path().join("notes.txt").exists());
    let history = engine.history("ws").await.unwrap();
    assert!(history
        .iter()
        .any(|m| matches!(m, Message::User { content } if content.contains("destructive"))));
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_events_trace_a_suspension() {
    let (engine, _, _, _) = engine_with(
        vec![wipe("c1"), LLMResponse::text("why")],
        CheckpointStore::new_memory(),
    )
    .await;
    let mut rx = engine.subscribe();
    engine.submit_query("wipe", Some("s")).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Suspended { tool, .. } if tool == "wipe")));
    assert!(matches!(
        events.last(),
        Some(EngineEvent::Finished {
            state: LifecycleState::AwaitingApproval,
            ..
        })
    ));
}
