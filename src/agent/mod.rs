//! Agent module - the resumable, risk-gated execution engine
//!
//! This module drives one session through a fixed state machine:
//!
//! - [`reasoning`]: one inference call per turn, with recovery hints after failed tools
//! - [`router`]: pure decision over the latest assistant message
//! - [`loop_guard`]: stops runs that keep proposing the same call
//! - [`executor`]: runs SAFE calls, and CRITICAL calls only after approval
//! - [`gate`]: freezes a CRITICAL call with its justification and suspends
//! - [`engine`]: the [`Engine`] facade tying the nodes to the checkpoint store
//!
//! # Architecture
//!
//! ```text
//!                  ┌───────────────────────────────────────────┐
//!                  ▼                                           │
//! ┌───────┐  ┌───────────┐  ┌────────┐  SAFE   ┌───────────────┐
//! │ query │─>│ reasoning │─>│ router │────────>│ safe executor │
//! └───────┘  └───────────┘  └────────┘         └───────────────┘
//!                  ▲            │ CRITICAL
//!                  │            ▼
//!                  │     ┌───────────────┐ suspend ┌──────────┐
//!                  │     │ critical gate │────────>│ decision │
//!                  │     └───────────────┘         └──────────┘
//!                  │                                    │
//!                  │        ┌───────────────────┐       │
//!                  └────────│ critical executor │<──────┘
//!                           └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gateclaw::agent::Engine;
//! use gateclaw::config::EngineConfig;
//! use gateclaw::session::CheckpointStore;
//! use gateclaw::tools::{builtin_tools, ToolCatalog};
//!
//! async fn run(provider: Arc<dyn gateclaw::providers::LLMProvider>) -> gateclaw::Result<()> {
//!     let catalog = Arc::new(ToolCatalog::new());
//!     for tool in builtin_tools() {
//!         catalog.register(tool).await;
//!     }
//!     let engine = Engine::new(EngineConfig::default(), provider, catalog, CheckpointStore::new_memory())
//!         .with_workspace("/srv/sandbox");
//!
//!     let report = engine.submit_query("delete task_tracker.db", None).await?;
//!     if let Some(pending) = report.pending {
//!         println!("{}: {}", pending.tool_name, pending.justification);
//!         engine.resolve_approval(&report.session_id, false, Some("destructive")).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod events;
pub mod executor;
pub mod gate;
pub mod governance;
pub mod loop_guard;
pub mod output;
pub mod prompts;
pub mod reasoning;
pub mod router;

pub use engine::Engine;
pub use events::{EngineEvent, EventBus, Node};
pub use executor::{CriticalExecutor, SafeExecutor};
pub use gate::{CriticalGate, GateOutcome};
pub use governance::{classify_action, ApprovalDecision, Governance, WebhookGovernance};
pub use loop_guard::{LoopGuard, LoopVerdict};
pub use output::{ExecutionStatus, FinalOutput, PendingActionRecord, RunReport, TraceEntry};
pub use reasoning::ReasoningStep;
pub use router::{route, FinishReason, Route};
