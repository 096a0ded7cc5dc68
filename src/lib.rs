//! GateClaw - resumable, risk-gated agent execution engine

pub mod agent;
pub mod audit;
pub mod config;
pub mod error;
pub mod forge;
pub mod providers;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{ApprovalDecision, Engine, ExecutionStatus, PendingActionRecord, RunReport};
pub use config::Config;
pub use error::{GateError, Result};
pub use providers::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};
pub use session::{CheckpointStore, LifecycleState, Message, Session, ToolCall};
pub use tools::{RiskTier, Tool, ToolCatalog};
