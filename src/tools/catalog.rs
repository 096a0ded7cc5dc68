//! Live tool catalog for GateClaw
//!
//! The catalog maps tool names to invocable tools and their risk tiers. It is
//! shared by every session and may gain tools at runtime when generated tools
//! are approved, so all access goes through an async `RwLock`: a tool is either
//! absent or fully registered, never partially visible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::providers::ToolDefinition;

use super::{RiskTier, Tool, ToolContext, ToolOutput};

/// A shared, hot-loadable set of tools.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use gateclaw::tools::{ToolCatalog, RiskTier};
/// use gateclaw::tools::filesystem::ListDirectoryTool;
///
/// # tokio_test::block_on(async {
/// let catalog = ToolCatalog::new();
/// catalog.register(Arc::new(ListDirectoryTool)).await;
///
/// assert!(catalog.has("list_directory").await);
/// assert_eq!(catalog.risk_tier("list_directory").await, Some(RiskTier::Safe));
/// # });
/// ```
#[derive(Default)]
pub struct ToolCatalog {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, tier = %tool.risk_tier(), "Registering tool");
        let mut tools = self.tools.write().await;
        tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Risk tier of a registered tool.
    pub async fn risk_tier(&self, name: &str) -> Option<RiskTier> {
        let tools = self.tools.read().await;
        tools.get(name).map(|t| t.risk_tier())
    }

    /// Snapshot of every tool's risk tier, for routing decisions.
    pub async fn tiers(&self) -> HashMap<String, RiskTier> {
        let tools = self.tools.read().await;
        tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.risk_tier()))
            .collect()
    }

    /// Definitions of all tools, sorted by name, for binding to the gateway.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|tool| {
                ToolDefinition::new(tool.name(), tool.description(), tool.parameters())
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Sorted names of all registered tools.
    pub async fn names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a tool is registered.
    pub async fn has(&self, name: &str) -> bool {
        let tools = self.tools.read().await;
        tools.contains_key(name)
    }

    /// Number of registered tools.
    pub async fn len(&self) -> usize {
        let tools = self.tools.read().await;
        tools.len()
    }

    /// Whether the catalog is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Execute a tool by name.
    ///
    /// Never fails: a missing tool or an execution error becomes an error
    /// [`ToolOutput`] carrying the error marker. The catalog lock is released
    /// before the tool runs.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.get(name).await else {
            error!(tool = %name, "Tool not found");
            return ToolOutput::error(format!("Tool not found: {}", name));
        };

        let start = Instant::now();
        let result = tool.execute(args, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(tool = %name, duration_ms = duration_ms, is_error = output.is_error, "Tool executed");
                if !output.is_error && super::is_error_payload(&output.content) {
                    ToolOutput::from_payload(output.content)
                } else {
                    output
                }
            }
            Err(e) => {
                error!(tool = %name, duration_ms = duration_ms, error = %e, "Tool execution failed");
                ToolOutput::error(e.to_string())
            }
        }
    }
}
