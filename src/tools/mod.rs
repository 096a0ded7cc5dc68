//! Tools module for GateClaw
//!
//! Tools are what the model acts through. Each tool declares a [`RiskTier`]:
//! SAFE tools are executed automatically by the safe executor, CRITICAL tools
//! only after an approval decision. The shared [`ToolCatalog`] holds the live
//! set, including generated tools hot-loaded from the registry.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gateclaw::tools::{ToolCatalog, ToolContext};
//! use gateclaw::tools::filesystem::ListDirectoryTool;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let catalog = ToolCatalog::new();
//! catalog.register(Arc::new(ListDirectoryTool)).await;
//!
//! // No workspace configured: the call fails with the error marker.
//! let out = catalog.execute("list_directory", json!({}), &ToolContext::new()).await;
//! assert!(out.is_error);
//! assert!(out.content.starts_with("ERROR"));
//! # });
//! ```

pub mod catalog;
pub mod filesystem;
pub mod types;

pub use catalog::ToolCatalog;
pub use types::{is_error_payload, RiskTier, Tool, ToolContext, ToolOutput, ERROR_MARKER};

use std::sync::Arc;

/// The built-in workspace tools: three SAFE readers and two CRITICAL writers.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(filesystem::ListDirectoryTool),
        Arc::new(filesystem::ReadFileTool),
        Arc::new(filesystem::SearchCodebaseTool),
        Arc::new(filesystem::WriteFileTool),
        Arc::new(filesystem::DeleteFileTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_tools_register() {
        let catalog = ToolCatalog::new();
        for tool in builtin_tools() {
            catalog.register(tool).await;
        }
        assert_eq!(
            catalog.names().await,
            vec![
                "delete_file",
                "list_directory",
                "read_file",
                "search_codebase",
                "write_file"
            ]
        );
        let tiers = catalog.tiers().await;
        assert_eq!(tiers["delete_file"], RiskTier::Critical);
        assert_eq!(tiers["write_file"], RiskTier::Critical);
        assert_eq!(tiers["read_file"], RiskTier::Safe);
    }
}
