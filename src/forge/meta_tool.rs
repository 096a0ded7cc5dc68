//! The `create_tool` meta-tool.
//!
//! Listed in the catalog so the model can request a new capability. It is
//! CRITICAL, so a call always reaches the approval gate, where the engine
//! runs the generator and validator instead of executing it.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tools::{RiskTier, Tool, ToolContext, ToolOutput};

/// Catalog name of the meta-tool.
pub const CREATE_TOOL: &str = "create_tool";

/// Argument carrying the natural-language capability request.
pub const CAPABILITY_ARG: &str = "capability_needed";

/// Pull the capability request out of a `create_tool` call's arguments.
pub fn capability_of(args: &Value) -> Option<&str> {
    args.get(CAPABILITY_ARG)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub struct CreateToolTool;

#[async_trait]
impl Tool for CreateToolTool {
    fn name(&self) -> &str {
        CREATE_TOOL
    }

    fn description(&self) -> &str {
        "Request a new tool when no existing tool provides a needed capability. \
         Describe the capability; a tool will be generated, validated and shown \
         to a human for approval before it becomes available."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                CAPABILITY_ARG: {
                    "type": "string",
                    "description": "What the new tool must do"
                }
            },
            "required": [CAPABILITY_ARG]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Critical
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        Ok(ToolOutput::error(
            "create_tool only runs through the approval gate",
        ))
    }
}
