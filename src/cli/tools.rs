//! Tools CLI command handlers: catalog listing and static validation.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use gateclaw::forge::validate_source;
use gateclaw::tools::RiskTier;

use super::common::{build_engine, print_json};
use super::ToolsAction;

pub(crate) async fn cmd_tools(config_path: Option<&Path>, action: ToolsAction, json: bool) -> Result<()> {
    match action {
        ToolsAction::List => cmd_tools_list(config_path, json).await,
        ToolsAction::Validate { file, tier } => cmd_tools_validate(&file, tier.into(), json).await,
    }
}

async fn cmd_tools_list(config_path: Option<&Path>, json: bool) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let tiers = engine.catalog().tiers().await;
    let generated = match engine.registry() {
        Some(registry) => registry.list().await,
        None => vec![],
    };

    if json {
        let tools: Vec<_> = engine
            .catalog()
            .definitions()
            .await
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "risk_tier": tiers.get(&d.name),
                    "generated": generated.iter().any(|e| e.name == d.name),
                })
            })
            .collect();
        return print_json(&tools);
    }

    println!("Tools");
    println!("=====");
    println!();
    for name in engine.catalog().names().await {
        let tier = tiers
            .get(&name)
            .map(|t| t.to_string())
            .unwrap_or_default();
        let origin = match generated.iter().find(|e| e.name == name) {
            Some(entry) => format!("generated {}", entry.hash),
            None => "built-in".to_string(),
        };
        println!("  {:<20} {:<9} {}", name, tier, origin);
    }
    Ok(())
}

async fn cmd_tools_validate(file: &Path, tier: RiskTier, json: bool) -> Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let report = validate_source(&source, tier);

    if json {
        return print_json(&json!({
            "valid": report.is_valid(),
            "issues": report.issues,
            "warnings": report.warnings,
        }));
    }

    if report.is_valid() {
        println!("[OK] {} passes validation as {}", file.display(), tier);
    } else {
        println!("[FAIL] {} rejected as {}:", file.display(), tier);
        println!("{}", report.issue_list());
    }
    for warning in &report.warnings {
        println!("[WARN] {}", warning);
    }
    if !report.is_valid() {
        anyhow::bail!("validation failed");
    }
    Ok(())
}
