//! Shared CLI helpers used across multiple command handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use gateclaw::agent::{Engine, RunReport};
use gateclaw::config::Config;
use gateclaw::providers::openai::OPENAI_API_URL;
use gateclaw::providers::OpenAIProvider;

/// Load config from `path`, or the default location.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.with_context(|| "Failed to load configuration")
}

/// Build the engine with the configured OpenAI-compatible gateway.
pub(crate) async fn build_engine(config_path: Option<&Path>) -> Result<Engine> {
    let config = load_config(config_path)?;
    let api_key = config.provider.api_key.clone().unwrap_or_default();
    let api_base = config
        .provider
        .api_base
        .clone()
        .unwrap_or_else(|| OPENAI_API_URL.to_string());

    let mut provider = OpenAIProvider::with_base_url(
        &api_key,
        &api_base,
        Duration::from_secs(config.provider.timeout_secs),
    )
    .with_context(|| "Failed to create inference gateway")?;
    if let Some(model) = &config.engine.model {
        provider = provider.with_model(model);
    }

    Engine::from_config(&config, Arc::new(provider))
        .await
        .with_context(|| "Failed to start engine")
}

/// Print a value as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a run report for humans (or as JSON).
pub(crate) fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!("Session: {}", report.session_id);
    println!("State:   {}", report.state);
    println!(
        "Tools:   {} call(s), nodes: {}",
        report.output.tool_call_count,
        report.output.nodes_visited.join(" -> ")
    );
    println!();
    match &report.pending {
        Some(pending) => {
            println!("CRITICAL ACTION REQUESTED");
            println!("  Action:    {}", pending.action_id);
            println!("  Tool:      {}", pending.tool_name);
            println!("  Arguments: {}", pending.arguments);
            println!();
            println!("{}", pending.justification);
            println!();
            println!("Approve with: gateclaw approve {}", report.session_id);
            println!(
                "Reject with:  gateclaw reject {} --reason \"...\"",
                report.session_id
            );
        }
        None => println!("{}", report.message),
    }
    Ok(())
}
