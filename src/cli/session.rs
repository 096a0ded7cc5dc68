//! Session command handlers: query, approve/reject, status, pending, sessions.

use std::path::Path;

use anyhow::Result;

use gateclaw::agent::ApprovalDecision;

use super::common::{build_engine, print_json, print_report};

pub(crate) async fn cmd_query(
    config_path: Option<&Path>,
    text: &str,
    session: Option<&str>,
    json: bool,
) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let report = engine.submit_query(text, session).await?;
    print_report(&report, json)
}

pub(crate) async fn cmd_decide(
    config_path: Option<&Path>,
    session: &str,
    approved: bool,
    reason: Option<String>,
    action: Option<String>,
    decided_by: &str,
    json: bool,
) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let mut decision = ApprovalDecision::new(session, approved, reason).by(decided_by);
    if let Some(action) = action {
        decision = decision.for_action(&action);
    }
    let report = engine.resolve(decision).await?;
    print_report(&report, json)
}

pub(crate) async fn cmd_status(config_path: Option<&Path>, session: &str, json: bool) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let status = engine.status(session).await?;
    if json {
        return print_json(&status);
    }
    println!("Session: {}", status.session_id);
    println!("State:   {}", status.state);
    println!();
    println!("{}", status.message);
    Ok(())
}

pub(crate) async fn cmd_pending(config_path: Option<&Path>, session: &str, json: bool) -> Result<()> {
    let engine = build_engine(config_path).await?;
    match engine.pending_action(session).await? {
        Some(record) if json => print_json(&record),
        Some(record) => {
            println!("Action:    {}", record.action_id);
            println!("Tool:      {}", record.tool_name);
            println!("Arguments: {}", record.arguments);
            println!("Requested: {}", record.timestamp.to_rfc3339());
            println!();
            println!("{}", record.justification);
            Ok(())
        }
        None => {
            println!("Session {} has no pending action.", session);
            Ok(())
        }
    }
}

pub(crate) async fn cmd_sessions(config_path: Option<&Path>, json: bool) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let sessions = engine.sessions().await?;
    if json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for status in &sessions {
        println!("  {:<38} {}", status.session_id, status.state);
    }
    Ok(())
}
