//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod session;
pub mod tools;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "gateclaw")]
#[command(version)]
#[command(about = "Risk-gated agent engine with human approval for critical actions", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.gateclaw/config.json)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a query, starting or continuing a session
    Query {
        /// The query text
        text: String,
        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Approve the pending critical action of a session
    Approve {
        /// Session id
        session: String,
        /// Optional note recorded with the decision
        #[arg(short, long)]
        reason: Option<String>,
        /// Only apply if this is still the pending action
        #[arg(long)]
        action: Option<String>,
        /// Approver identity recorded for generated tools
        #[arg(long, default_value = "human")]
        by: String,
    },
    /// Reject the pending critical action of a session
    Reject {
        /// Session id
        session: String,
        /// Why the action was rejected
        #[arg(short, long)]
        reason: String,
        /// Only apply if this is still the pending action
        #[arg(long)]
        action: Option<String>,
    },
    /// Show the lifecycle state of a session
    Status {
        /// Session id
        session: String,
    },
    /// Show the pending critical action of a session
    Pending {
        /// Session id
        session: String,
    },
    /// List stored sessions and their lifecycle state
    Sessions,
    /// Inspect tools
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ToolsAction {
    /// List the live catalog, including registered generated tools
    List,
    /// Statically validate a tool source file
    Validate {
        /// Path to the tool source
        file: std::path::PathBuf,
        /// Declared risk tier
        #[arg(long, value_enum, default_value_t = TierArg::Safe)]
        tier: TierArg,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TierArg {
    Safe,
    Critical,
}

impl From<TierArg> for gateclaw::tools::RiskTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Safe => gateclaw::tools::RiskTier::Safe,
            TierArg::Critical => gateclaw::tools::RiskTier::Critical,
        }
    }
}

/// Entry point for the CLI: called from main().
pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Fall back to defaults for logging if the config is unreadable; the
    // command itself reports the real error.
    let logging_cfg = common::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = gateclaw::utils::logging::init_logging(&logging_cfg) {
        eprintln!("warning: logging not initialized: {}", e);
    }

    let json = cli.json;
    let config_path = cli.config.as_deref();
    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            println!("gateclaw {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Query { text, session }) => {
            session::cmd_query(config_path, &text, session.as_deref(), json).await?;
        }
        Some(Commands::Approve {
            session,
            reason,
            action,
            by,
        }) => {
            session::cmd_decide(config_path, &session, true, reason, action, &by, json).await?;
        }
        Some(Commands::Reject {
            session,
            reason,
            action,
        }) => {
            session::cmd_decide(config_path, &session, false, Some(reason), action, "human", json)
                .await?;
        }
        Some(Commands::Status { session }) => {
            session::cmd_status(config_path, &session, json).await?;
        }
        Some(Commands::Pending { session }) => {
            session::cmd_pending(config_path, &session, json).await?;
        }
        Some(Commands::Sessions) => {
            session::cmd_sessions(config_path, json).await?;
        }
        Some(Commands::Tools { action }) => {
            tools::cmd_tools(config_path, action, json).await?;
        }
    }

    Ok(())
}
