//! Configuration type definitions for GateClaw
//!
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for GateClaw
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution engine tuning (iteration cap, loop guard, gate context)
    pub engine: EngineConfig,
    /// Inference gateway settings
    pub provider: ProviderConfig,
    /// Where checkpoints and registered tools live
    pub storage: StorageConfig,
    /// Sandbox root for the built-in workspace tools
    pub workspace: WorkspaceConfig,
    /// Optional external countersign authority
    pub governance: GovernanceConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Default maximum number of reasoning turns per `submit_query`/`resolve_approval` run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
/// Default loop-guard window, in tool-call cycles.
pub const DEFAULT_LOOP_WINDOW: usize = 3;
/// Default number of identical consecutive signatures that trips the loop guard.
pub const DEFAULT_LOOP_THRESHOLD: usize = 3;
/// Default number of messages shown to the justification call.
pub const DEFAULT_JUSTIFICATION_CONTEXT: usize = 6;
/// Default per-message truncation for gate and generator context.
pub const DEFAULT_CONTEXT_TRUNCATE_CHARS: usize = 200;
/// Default number of messages shown to the tool generator.
pub const DEFAULT_GENERATOR_CONTEXT: usize = 8;

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model identifier passed to the gateway (None = gateway default)
    pub model: Option<String>,
    /// Hard cap on reasoning turns within one run
    pub max_iterations: u32,
    /// Number of recent tool-call cycles the loop guard inspects
    pub loop_window: usize,
    /// Consecutive identical signatures required to force termination
    pub loop_threshold: usize,
    /// Messages included in the justification context (clamped to 5..=8)
    pub justification_context_messages: usize,
    /// Per-message character limit for gate and generator context
    pub context_truncate_chars: usize,
    /// Messages included in the tool generator context
    pub generator_context_messages: usize,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            loop_window: DEFAULT_LOOP_WINDOW,
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
            justification_context_messages: DEFAULT_JUSTIFICATION_CONTEXT,
            context_truncate_chars: DEFAULT_CONTEXT_TRUNCATE_CHARS,
            generator_context_messages: DEFAULT_GENERATOR_CONTEXT,
            system_prompt: None,
        }
    }
}

impl EngineConfig {
    /// Justification context size clamped to the supported 5..=8 range.
    pub fn justification_window(&self) -> usize {
        self.justification_context_messages.clamp(5, 8)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Inference gateway configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key
    pub api_key: Option<String>,
    /// Base URL (None = api.openai.com)
    pub api_base: Option<String>,
    /// Max tokens per completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            max_tokens: Some(4096),
            temperature: Some(0.0),
            timeout_secs: 120,
        }
    }
}

// ============================================================================
// Storage / Workspace
// ============================================================================

/// Durable storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory; empty means `~/.gateclaw`
    pub data_dir: String,
}

/// Sandbox configuration for the built-in workspace tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory the file tools are confined to
    pub root: String,
    /// Register the built-in workspace tools
    pub builtin_tools: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: "~/.gateclaw/workspace".to_string(),
            builtin_tools: true,
        }
    }
}

// ============================================================================
// Governance
// ============================================================================

/// External countersign authority.
///
/// When `endpoint` is set every pending critical action is posted there before
/// it is shown for approval; an unreachable endpoint blocks the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Countersign webhook URL
    pub endpoint: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Single-line compact output
    #[default]
    Compact,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Optional log file (appended); stderr when unset
    pub file: Option<String>,
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            file: None,
            level: "info".to_string(),
        }
    }
}
