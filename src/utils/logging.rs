//! Logging initialization for GateClaw.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `compact`: `timestamp LEVEL target: message fields`, grep-friendly
//! - `json`: structured JSON lines for log aggregators (e.g. Loki, CloudWatch)

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{GateError, Result};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// `RUST_LOG` takes precedence over `cfg.level`.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match (&cfg.file, cfg.format) {
        (Some(path), format) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = Mutex::new(file);
            match format {
                LogFormat::Json => builder.json().with_writer(writer).try_init(),
                LogFormat::Pretty => builder.pretty().with_writer(writer).try_init(),
                LogFormat::Compact => builder.compact().with_writer(writer).try_init(),
            }
        }
        (None, LogFormat::Json) => builder.json().try_init(),
        (None, LogFormat::Pretty) => builder.pretty().try_init(),
        (None, LogFormat::Compact) => builder.compact().try_init(),
    };

    installed.map_err(|e| GateError::Config(format!("Failed to install logger: {}", e)))
}

/// Emit a component-tagged tracing event.
///
/// ```
/// # use gateclaw::log_component;
/// log_component!(info, "gate", "approval requested");
/// log_component!(warn, "loop_guard", "repeated signature", count = 3u64);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
