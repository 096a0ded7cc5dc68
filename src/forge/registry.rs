//! Tool registry
//!
//! Durable store for approved generated tools. Layout under the registry
//! directory:
//!
//! ```text
//! registry.json                 {"active": {name: hash}, "entries": [RegistryEntry, ...]}
//! <name>_<hash16>.tool          immutable source, one file per registered version
//! ```
//!
//! Loading re-hashes the source file and refuses to materialize a tool whose
//! content no longer matches its recorded hash.
//!
//! Several processes may share one directory: `registry.json` is re-read
//! before every load, and registration merges into the on-disk index while
//! holding the `registry.lock` claim.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::script::ScriptProgram;
use super::types::{parameters_schema, ParamSpec, RegistryEntry, ToolProposal};
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{GateError, Result};
use crate::session::write_atomic;
use crate::utils::claim::FileClaim;
use crate::tools::{RiskTier, Tool, ToolCatalog, ToolContext, ToolOutput};

const INDEX_FILE: &str = "registry.json";
const HASH_LEN: usize = 16;

/// First 16 hex chars of the SHA-256 of `source`.
pub fn content_hash(source: &str) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    digest[..HASH_LEN].to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(default)]
    active: BTreeMap<String, String>,
    #[serde(default)]
    entries: Vec<RegistryEntry>,
}

/// Name → metadata index of registered tools, backed by a directory.
pub struct ToolRegistry {
    dir: PathBuf,
    index: RwLock<RegistryIndex>,
}

impl ToolRegistry {
    /// Open (or create) a registry directory.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Registry`] if an existing index cannot be parsed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let index = read_index(&dir).await?;
        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    /// Re-read the index written by any process sharing the directory.
    pub async fn refresh(&self) -> Result<()> {
        let fresh = read_index(&self.dir).await?;
        *self.index.write().await = fresh;
        Ok(())
    }

    /// Registry directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an approved proposal and make it the active version of its name.
    ///
    /// Refuses names already taken in `catalog` by a tool this registry did
    /// not create.
    pub async fn register(
        &self,
        proposal: &ToolProposal,
        approved_by: &str,
        catalog: &ToolCatalog,
    ) -> Result<RegistryEntry> {
        let mut index = self.index.write().await;
        let _claim = FileClaim::acquire(&self.dir.join(INDEX_FILE)).await?;
        *index = read_index(&self.dir).await?;

        if catalog.has(&proposal.name).await && !index.active.contains_key(&proposal.name) {
            return Err(GateError::Registry(format!(
                "tool name `{}` is already taken by a built-in tool",
                proposal.name
            )));
        }

        let hash = content_hash(&proposal.source);
        let file = format!("{}_{}.tool", proposal.name, hash);
        let path = self.dir.join(&file);
        if !path.exists() {
            write_atomic(&path, proposal.source.as_bytes()).await?;
        }

        let entry = RegistryEntry {
            name: proposal.name.clone(),
            hash: hash.clone(),
            file,
            description: proposal.description.clone(),
            risk_tier: proposal.risk_tier,
            parameters: proposal.parameters.clone(),
            created_at: Utc::now(),
            approved_by: approved_by.to_string(),
            rationale: proposal.rationale.clone(),
        };

        let mut updated = index.clone();
        updated
            .entries
            .retain(|e| !(e.name == entry.name && e.hash == entry.hash));
        updated.entries.push(entry.clone());
        updated.active.insert(entry.name.clone(), hash.clone());
        self.write_index(&updated).await?;
        *index = updated;

        log_audit_event(
            AuditCategory::ToolRegistered,
            AuditSeverity::Info,
            "tool_registered",
            &format!("{} {} ({}) approved by {}", entry.name, hash, entry.risk_tier, approved_by),
            false,
        );
        info!(tool = %entry.name, hash = %hash, "Tool registered");
        Ok(entry)
    }

    /// Materialize the active version of `name`, verifying its content hash.
    pub async fn load(&self, name: &str) -> Result<Arc<ScriptTool>> {
        self.refresh().await?;
        let entry = self
            .active_entry(name)
            .await
            .ok_or_else(|| GateError::NotFound(format!("registered tool `{}`", name)))?;

        let path = self.dir.join(&entry.file);
        let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
            GateError::Registry(format!("cannot read {}: {}", path.display(), e))
        })?;

        let actual = content_hash(&source);
        if actual != entry.hash {
            log_audit_event(
                AuditCategory::ToolValidation,
                AuditSeverity::Critical,
                "integrity_mismatch",
                &format!("{} expected {} got {}", name, entry.hash, actual),
                true,
            );
            return Err(GateError::Registry(format!(
                "integrity check failed for `{}`: expected hash {}, found {}",
                name, entry.hash, actual
            )));
        }

        let program = ScriptProgram::parse(&source)?;
        debug!(tool = %name, hash = %entry.hash, "Tool materialized");
        Ok(Arc::new(ScriptTool {
            name: entry.name,
            description: entry.description,
            parameters: entry.parameters,
            risk_tier: entry.risk_tier,
            program,
        }))
    }

    /// Load `name` and publish it into the live catalog.
    pub async fn load_into(&self, name: &str, catalog: &ToolCatalog) -> Result<()> {
        let tool = self.load(name).await?;
        catalog.register(tool).await;
        Ok(())
    }

    /// Hot-load every active tool; failures are logged and skipped.
    pub async fn load_all(&self, catalog: &ToolCatalog) -> usize {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Registry index unreadable; using last known index");
        }
        let names: Vec<String> = {
            let index = self.index.read().await;
            index.active.keys().cloned().collect()
        };
        let mut loaded = 0;
        for name in names {
            match self.load_into(&name, catalog).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!(tool = %name, error = %e, "Skipping registered tool"),
            }
        }
        info!(loaded = loaded, "Registered tools loaded");
        loaded
    }

    /// The active entry for `name`.
    pub async fn active_entry(&self, name: &str) -> Option<RegistryEntry> {
        let index = self.index.read().await;
        let hash = index.active.get(name)?;
        index
            .entries
            .iter()
            .find(|e| &e.name == name && &e.hash == hash)
            .cloned()
    }

    /// All active entries, sorted by name.
    pub async fn list(&self) -> Vec<RegistryEntry> {
        let index = self.index.read().await;
        index
            .active
            .iter()
            .filter_map(|(name, hash)| {
                index
                    .entries
                    .iter()
                    .find(|e| &e.name == name && &e.hash == hash)
                    .cloned()
            })
            .collect()
    }

    async fn write_index(&self, index: &RegistryIndex) -> Result<()> {
        let content = serde_json::to_string_pretty(index)?;
        write_atomic(&self.dir.join(INDEX_FILE), content.as_bytes()).await
    }
}

async fn read_index(dir: &Path) -> Result<RegistryIndex> {
    let index_path = dir.join(INDEX_FILE);
    match tokio::fs::read_to_string(&index_path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            GateError::Registry(format!("corrupt index {}: {}", index_path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryIndex::default()),
        Err(e) => Err(e.into()),
    }
}

/// A registered tool backed by the sandboxed evaluator.
#[derive(Debug)]
pub struct ScriptTool {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    risk_tier: RiskTier,
    program: ScriptProgram,
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        parameters_schema(&self.parameters)
    }

    fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        match self.program.run(&args) {
            Ok(text) => Ok(ToolOutput::text(text)),
            Err(e) => Ok(ToolOutput::error(format!("{} failed: {}", self.name, e))),
        }
    }
}
