//! Session module - Session state and durable checkpoints
//!
//! This module provides the session store for GateClaw:
//! - In-memory checkpoint cache with async access
//! - File-based persistence, one JSON checkpoint per session id
//! - Versioned writes with compare-and-swap, so a suspended session can be
//!   claimed by exactly one approval decision, also across processes sharing
//!   a storage directory
//!
//! # Example
//!
//! ```
//! use gateclaw::session::{Checkpoint, CheckpointStore, Message, Session};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = CheckpointStore::new_memory();
//!
//!     let mut session = Session::new("s-1");
//!     session.add_message(Message::user("Hello!"));
//!
//!     let version = store.put(Checkpoint::new(session, None)).await.unwrap();
//!     assert_eq!(version, 1);
//!     assert!(store.get("s-1").await.unwrap().is_some());
//! }
//! ```

pub mod types;

pub use types::{
    Checkpoint, LifecycleState, Message, PendingAction, ResumePoint, Session, ToolCall,
};

use crate::error::{GateError, Result};
use crate::utils::claim::FileClaim;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable, keyed-by-session-id checkpoint store.
///
/// # Thread Safety
///
/// The store uses `Arc<RwLock>` internally, making it safe to clone
/// and share across async tasks. Writes are serialized through the lock
/// within a process, and through a `<id>.lock` [`FileClaim`] across
/// processes.
///
/// # Persistence
///
/// With a storage path the files are authoritative: reads and version checks
/// always go to disk, and the cache only mirrors what was last seen.
/// Checkpoints are written as `<id>.json` via a temporary file and rename, so
/// a crash never leaves a torn checkpoint.
pub struct CheckpointStore {
    /// In-memory cache of checkpoints
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
    /// Optional path for file-based persistence
    storage_path: Option<PathBuf>,
}

impl CheckpointStore {
    /// Create an in-memory store without persistence.
    pub fn new_memory() -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
        }
    }

    /// Create a store persisting under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
        })
    }

    /// Get the checkpoint for a session, if one was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Checkpoint`] if a persisted checkpoint exists
    /// but cannot be read or parsed.
    pub async fn get(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        if self.storage_path.is_none() {
            let checkpoints = self.checkpoints.read().await;
            return Ok(checkpoints.get(session_id).cloned());
        }

        let loaded = self.read_from_disk(session_id).await?;
        let mut checkpoints = self.checkpoints.write().await;
        match loaded {
            Some(ref checkpoint) => {
                checkpoints.insert(session_id.to_string(), checkpoint.clone());
            }
            None => {
                checkpoints.remove(session_id);
            }
        }
        Ok(loaded)
    }

    /// Get the checkpoint for a session that must exist (resume path).
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFound`] when no checkpoint exists; never
    /// fabricates a fresh session.
    pub async fn load(&self, session_id: &str) -> Result<Checkpoint> {
        self.get(session_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("No checkpoint for session {}", session_id)))
    }

    /// Write a checkpoint unconditionally, returning its new version.
    pub async fn put(&self, checkpoint: Checkpoint) -> Result<u64> {
        let mut checkpoints = self.checkpoints.write().await;
        let _claim = self.claim(checkpoint.session_id()).await?;
        let current = self
            .current_version(&checkpoints, checkpoint.session_id())
            .await?;
        self.write_locked(&mut checkpoints, checkpoint, current + 1)
            .await
    }

    /// Write a checkpoint only if the stored version still equals `expected_version`.
    ///
    /// A session that has never been written has version 0. Returns the new
    /// version on success and `None` when another writer got there first.
    pub async fn compare_and_swap(
        &self,
        checkpoint: Checkpoint,
        expected_version: u64,
    ) -> Result<Option<u64>> {
        let mut checkpoints = self.checkpoints.write().await;
        let _claim = self.claim(checkpoint.session_id()).await?;
        let current = self
            .current_version(&checkpoints, checkpoint.session_id())
            .await?;
        if current != expected_version {
            debug!(
                session_id = %checkpoint.session_id(),
                expected = expected_version,
                current = current,
                "Checkpoint compare-and-swap lost"
            );
            return Ok(None);
        }
        let version = self
            .write_locked(&mut checkpoints, checkpoint, expected_version + 1)
            .await?;
        Ok(Some(version))
    }

    /// List all session ids with a checkpoint.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = {
            let checkpoints = self.checkpoints.read().await;
            checkpoints.keys().cloned().collect()
        };

        if let Some(ref storage_path) = self.storage_path {
            let mut dir_entries = tokio::fs::read_dir(storage_path).await?;
            while let Some(entry) = dir_entries.next_entry().await? {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        let id = Self::unsanitize_key(stem);
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Cross-process claim on a session's checkpoint file (file mode only).
    async fn claim(&self, session_id: &str) -> Result<Option<FileClaim>> {
        match self.file_path(session_id) {
            Some(path) => Ok(Some(FileClaim::acquire(&path).await?)),
            None => Ok(None),
        }
    }

    /// Stored version; in file mode read from disk, never from the cache,
    /// since another process may have written since.
    async fn current_version(
        &self,
        cache: &HashMap<String, Checkpoint>,
        session_id: &str,
    ) -> Result<u64> {
        if self.storage_path.is_none() {
            return Ok(cache.get(session_id).map(|c| c.version).unwrap_or(0));
        }
        Ok(self
            .read_from_disk(session_id)
            .await?
            .map(|c| c.version)
            .unwrap_or(0))
    }

    async fn write_locked(
        &self,
        cache: &mut HashMap<String, Checkpoint>,
        mut checkpoint: Checkpoint,
        version: u64,
    ) -> Result<u64> {
        checkpoint.version = version;
        checkpoint.saved_at = chrono::Utc::now();

        if let Some(path) = self.file_path(checkpoint.session_id()) {
            let content = serde_json::to_string_pretty(&checkpoint)?;
            write_atomic(&path, content.as_bytes()).await?;
        }

        debug!(
            session_id = %checkpoint.session_id(),
            version = version,
            state = %checkpoint.session.state,
            "Checkpoint written"
        );
        cache.insert(checkpoint.session.id.clone(), checkpoint);
        Ok(version)
    }

    async fn read_from_disk(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let Some(path) = self.file_path(session_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            GateError::Checkpoint(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            GateError::Checkpoint(format!("Corrupt checkpoint {}: {}", path.display(), e))
        })?;
        if checkpoint.session_id() != session_id {
            return Err(GateError::Checkpoint(format!(
                "Checkpoint {} belongs to session {}",
                path.display(),
                checkpoint.session_id()
            )));
        }
        Ok(Some(checkpoint))
    }

    fn file_path(&self, session_id: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", Self::sanitize_key(session_id))))
    }

    /// Sanitize a session id for use as a filename.
    ///
    /// Uses percent-encoding so the mapping is bijective.
    fn sanitize_key(key: &str) -> String {
        let mut result = String::with_capacity(key.len() * 3);
        for c in key.chars() {
            match c {
                '/' => result.push_str("%2F"),
                '\\' => result.push_str("%5C"),
                ':' => result.push_str("%3A"),
                '*' => result.push_str("%2A"),
                '?' => result.push_str("%3F"),
                '"' => result.push_str("%22"),
                '<' => result.push_str("%3C"),
                '>' => result.push_str("%3E"),
                '|' => result.push_str("%7C"),
                '.' => result.push_str("%2E"),
                '%' => result.push_str("%25"),
                c => result.push(c),
            }
        }
        result
    }

    /// Reverse of [`sanitize_key`](Self::sanitize_key).
    fn unsanitize_key(sanitized: &str) -> String {
        let mut result = String::with_capacity(sanitized.len());
        let mut chars = sanitized.chars();

        while let Some(c) = chars.next() {
            if c == '%' {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() == 2 {
                    if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                        result.push(byte as char);
                        continue;
                    }
                }
                result.push('%');
                result.push_str(&hex);
            } else {
                result.push(c);
            }
        }
        result
    }
}

impl Clone for CheckpointStore {
    fn clone(&self) -> Self {
        Self {
            checkpoints: Arc::clone(&self.checkpoints),
            storage_path: self.storage_path.clone(),
        }
    }
}

/// Write `bytes` to `path` through a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
