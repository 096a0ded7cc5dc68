//! Workspace file tools for GateClaw
//!
//! Read-only tools (`list_directory`, `read_file`, `search_codebase`) are SAFE.
//! Mutating tools (`write_file`, `delete_file`) are CRITICAL and only ever run
//! after approval. Every path is resolved inside the workspace configured on
//! the [`ToolContext`]; anything that would escape it is refused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{GateError, Result};

use super::{RiskTier, Tool, ToolContext, ToolOutput};

/// Maximum bytes returned by `read_file`.
const MAX_READ_BYTES: usize = 256 * 1024;
/// Maximum matches returned by `search_codebase`.
const MAX_SEARCH_MATCHES: usize = 50;
/// Files larger than this are skipped by `search_codebase`.
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

/// Resolve `path` inside the workspace.
///
/// Relative paths are joined to the workspace; absolute paths must already lie
/// inside it. `..` components are folded lexically and may not climb above the
/// workspace root. The nearest existing ancestor (the path itself when it
/// exists) is canonicalized and must stay under the root, so neither a
/// symlinked directory nor a dangling symlink can lead outside.
fn resolve_path(path: &str, ctx: &ToolContext) -> Result<PathBuf> {
    let workspace = ctx.workspace.as_deref().ok_or_else(|| {
        GateError::SecurityViolation(
            "Workspace not configured; file tools require a workspace".to_string(),
        )
    })?;
    let root = std::fs::canonicalize(workspace).unwrap_or_else(|_| normalize(Path::new(workspace)));

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize(&joined);

    if !resolved.starts_with(&root) {
        return Err(path_violation(path));
    }

    let mut existing = resolved.as_path();
    while std::fs::symlink_metadata(existing).is_err() {
        if existing == root.as_path() {
            // Workspace not created yet; nothing below it can be a link.
            return Ok(resolved);
        }
        existing = existing.parent().ok_or_else(|| path_violation(path))?;
    }
    let real = std::fs::canonicalize(existing).map_err(|_| path_violation(path))?;
    if !real.starts_with(&root) {
        return Err(path_violation(path));
    }

    Ok(resolved)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_violation(path: &str) -> GateError {
    log_audit_event(
        AuditCategory::PathSecurity,
        AuditSeverity::Warning,
        "workspace_escape",
        path,
        true,
    );
    GateError::SecurityViolation(format!("Path '{}' is outside the workspace", path))
}

fn io_failure(action: &str, path: &str, e: std::io::Error) -> GateError {
    if e.kind() == std::io::ErrorKind::NotFound {
        GateError::Tool(format!("Path not found: {}", path))
    } else {
        GateError::Tool(format!("Failed to {} '{}': {}", action, path, e))
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| GateError::Tool(format!("Missing '{}' argument", key)))
}

// ============================================================================
// list_directory
// ============================================================================

/// Lists a directory; directories are suffixed with `/`.
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and directories at a path inside the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace (default \".\")"
                }
            },
            "required": []
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let full_path = resolve_path(path, ctx)?;

        let mut entries = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|e| io_failure("read directory", path, e))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("read directory", path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            items.push(if is_dir { format!("{}/", name) } else { name });
        }

        items.sort();
        if items.is_empty() {
            return Ok(ToolOutput::text(format!("Directory '{}' is empty", path)));
        }
        Ok(ToolOutput::text(items.join("\n")))
    }
}

// ============================================================================
// read_file
// ============================================================================

/// Reads a UTF-8 text file. Binary files are refused with a distinct error.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file inside the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to read, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let full_path = resolve_path(path, ctx)?;

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| io_failure("read file", path, e))?;

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return Ok(ToolOutput::error(format!(
                    "'{}' is a binary file and cannot be read as text",
                    path
                )))
            }
        };

        if text.len() > MAX_READ_BYTES {
            let cut = crate::utils::string::floor_char_boundary(&text, MAX_READ_BYTES);
            return Ok(ToolOutput::text(format!(
                "{}\n... (truncated, {} bytes total)",
                &text[..cut],
                text.len()
            )));
        }
        Ok(ToolOutput::text(text))
    }
}

// ============================================================================
// search_codebase
// ============================================================================

/// Case-sensitive substring search across text files in the workspace.
pub struct SearchCodebaseTool;

#[async_trait]
impl Tool for SearchCodebaseTool {
    fn name(&self) -> &str {
        "search_codebase"
    }

    fn description(&self) -> &str {
        "Search text files in the workspace for a literal pattern; returns path:line: text matches"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Literal text to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search, relative to the workspace (default \".\")"
                }
            },
            "required": ["pattern"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let pattern = required_str(&args, "pattern")?;
        if pattern.is_empty() {
            return Ok(ToolOutput::error("Search pattern must not be empty"));
        }
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let start = resolve_path(path, ctx)?;
        let root = resolve_path(".", ctx)?;

        let mut matches = Vec::new();
        let mut stack = vec![start.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == start => return Err(io_failure("search", path, e)),
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let entry_path = entry.path();
                if file_type.is_dir() {
                    stack.push(entry_path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let too_big = entry
                    .metadata()
                    .await
                    .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
                    .unwrap_or(true);
                if too_big {
                    continue;
                }
                let Ok(text) = tokio::fs::read_to_string(&entry_path).await else {
                    continue;
                };
                let display = entry_path
                    .strip_prefix(&root)
                    .unwrap_or(&entry_path)
                    .display()
                    .to_string();
                for (idx, line) in text.lines().enumerate() {
                    if line.contains(pattern) {
                        matches.push(format!("{}:{}: {}", display, idx + 1, line.trim()));
                        if matches.len() >= MAX_SEARCH_MATCHES {
                            matches.push(format!("... (stopped after {} matches)", MAX_SEARCH_MATCHES));
                            return Ok(ToolOutput::text(matches.join("\n")));
                        }
                    }
                }
            }
        }

        if matches.is_empty() {
            return Ok(ToolOutput::text(format!("No matches for '{}'", pattern)));
        }
        matches.sort();
        Ok(ToolOutput::text(matches.join("\n")))
    }
}

// ============================================================================
// write_file
// ============================================================================

/// Writes (creating or overwriting) a file. CRITICAL.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the workspace, creating or overwriting it"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to write, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Critical
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let full_path = resolve_path(path, ctx)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create parent directories for", path, e))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| io_failure("write file", path, e))?;

        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path
        )))
    }
}

// ============================================================================
// delete_file
// ============================================================================

/// Deletes a single file. CRITICAL.
pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Permanently delete a file inside the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to delete, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Critical
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let full_path = resolve_path(path, ctx)?;

        if full_path.is_dir() {
            return Ok(ToolOutput::error(format!(
                "'{}' is a directory; only files can be deleted",
                path
            )));
        }
        tokio::fs::remove_file(&full_path)
            .await
            .map_err(|e| io_failure("delete file", path, e))?;

        Ok(ToolOutput::text(format!("Deleted {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx_for(dir: &TempDir) -> ToolContext {
        ToolContext::new().with_workspace(dir.path().to_str().unwrap())
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ListDirectoryTool.risk_tier(), RiskTier::Safe);
        assert_eq!(ReadFileTool.risk_tier(), RiskTier::Safe);
        assert_eq!(SearchCodebaseTool.risk_tier(), RiskTier::Safe);
        assert_eq!(WriteFileTool.risk_tier(), RiskTier::Critical);
        assert_eq!(DeleteFileTool.risk_tier(), RiskTier::Critical);
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        assert!(resolve_path("../outside.txt", &ctx).is_err());
        assert!(resolve_path("a/../../outside.txt", &ctx).is_err());
        assert!(resolve_path("/etc/passwd", &ctx).is_err());
        assert!(resolve_path("a/../inside.txt", &ctx).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_cannot_escape() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        symlink(outside.path(), dir.path().join("link")).unwrap();
        symlink(outside.path().join("missing.txt"), dir.path().join("dangling")).unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        let ctx = ctx_for(&dir);

        assert!(resolve_path("link/escaped.txt", &ctx).is_err());
        assert!(resolve_path("link/nested/deeper.txt", &ctx).is_err());
        assert!(resolve_path("dangling", &ctx).is_err());
        assert!(resolve_path("alias/inside.txt", &ctx).is_ok());

        let result = WriteFileTool
            .execute(json!({"path": "link/escaped.txt", "content": "x"}), &ctx)
            .await;
        assert!(matches!(result, Err(GateError::SecurityViolation(_))));
        assert!(!outside.path().join("escaped.txt").exists());

        let result = WriteFileTool
            .execute(json!({"path": "dangling", "content": "x"}), &ctx)
            .await;
        assert!(result.is_err());
        assert!(!outside.path().join("missing.txt").exists());
    }

    #[test]
    fn test_resolve_path_requires_workspace() {
        let err = resolve_path("x", &ToolContext::new()).unwrap_err();
        assert!(matches!(err, GateError::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let out = ListDirectoryTool
            .execute(json!({"path": "."}), &ctx_for(&dir))
            .await
            .unwrap();
        assert_eq!(out.content, "b.txt\nsrc/");
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn test_read_file_missing_reports_path_not_found() {
        let dir = TempDir::new().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "nope.txt"}), &ctx_for(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Path not found"));
    }

    #[tokio::test]
    async fn test_read_file_binary_is_error_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("task_tracker.db"), [0u8, 159, 146, 150]).unwrap();
        let out = ReadFileTool
            .execute(json!({"path": "task_tracker.db"}), &ctx_for(&dir))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("binary file"));
    }

    #[tokio::test]
    async fn test_write_then_delete() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);

        let out = WriteFileTool
            .execute(json!({"path": "notes/todo.md", "content": "ship it"}), &ctx)
            .await
            .unwrap();
        assert!(out.content.contains("7 bytes"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes/todo.md")).unwrap(),
            "ship it"
        );

        DeleteFileTool
            .execute(json!({"path": "notes/todo.md"}), &ctx)
            .await
            .unwrap();
        assert!(!dir.path().join("notes/todo.md").exists());
    }

    #[tokio::test]
    async fn test_search_codebase() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {\n    run();\n}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "call run() to start\n").unwrap();

        let out = SearchCodebaseTool
            .execute(json!({"pattern": "run()"}), &ctx_for(&dir))
            .await
            .unwrap();
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"README.md:1: call run() to start"));
        assert!(lines.iter().any(|l| l.ends_with("main.rs:2: run();")));
    }
}
