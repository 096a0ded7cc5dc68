//! Structured audit logging for approval-relevant events.
//!
//! Emits structured `tracing` events with consistent field names so that
//! downstream log aggregators can filter on `audit=true` and query by
//! `category`, `event_type`, `severity`, etc.

use tracing::{error, info, warn};

/// Broad category of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// A critical action was suspended for human review.
    ApprovalRequested,
    /// A human approved a pending critical action.
    ApprovalGranted,
    /// A human rejected a pending critical action.
    ApprovalRejected,
    /// The governance countersign failed and the session was blocked.
    GovernanceBlocked,
    /// Repeated identical tool calls forced termination.
    LoopDetected,
    /// A generated tool failed static validation.
    ToolValidation,
    /// A generated tool was registered and hot-loaded.
    ToolRegistered,
    /// A workspace tool refused a path outside its sandbox.
    PathSecurity,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApprovalRequested => write!(f, "approval_requested"),
            Self::ApprovalGranted => write!(f, "approval_granted"),
            Self::ApprovalRejected => write!(f, "approval_rejected"),
            Self::GovernanceBlocked => write!(f, "governance_blocked"),
            Self::LoopDetected => write!(f, "loop_detected"),
            Self::ToolValidation => write!(f, "tool_validation"),
            Self::ToolRegistered => write!(f, "tool_registered"),
            Self::PathSecurity => write!(f, "path_security"),
        }
    }
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    /// Informational: action was noted but not harmful.
    Info,
    /// Warning: action was refused or altered.
    Warning,
    /// Critical: execution was blocked entirely.
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit a structured audit event via `tracing`.
///
/// All audit events carry `audit = true` so log pipelines can filter on them.
pub fn log_audit_event(
    category: AuditCategory,
    severity: AuditSeverity,
    event_type: &str,
    detail: &str,
    blocked: bool,
) {
    match severity {
        AuditSeverity::Info => {
            info!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
        AuditSeverity::Warning => {
            warn!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
        AuditSeverity::Critical => {
            error!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_category_display() {
        assert_eq!(
            AuditCategory::ApprovalRequested.to_string(),
            "approval_requested"
        );
        assert_eq!(AuditCategory::ApprovalGranted.to_string(), "approval_granted");
        assert_eq!(
            AuditCategory::ApprovalRejected.to_string(),
            "approval_rejected"
        );
        assert_eq!(
            AuditCategory::GovernanceBlocked.to_string(),
            "governance_blocked"
        );
        assert_eq!(AuditCategory::LoopDetected.to_string(), "loop_detected");
        assert_eq!(AuditCategory::ToolValidation.to_string(), "tool_validation");
        assert_eq!(AuditCategory::ToolRegistered.to_string(), "tool_registered");
        assert_eq!(AuditCategory::PathSecurity.to_string(), "path_security");
    }

    #[test]
    fn test_audit_severity_display() {
        assert_eq!(AuditSeverity::Info.to_string(), "info");
        assert_eq!(AuditSeverity::Warning.to_string(), "warning");
        assert_eq!(AuditSeverity::Critical.to_string(), "critical");
    }

    #[test]
    fn test_log_audit_event_does_not_panic() {
        log_audit_event(
            AuditCategory::ApprovalRejected,
            AuditSeverity::Warning,
            "critical_action_rejected",
            "delete_file rejected: destructive",
            true,
        );
        log_audit_event(
            AuditCategory::GovernanceBlocked,
            AuditSeverity::Critical,
            "countersign_unreachable",
            "connection refused",
            true,
        );
    }
}
