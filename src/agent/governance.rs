//! Governance collaborators: approval decisions and the optional countersign.
//!
//! A [`Governance`] authority is consulted at the critical gate before a
//! pending action is shown for approval. If it cannot be reached, or refuses,
//! the session is BLOCKED; there is no fallback to auto-approval.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::output::PendingActionRecord;
use crate::error::{GateError, Result};
use crate::tools::RiskTier;

/// Verbs that only observe state.
const READ_ONLY_VERBS: &[&str] = &["read", "view", "get", "fetch", "query", "search", "list"];

/// Policy helper: read-only verbs are SAFE, anything else is CRITICAL.
///
/// ```
/// use gateclaw::agent::classify_action;
/// use gateclaw::tools::RiskTier;
///
/// assert_eq!(classify_action("List"), RiskTier::Safe);
/// assert_eq!(classify_action("delete"), RiskTier::Critical);
/// ```
pub fn classify_action(verb: &str) -> RiskTier {
    let verb = verb.trim().to_lowercase();
    if READ_ONLY_VERBS.contains(&verb.as_str()) {
        RiskTier::Safe
    } else {
        RiskTier::Critical
    }
}

// ============================================================================
// Approval decision
// ============================================================================

/// An external decision on a session's pending critical action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub session_id: String,
    /// When set, must equal the pending action's id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Identity recorded as the approver of generated tools
    pub decided_by: String,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn approve(session_id: &str) -> Self {
        Self::new(session_id, true, None)
    }

    pub fn reject(session_id: &str, reason: &str) -> Self {
        Self::new(session_id, false, Some(reason.to_string()))
    }

    pub fn new(session_id: &str, approved: bool, reason: Option<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            action_id: None,
            approved,
            reason,
            decided_by: "human".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Bind the decision to a specific pending action.
    pub fn for_action(mut self, action_id: &str) -> Self {
        self.action_id = Some(action_id.to_string());
        self
    }

    pub fn by(mut self, decided_by: &str) -> Self {
        self.decided_by = decided_by.to_string();
        self
    }

    /// Rejection reason, defaulting when none was given.
    pub fn reason_or_default(&self) -> &str {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason given")
    }
}

// ============================================================================
// Countersign authority
// ============================================================================

/// External authority that must countersign a pending action before review.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Governance: Send + Sync {
    /// `Ok(())` when countersigned; any error blocks the session.
    async fn countersign(&self, record: &PendingActionRecord) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CountersignReply {
    #[serde(default = "default_true")]
    countersigned: bool,
    #[serde(default)]
    reason: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Posts the pending-action record to a webhook.
///
/// A 2xx reply countersigns when its body is empty or a JSON object without
/// `"countersigned": false`. A body that cannot be read or parsed, and any
/// other status, is a refusal.
pub struct WebhookGovernance {
    endpoint: String,
    client: Client,
}

impl WebhookGovernance {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Governance for WebhookGovernance {
    async fn countersign(&self, record: &PendingActionRecord) -> Result<()> {
        debug!(endpoint = %self.endpoint, tool = %record.tool_name, "Requesting countersign");
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| GateError::Governance(format!("countersign unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Countersign refused");
            return Err(GateError::Governance(format!(
                "countersign refused with status {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| {
            GateError::Governance(format!("countersign reply could not be read: {}", e))
        })?;
        interpret_reply(&body)
    }
}

fn interpret_reply(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let reply: CountersignReply = serde_json::from_str(body).map_err(|e| {
        warn!(error = %e, "Unparseable countersign reply");
        GateError::Governance(format!("countersign reply unreadable: {}", e))
    })?;
    if !reply.countersigned {
        return Err(GateError::Governance(format!(
            "countersign denied: {}",
            reply.reason.unwrap_or_else(|| "no reason given".to_string())
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> PendingActionRecord {
        PendingActionRecord {
            session_id: "s".into(),
            action_id: "a".into(),
            tool_name: "delete_file".into(),
            arguments: json!({"path": "x"}),
            justification: "why".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_classify_action() {
        for verb in ["read", "VIEW", " list ", "search"] {
            assert_eq!(classify_action(verb), RiskTier::Safe, "{}", verb);
        }
        for verb in ["delete", "write", "deploy", ""] {
            assert_eq!(classify_action(verb), RiskTier::Critical, "{}", verb);
        }
    }

    #[test]
    fn test_decision_builders() {
        let decision = ApprovalDecision::reject("s1", "  ")
            .for_action("a1")
            .by("alice");
        assert!(!decision.approved);
        assert_eq!(decision.action_id.as_deref(), Some("a1"));
        assert_eq!(decision.decided_by, "alice");
        assert_eq!(decision.reason_or_default(), "No reason given");

        let decision = ApprovalDecision::reject("s1", "destructive");
        assert_eq!(decision.reason_or_default(), "destructive");
        assert!(ApprovalDecision::approve("s1").approved);
    }

    #[tokio::test]
    async fn test_mock_governance() {
        let mut mock = MockGovernance::new();
        mock.expect_countersign()
            .times(1)
            .returning(|_| Err(GateError::Governance("offline".into())));
        let err = mock.countersign(&record()).await.unwrap_err();
        assert!(matches!(err, GateError::Governance(_)));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_error() {
        let governance =
            WebhookGovernance::new("http://127.0.0.1:9/countersign", Duration::from_millis(200))
                .unwrap();
        let err = governance.countersign(&record()).await.unwrap_err();
        assert!(matches!(err, GateError::Governance(_)));
    }

    /// Serve one HTTP exchange with a canned raw response.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/countersign", addr)
    }

    async fn countersign_via(response: &'static str) -> Result<()> {
        let endpoint = serve_once(response).await;
        WebhookGovernance::new(&endpoint, Duration::from_secs(5))
            .unwrap()
            .countersign(&record())
            .await
    }

    #[tokio::test]
    async fn test_webhook_empty_ok_countersigns() {
        countersign_via("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_garbage_body_is_refusal() {
        let err = countersign_via(
            "HTTP/1.1 200 OK\r\nContent-Length: 15\r\nConnection: close\r\n\r\n<html>ok</html>",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GateError::Governance(ref m) if m.contains("unreadable")));
    }

    #[tokio::test]
    async fn test_webhook_truncated_body_is_refusal() {
        let err = countersign_via(
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"cou",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GateError::Governance(ref m) if m.contains("could not be read")));
    }

    #[test]
    fn test_interpret_reply() {
        assert!(interpret_reply("").is_ok());
        assert!(interpret_reply("  \n").is_ok());
        assert!(interpret_reply("{}").is_ok());
        assert!(interpret_reply(r#"{"countersigned": true}"#).is_ok());
        assert!(interpret_reply(r#"{"countersigned": false}"#).is_err());
        for body in ["OK", "<html>", "true", "{\"countersigned\": \"yes\"}", "{"] {
            let err = interpret_reply(body).unwrap_err();
            assert!(matches!(err, GateError::Governance(_)), "{}", body);
        }
    }

    #[test]
    fn test_reply_defaults_to_countersigned() {
        let reply: CountersignReply = serde_json::from_str("{}").unwrap();
        assert!(reply.countersigned);
        let reply: CountersignReply =
            serde_json::from_str(r#"{"countersigned": false, "reason": "freeze"}"#).unwrap();
        assert!(!reply.countersigned);
        assert_eq!(reply.reason.as_deref(), Some("freeze"));
    }
}
