//! Structured engine event stream.
//!
//! Every node transition, routing decision and tool invocation is published
//! on a broadcast channel so an external collaborator can observe execution.
//! Events are mirrored to `tracing` at debug level.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::session::LifecycleState;
use crate::tools::RiskTier;

/// Nodes of the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Reasoning,
    Router,
    SafeExecutor,
    CriticalGate,
    CriticalExecutor,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Node::Reasoning => "reasoning",
            Node::Router => "router",
            Node::SafeExecutor => "safe_executor",
            Node::CriticalGate => "critical_gate",
            Node::CriticalExecutor => "critical_executor",
        };
        write!(f, "{}", s)
    }
}

/// One observable engine event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    NodeEntered {
        session_id: String,
        node: Node,
    },
    RouteDecided {
        session_id: String,
        route: String,
    },
    ToolInvoked {
        session_id: String,
        tool: String,
        tier: RiskTier,
        is_error: bool,
    },
    Suspended {
        session_id: String,
        tool: String,
        action_id: String,
    },
    Resumed {
        session_id: String,
        approved: bool,
    },
    LoopDetected {
        session_id: String,
        tool: String,
    },
    Finished {
        session_id: String,
        state: LifecycleState,
    },
}

/// Broadcast publisher for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver; sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        debug!(event = ?event, "engine event");
        let _ = self.tx.send(event);
    }
}
