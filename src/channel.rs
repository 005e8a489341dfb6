//! Message types exchanged with agents and the channel seam.
//!
//! Framing and payload serialization belong to the transport collaborator;
//! the coordinator only sees typed messages. The channel may drop or delay
//! messages: deliveries are unordered across hosts but ordered within a
//! single host connection.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Host identifier: an address or name, unique within a job.
pub type HostId = String;

/// Messages sent from the coordinator to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinatorMessage {
    /// Assign a task to the agent for execution.
    TaskDispatch { task_id: Uuid, payload: String },
    /// Ask a silent agent whether it is still there.
    StatusRequest,
}

/// Messages received from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentMessage {
    /// The agent finished a task.
    TaskComplete {
        task_id: Uuid,
        result: Option<String>,
    },
    /// Reply to a `StatusRequest`.
    StatusReply,
}

/// Inbound envelope: which host a message arrived from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub host: HostId,
    pub message: AgentMessage,
}

/// Outbound seam to the transport collaborator.
///
/// Sends are fire-and-forget: the coordinator never blocks waiting on a
/// host, and a dropped message is indistinguishable from a slow host (the
/// timeout clocks handle both).
pub trait MessageChannel: Send + Sync {
    fn send(&self, host: &str, message: CoordinatorMessage);
}

/// Channel implementation backed by an in-process mpsc sender, used by the
/// simulator and tests.
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<(HostId, CoordinatorMessage)>,
}

impl MpscChannel {
    pub fn new(tx: mpsc::UnboundedSender<(HostId, CoordinatorMessage)>) -> Self {
        Self { tx }
    }
}

impl MessageChannel for MpscChannel {
    fn send(&self, host: &str, message: CoordinatorMessage) {
        if self.tx.send((host.to_string(), message)).is_err() {
            tracing::warn!(host, "Outbound channel closed, message dropped");
        }
    }
}

/// A channel that discards everything, for driving the state machine in
/// tests that only care about transitions.
pub struct NullChannel;

impl MessageChannel for NullChannel {
    fn send(&self, _host: &str, _message: CoordinatorMessage) {}
}
