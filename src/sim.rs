//! In-process simulated agents.
//!
//! Stands in for the real agent fleet behind the [`MessageChannel`] seam:
//! each simulated host receives dispatches and probes and answers according
//! to a scripted [`AgentBehavior`]. Used by the CLI's simulate mode and the
//! integration tests; no networking involved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::channel::{AgentMessage, CoordinatorMessage, HostId, Inbound, MpscChannel};

/// Scripted behavior for one simulated host.
#[derive(Debug, Clone)]
pub struct AgentBehavior {
    /// Delay before reporting a dispatched task complete; `None` means the
    /// task never finishes.
    pub complete_after: Option<Duration>,
    /// Whether the host answers `StatusRequest` probes.
    pub answers_probes: bool,
    /// Delay before a probe reply goes out.
    pub probe_reply_delay: Duration,
    /// Result string attached to completions.
    pub result: Option<String>,
}

impl AgentBehavior {
    /// Completes work after `delay` and answers probes.
    pub fn responsive(delay: Duration) -> Self {
        Self {
            complete_after: Some(delay),
            answers_probes: true,
            probe_reply_delay: Duration::from_millis(5),
            result: Some("ok".to_string()),
        }
    }

    /// Never completes and never answers: a dead host.
    pub fn silent() -> Self {
        Self {
            complete_after: None,
            answers_probes: false,
            probe_reply_delay: Duration::ZERO,
            result: None,
        }
    }

    /// Answers probes but never finishes its work: alive, stalled.
    pub fn stalled() -> Self {
        Self {
            complete_after: None,
            answers_probes: true,
            probe_reply_delay: Duration::from_millis(5),
            result: None,
        }
    }
}

/// Builder for a simulated agent fleet.
pub struct Simulator {
    behaviors: HashMap<HostId, AgentBehavior>,
    default_behavior: AgentBehavior,
    /// Extra uniform-random latency added to completions.
    jitter: Duration,
    inbound_capacity: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            default_behavior: AgentBehavior::responsive(Duration::from_millis(50)),
            jitter: Duration::ZERO,
            inbound_capacity: 256,
        }
    }

    pub fn agent(mut self, host: &str, behavior: AgentBehavior) -> Self {
        self.behaviors.insert(host.to_string(), behavior);
        self
    }

    pub fn with_default(mut self, behavior: AgentBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Start the fleet: returns the outbound channel to hand to the
    /// coordinator and the inbound receiver its run loop consumes. The
    /// router task exits when the coordinator side is dropped.
    pub fn start(self) -> (Arc<MpscChannel>, mpsc::Receiver<Inbound>) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(HostId, CoordinatorMessage)>();
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(self.inbound_capacity);

        tokio::spawn(async move {
            while let Some((host, message)) = out_rx.recv().await {
                let behavior = self
                    .behaviors
                    .get(&host)
                    .unwrap_or(&self.default_behavior)
                    .clone();
                let in_tx = in_tx.clone();
                match message {
                    CoordinatorMessage::TaskDispatch { task_id, payload } => {
                        let Some(base_delay) = behavior.complete_after else {
                            tracing::debug!(host = %host, task_id = %task_id, "Simulated host swallows dispatch");
                            continue;
                        };
                        let jitter_ms = if self.jitter.is_zero() {
                            0
                        } else {
                            rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64)
                        };
                        tokio::spawn(async move {
                            tokio::time::sleep(base_delay + Duration::from_millis(jitter_ms)).await;
                            tracing::debug!(host = %host, task_id = %task_id, payload, "Simulated completion");
                            let _ = in_tx
                                .send(Inbound {
                                    host,
                                    message: AgentMessage::TaskComplete {
                                        task_id,
                                        result: behavior.result.clone(),
                                    },
                                })
                                .await;
                        });
                    }
                    CoordinatorMessage::StatusRequest => {
                        if !behavior.answers_probes {
                            tracing::debug!(host = %host, "Simulated host ignores probe");
                            continue;
                        }
                        tokio::spawn(async move {
                            tokio::time::sleep(behavior.probe_reply_delay).await;
                            let _ = in_tx
                                .send(Inbound {
                                    host,
                                    message: AgentMessage::StatusReply,
                                })
                                .await;
                        });
                    }
                }
            }
        });

        (Arc::new(MpscChannel::new(out_tx)), in_rx)
    }
}
