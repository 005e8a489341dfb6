use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Liveness state of an agent host.
///
/// `TimedOut` is a soft, revisable state: any message from the host returns
/// it to `Alive`. `Lost` is terminal for the duration of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Unknown,
    Alive,
    Probing,
    TimedOut,
    Lost,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Unknown => "unknown",
            HostState::Alive => "alive",
            HostState::Probing => "probing",
            HostState::TimedOut => "timed_out",
            HostState::Lost => "lost",
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-host tracking entry.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub id: String,
    pub state: HostState,
    /// Last received message from this host; starts at registration so a
    /// host that never speaks still times out from a defined instant.
    pub last_seen: Instant,
}

/// Tracks the set of known agent hosts and per-host liveness.
///
/// Hosts are created when first dispatched to and removed only at job
/// teardown; a `Lost` host stays registered for accounting. All transitions
/// are driven by the dispatch coordinator.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: HashMap<String, HostEntry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host in `Unknown` state if absent. Idempotent.
    pub fn register(&mut self, host: &str, now: Instant) {
        self.hosts.entry(host.to_string()).or_insert_with(|| {
            tracing::debug!(host, "Host registered");
            HostEntry {
                id: host.to_string(),
                state: HostState::Unknown,
                last_seen: now,
            }
        });
    }

    /// Record a liveness signal: transition to `Alive` and refresh
    /// `last_seen`. A signal from a `Lost` host is a tolerated no-op (late
    /// message on an unreliable channel).
    pub fn mark_seen(&mut self, host: &str, now: Instant) -> Result<()> {
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| DispatchError::UnknownHost(host.to_string()))?;
        if entry.state == HostState::Lost {
            tracing::debug!(host, "Ignoring liveness signal from lost host");
            return Ok(());
        }
        if entry.state != HostState::Alive {
            tracing::debug!(host, from = %entry.state, "Host alive");
        }
        entry.state = HostState::Alive;
        entry.last_seen = now;
        Ok(())
    }

    /// Expire the host-level clock: `Unknown`/`Alive` hosts silent for
    /// longer than `host_timeout` become `TimedOut`. Returns whether a
    /// transition occurred. `Probing` hosts are governed by the probe clock
    /// and are left alone here.
    pub fn check_host_timeout(
        &mut self,
        host: &str,
        now: Instant,
        host_timeout: std::time::Duration,
    ) -> Result<bool> {
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| DispatchError::UnknownHost(host.to_string()))?;
        match entry.state {
            HostState::Unknown | HostState::Alive
                if now.duration_since(entry.last_seen) > host_timeout =>
            {
                tracing::info!(host, silent_for = ?now.duration_since(entry.last_seen), "Host timed out");
                entry.state = HostState::TimedOut;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Run the host-timeout check across every host, returning the ids that
    /// transitioned to `TimedOut` on this pass.
    pub fn check_host_timeouts(
        &mut self,
        now: Instant,
        host_timeout: std::time::Duration,
    ) -> Vec<String> {
        let ids: Vec<String> = self.hosts.keys().cloned().collect();
        ids.into_iter()
            .filter(|id| {
                self.check_host_timeout(id, now, host_timeout)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// `TimedOut -> Probing`, recorded when a status probe goes out.
    pub fn mark_probing(&mut self, host: &str) -> Result<()> {
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| DispatchError::UnknownHost(host.to_string()))?;
        if entry.state != HostState::TimedOut {
            return Err(DispatchError::InvalidState {
                host: host.to_string(),
                expected: HostState::TimedOut.as_str(),
                actual: entry.state.as_str(),
            });
        }
        entry.state = HostState::Probing;
        Ok(())
    }

    /// Terminal transition from `TimedOut`/`Probing` to `Lost`. Declaring
    /// an `Alive` (or never-suspected `Unknown`) host lost is a bug in the
    /// caller and fails with `InvalidTransition`. Already-lost is a no-op.
    pub fn mark_lost(&mut self, host: &str) -> Result<()> {
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| DispatchError::UnknownHost(host.to_string()))?;
        match entry.state {
            HostState::TimedOut | HostState::Probing => {
                tracing::warn!(host, from = %entry.state, "Host lost");
                entry.state = HostState::Lost;
                Ok(())
            }
            HostState::Lost => Ok(()),
            from => Err(DispatchError::InvalidTransition {
                host: host.to_string(),
                from: from.as_str(),
                to: HostState::Lost.as_str(),
            }),
        }
    }

    pub fn state(&self, host: &str) -> Option<HostState> {
        self.hosts.get(host).map(|e| e.state)
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostEntry> {
        self.hosts.values()
    }

    pub fn hosts_in_state(&self, state: HostState) -> Vec<String> {
        self.hosts
            .values()
            .filter(|e| e.state == state)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn lost_count(&self) -> usize {
        self.hosts
            .values()
            .filter(|e| e.state == HostState::Lost)
            .count()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
