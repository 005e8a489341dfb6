use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::channel::{CoordinatorMessage, MessageChannel};
use crate::dispatch::ledger::TaskLedger;
use crate::dispatch::registry::HostRegistry;
use crate::error::Result;

/// Disambiguates silence: is a timed-out host dead, or just slow?
///
/// The coordinator activates the prober only after quorum is reached and at
/// least one host still has pending work, so no probe traffic is generated
/// while the job is normally in flight. A probe is strictly additive: it
/// never blocks the completion path, and a task completion arriving
/// mid-probe counts as an implicit reply.
#[derive(Debug, Default)]
pub struct StatusProber {
    /// Probe send instants, keyed by host, for hosts awaiting a reply.
    outstanding: HashMap<String, Instant>,
}

impl StatusProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a `StatusRequest` to a `TimedOut` host and start its probe
    /// clock. Fails with `InvalidState` if the host is not `TimedOut`.
    pub fn probe(
        &mut self,
        host: &str,
        now: Instant,
        registry: &mut HostRegistry,
        channel: &dyn MessageChannel,
    ) -> Result<()> {
        registry.mark_probing(host)?;
        channel.send(host, CoordinatorMessage::StatusRequest);
        self.outstanding.insert(host.to_string(), now);
        tracing::info!(host, "Status probe sent");
        Ok(())
    }

    /// Handle a `StatusReply`: the host is alive after all. Replies from
    /// hosts that were never probed, or that were already declared lost,
    /// are tolerated no-ops.
    pub fn on_status_reply(&mut self, host: &str, now: Instant, registry: &mut HostRegistry) {
        if self.outstanding.remove(host).is_some() {
            tracing::info!(host, "Status reply received, host is alive");
        } else {
            tracing::debug!(host, "Unsolicited status reply");
        }
        if registry.contains(host) {
            // mark_seen tolerates lost hosts itself.
            let _ = registry.mark_seen(host, now);
        }
    }

    /// Expire probes with no reply within `probe_timeout`: the host is
    /// declared lost and its pending tasks are orphaned in the same step.
    /// Returns the hosts lost on this pass.
    pub fn on_probe_timeouts(
        &mut self,
        now: Instant,
        probe_timeout: Duration,
        registry: &mut HostRegistry,
        ledger: &mut TaskLedger,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, sent)| now.duration_since(**sent) > probe_timeout)
            .map(|(host, _)| host.clone())
            .collect();

        let mut lost = Vec::new();
        for host in expired {
            self.outstanding.remove(&host);
            match registry.mark_lost(&host) {
                Ok(()) => {
                    let orphaned = ledger.orphan_tasks_of(&host);
                    tracing::warn!(host = %host, orphaned, "No probe reply, host declared lost");
                    lost.push(host);
                }
                Err(e) => {
                    // The host produced evidence of life between the expiry
                    // scan and this transition; keep it.
                    tracing::debug!(host = %host, error = %e, "Skipping lost transition");
                }
            }
        }
        lost
    }

    /// Cancel an outstanding probe because the host answered through the
    /// normal path (a task completion is conclusive evidence of liveness).
    pub fn cancel(&mut self, host: &str) -> bool {
        if self.outstanding.remove(host).is_some() {
            tracing::debug!(host, "Probe cancelled by task completion");
            true
        } else {
            false
        }
    }

    /// Drop all outstanding probes without contacting hosts. Used on abort.
    pub fn clear(&mut self) {
        self.outstanding.clear();
    }

    pub fn is_outstanding(&self, host: &str) -> bool {
        self.outstanding.contains_key(host)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}
