use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{AgentMessage, CoordinatorMessage, Inbound, MessageChannel};
use crate::config::JobConfig;
use crate::dispatch::ledger::{TaskLedger, TaskState};
use crate::dispatch::prober::StatusProber;
use crate::dispatch::registry::{HostRegistry, HostState};
use crate::error::{DispatchError, Result};
use crate::report::{JobOutcome, JobReport, JobSnapshot, TaskRecord};

/// Coordinator phase over the job.
///
/// `QuorumReached` is transient: the same evaluation that detects quorum
/// immediately activates the prober and moves to `Resolving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    QuorumReached,
    Resolving,
    Done(JobOutcome),
}

/// The job aggregate and its dispatch/liveness state machine.
///
/// Owns the host registry, task ledger, and status prober; every mutation
/// of host or task state flows through here, serialized on one logical
/// loop, so no locking is needed. The state machine itself is synchronous
/// and takes explicit `now` instants; [`run_job`] drives it with real time.
pub struct DispatchJob {
    config: JobConfig,
    channel: Arc<dyn MessageChannel>,
    registry: HostRegistry,
    ledger: TaskLedger,
    prober: StatusProber,
    phase: Phase,
    started_instant: Instant,
    started_at: DateTime<Utc>,
    aborted: bool,
}

impl DispatchJob {
    pub fn new(config: JobConfig, channel: Arc<dyn MessageChannel>, now: Instant) -> Self {
        Self {
            config,
            channel,
            registry: HostRegistry::new(),
            ledger: TaskLedger::new(),
            prober: StatusProber::new(),
            phase: Phase::Running,
            started_instant: now,
            started_at: Utc::now(),
            aborted: false,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done(_))
    }

    /// Dispatch a task to a host using the job-wide task timeout.
    pub fn dispatch(&mut self, host: &str, payload: &str, now: Instant) -> Result<Uuid> {
        self.dispatch_with_timeout(host, payload, now, Some(self.config.task_timeout))
    }

    /// Dispatch a task with a per-task timeout override (the task clock is
    /// per task; the host clock stays job-wide). `None` dispatches the task
    /// without a deadline.
    pub fn dispatch_with_timeout(
        &mut self,
        host: &str,
        payload: &str,
        now: Instant,
        task_timeout: Option<Duration>,
    ) -> Result<Uuid> {
        let task_id = Uuid::new_v4();
        self.registry.register(host, now);
        self.ledger
            .dispatch(task_id, host, payload.to_string(), now, task_timeout)?;
        self.channel.send(
            host,
            CoordinatorMessage::TaskDispatch {
                task_id,
                payload: payload.to_string(),
            },
        );
        tracing::info!(task_id = %task_id, host, payload, "Task dispatched");
        Ok(task_id)
    }

    /// Apply an incoming agent message. Late, duplicate, and unsolicited
    /// messages are tolerated; an unreliable channel makes them routine.
    pub fn handle_message(&mut self, host: &str, message: AgentMessage, now: Instant) {
        if self.aborted || self.is_done() {
            tracing::debug!(host, "Message after job conclusion ignored");
            return;
        }
        match message {
            AgentMessage::TaskComplete { task_id, result } => {
                if !self.registry.contains(host) {
                    tracing::warn!(host, task_id = %task_id, "Completion from unregistered host ignored");
                    return;
                }
                // Only the assigned host may complete a task; a mismatched
                // sender gets neither the completion nor liveness credit.
                match self.ledger.get(&task_id) {
                    None => {
                        tracing::warn!(host, task_id = %task_id, "Completion for unknown task ignored");
                        return;
                    }
                    Some(task) if task.host_id != host => {
                        tracing::warn!(host, task_id = %task_id, assigned = %task.host_id, "Completion from wrong host ignored");
                        return;
                    }
                    Some(_) => {}
                }
                // A task result is conclusive evidence of liveness: it
                // refreshes the host clock and stands in for any probe reply.
                if self.registry.mark_seen(host, now).is_ok() {
                    self.prober.cancel(host);
                }
                match self.ledger.complete(task_id, result) {
                    Ok(true) => self.advance(now),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(host, task_id = %task_id, error = %e, "Completion ignored")
                    }
                }
            }
            AgentMessage::StatusReply => {
                self.prober.on_status_reply(host, now, &mut self.registry);
            }
        }
    }

    /// One pass of the timer loop: expire the host, task, and probe clocks
    /// (each independent), check quorum feasibility, and advance the phase
    /// machine. Returns `QuorumUnreachable` if too few hosts can still
    /// complete their task sets before quorum was ever reached.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.aborted || self.is_done() {
            return Ok(());
        }

        self.registry
            .check_host_timeouts(now, self.config.host_timeout);
        self.ledger.check_task_timeouts(now);

        if self.phase == Phase::Resolving {
            self.prober.on_probe_timeouts(
                now,
                self.config.probe_timeout,
                &mut self.registry,
                &mut self.ledger,
            );
        }

        if self.phase == Phase::Running {
            let feasible = self.ledger.quorum_feasible_hosts();
            if feasible < self.config.minhosts {
                return Err(DispatchError::QuorumUnreachable {
                    feasible,
                    minhosts: self.config.minhosts,
                });
            }
        }

        self.advance(now);
        Ok(())
    }

    /// Advance the phase machine: `Running -> QuorumReached -> Resolving ->
    /// Done`. Called from the tick and from every effective completion.
    fn advance(&mut self, now: Instant) {
        if self.phase == Phase::Running
            && self.ledger.completed_host_count() >= self.config.minhosts
        {
            tracing::info!(
                completed_hosts = self.ledger.completed_host_count(),
                minhosts = self.config.minhosts,
                "Quorum reached"
            );
            self.phase = Phase::QuorumReached;
            self.enter_resolving(now);
        }

        if self.phase == Phase::Resolving {
            // Hosts that go silent after quorum are probed as they time
            // out, instead of being waited on passively.
            self.probe_suspect_hosts(now);

            if self.ledger.pending_count() == 0 && self.prober.outstanding_count() == 0 {
                let outcome = if self
                    .ledger
                    .tasks()
                    .all(|t| t.state == TaskState::Completed)
                {
                    JobOutcome::Success
                } else {
                    JobOutcome::PartialFailure
                };
                tracing::info!(outcome = %outcome, "Job done");
                self.phase = Phase::Done(outcome);
            }
        }
    }

    /// Activate the prober against every already-suspect host with pending
    /// work. Hosts still within their host-timeout budget (including ones
    /// never heard from) are picked up by `probe_suspect_hosts` on later
    /// ticks as their clocks expire.
    fn enter_resolving(&mut self, now: Instant) {
        self.phase = Phase::Resolving;
        self.probe_suspect_hosts(now);
    }

    fn probe_suspect_hosts(&mut self, now: Instant) {
        for host in self.ledger.hosts_with_pending() {
            if self.registry.state(&host) == Some(HostState::TimedOut)
                && !self.prober.is_outstanding(&host)
            {
                if let Err(e) =
                    self.prober
                        .probe(&host, now, &mut self.registry, self.channel.as_ref())
                {
                    tracing::error!(host = %host, error = %e, "Probe failed");
                }
            }
        }
    }

    /// Abort the job: stop issuing probes and orphan all pending tasks
    /// without contacting hosts.
    pub fn abort(&mut self) {
        if self.aborted || self.is_done() {
            return;
        }
        self.aborted = true;
        self.prober.clear();
        let orphaned = self.ledger.orphan_all_pending();
        tracing::warn!(orphaned, "Job aborted");
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Read-only view for periodic rendering.
    pub fn snapshot(&self, now: Instant) -> JobSnapshot {
        JobSnapshot {
            elapsed_secs: now.duration_since(self.started_instant).as_secs_f64(),
            pending: self.ledger.pending_count(),
            total_tasks: self.ledger.len(),
            hosts_lost: self.registry.lost_count(),
            hosts_total: self.registry.len(),
        }
    }

    /// Final manifest: completed, orphaned, and timed-out work plus the
    /// hosts declared lost along the way.
    pub fn report(&self) -> JobReport {
        let records = |state: TaskState| -> Vec<TaskRecord> {
            let mut v: Vec<TaskRecord> = self
                .ledger
                .tasks()
                .filter(|t| t.state == state)
                .map(TaskRecord::from)
                .collect();
            v.sort_by(|a, b| a.host.cmp(&b.host).then(a.payload.cmp(&b.payload)));
            v
        };
        let mut hosts_lost = self.registry.hosts_in_state(HostState::Lost);
        hosts_lost.sort();
        JobReport {
            outcome: match self.phase {
                Phase::Done(outcome) => Some(outcome),
                _ => None,
            },
            aborted: self.aborted,
            started_at: self.started_at,
            finished_at: Utc::now(),
            completed: records(TaskState::Completed),
            orphaned: records(TaskState::Orphaned),
            timed_out: records(TaskState::TimedOut),
            hosts_lost,
        }
    }

    // Component access for tests and the display layer.
    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn prober(&self) -> &StatusProber {
        &self.prober
    }
}

/// Drive a job to conclusion: select over inbound agent messages, the tick
/// interval, and external cancellation. Messages are drained before timer
/// work so a completion racing a deadline always wins.
pub async fn run_job(
    mut job: DispatchJob,
    mut inbound: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
) -> Result<JobReport> {
    let mut interval = tokio::time::interval(job.config().tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                job.abort();
                return Ok(job.report());
            }

            Some(Inbound { host, message }) = inbound.recv() => {
                job.handle_message(&host, message, Instant::now());
                if job.is_done() {
                    return Ok(job.report());
                }
            }

            _ = interval.tick() => {
                if let Err(e) = job.tick(Instant::now()) {
                    tracing::error!(error = %e, "Job failed");
                    job.abort();
                    return Err(e);
                }
                if job.is_done() {
                    return Ok(job.report());
                }
            }
        }
    }
}
