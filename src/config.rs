use std::time::Duration;

/// Per-job configuration.
///
/// The three timeout clocks are deliberately independent: a host may be
/// silent (approaching `host_timeout`) while its task still has budget left
/// (`task_timeout` not yet due), and a responsive host may sit on a stalled
/// task. They are tracked as separate deadlines throughout.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Minimum number of hosts whose full task set must complete for the
    /// job to be quorum-satisfied. Must be >= 1.
    pub minhosts: usize,
    /// Deadline for receiving any liveness signal from a host.
    pub host_timeout: Duration,
    /// Deadline for a specific task's completion.
    pub task_timeout: Duration,
    /// Deadline for a status-probe reply once a probe has been sent.
    pub probe_timeout: Duration,
    /// Period of the coordinator's timer loop.
    pub tick_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            minhosts: 1,
            host_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl JobConfig {
    pub fn new(minhosts: usize) -> Self {
        Self {
            minhosts: minhosts.max(1),
            ..Default::default()
        }
    }

    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
