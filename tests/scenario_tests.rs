//! A full job walked through with explicit clocks: four hosts, a quorum of
//! two, one slow host and one dead one.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use netjobs::channel::{AgentMessage, CoordinatorMessage, MessageChannel};
use netjobs::config::JobConfig;
use netjobs::dispatch::{DispatchJob, HostState, Phase, TaskState};
use netjobs::report::JobOutcome;

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, CoordinatorMessage)>>,
}

impl RecordingChannel {
    fn probed_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| matches!(m, CoordinatorMessage::StatusRequest))
            .map(|(host, _)| host.clone())
            .collect();
        hosts.sort();
        hosts
    }
}

impl MessageChannel for RecordingChannel {
    fn send(&self, host: &str, message: CoordinatorMessage) {
        self.sent.lock().unwrap().push((host.to_string(), message));
    }
}

#[test]
fn four_host_job_with_one_slow_and_one_dead_host() {
    let channel = Arc::new(RecordingChannel::default());
    let config = JobConfig::new(2)
        .with_host_timeout(Duration::from_secs(30))
        .with_task_timeout(Duration::from_secs(60))
        .with_probe_timeout(Duration::from_secs(10));

    let t0 = Instant::now();
    let at = |secs: u64| t0 + Duration::from_secs(secs);
    let mut job = DispatchJob::new(config, channel.clone(), t0);

    let task_a = job.dispatch("alpha", "make backup", t0).unwrap();
    let task_b = job.dispatch("bravo", "make backup", t0).unwrap();
    let task_c = job.dispatch("charlie", "make backup", t0).unwrap();
    let task_d = job.dispatch("delta", "make backup", t0).unwrap();
    assert_eq!(job.phase(), Phase::Running);

    // alpha finishes at t=5; one completion short of quorum.
    job.handle_message(
        "alpha",
        AgentMessage::TaskComplete {
            task_id: task_a,
            result: Some("done".to_string()),
        },
        at(5),
    );
    assert_eq!(job.phase(), Phase::Running);

    // bravo at t=6 makes quorum. charlie and delta are silent but still
    // inside their host-timeout budget, so no probes go out yet.
    job.handle_message(
        "bravo",
        AgentMessage::TaskComplete {
            task_id: task_b,
            result: Some("done".to_string()),
        },
        at(6),
    );
    assert_eq!(job.phase(), Phase::Resolving);
    assert!(channel.probed_hosts().is_empty());

    job.tick(at(20)).unwrap();
    assert!(channel.probed_hosts().is_empty());

    // t=31: both silent hosts blow the host timeout and get probed.
    job.tick(at(31)).unwrap();
    assert_eq!(job.registry().state("charlie"), Some(HostState::Probing));
    assert_eq!(job.registry().state("delta"), Some(HostState::Probing));
    assert_eq!(channel.probed_hosts(), vec!["charlie", "delta"]);

    // delta answers its probe at t=35: slow, not dead.
    job.handle_message("delta", AgentMessage::StatusReply, at(35));
    assert_eq!(job.registry().state("delta"), Some(HostState::Alive));
    assert!(!job.prober().is_outstanding("delta"));
    assert_eq!(job.phase(), Phase::Resolving);

    // t=42: charlie never answered within the 10s probe window. It is
    // declared lost and its task orphaned; delta keeps the job open.
    job.tick(at(42)).unwrap();
    assert_eq!(job.registry().state("charlie"), Some(HostState::Lost));
    assert_eq!(job.ledger().get(&task_c).unwrap().state, TaskState::Orphaned);
    assert_eq!(job.phase(), Phase::Resolving);

    // delta finally completes at t=50, well inside its 60s task budget.
    job.handle_message(
        "delta",
        AgentMessage::TaskComplete {
            task_id: task_d,
            result: Some("done".to_string()),
        },
        at(50),
    );
    assert_eq!(job.ledger().get(&task_d).unwrap().state, TaskState::Completed);
    assert_eq!(job.phase(), Phase::Done(JobOutcome::PartialFailure));

    // The job met its quorum, so the run counts as a success even though
    // charlie's task was abandoned.
    let report = job.report();
    assert!(report.is_success());
    assert_eq!(report.outcome, Some(JobOutcome::PartialFailure));
    assert!(!report.aborted);
    assert_eq!(report.completed.len(), 3);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].host, "charlie");
    assert!(report.timed_out.is_empty());
    assert_eq!(report.hosts_lost, vec!["charlie"]);

    // charlie was probed exactly once.
    assert_eq!(
        channel
            .probed_hosts()
            .iter()
            .filter(|h| h.as_str() == "charlie")
            .count(),
        1
    );
}
