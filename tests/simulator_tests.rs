//! End-to-end runs against the in-process simulated fleet, driven by the
//! real run loop and real (millisecond-scale) clocks.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use netjobs::config::JobConfig;
use netjobs::dispatch::{run_job, DispatchJob};
use netjobs::error::DispatchError;
use netjobs::report::JobOutcome;
use netjobs::sim::{AgentBehavior, Simulator};

fn fast_config(minhosts: usize) -> JobConfig {
    JobConfig::new(minhosts)
        .with_host_timeout(Duration::from_millis(50))
        .with_task_timeout(Duration::from_millis(500))
        .with_probe_timeout(Duration::from_millis(25))
        .with_tick_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn responsive_fleet_completes_with_full_success() {
    let (channel, inbound) = Simulator::new()
        .with_default(AgentBehavior::responsive(Duration::from_millis(20)))
        .start();

    let now = Instant::now();
    let mut job = DispatchJob::new(fast_config(3), channel, now);
    job.dispatch("host-a", "task 1", now).unwrap();
    job.dispatch("host-b", "task 2", now).unwrap();
    job.dispatch("host-c", "task 3", now).unwrap();

    let report = run_job(job, inbound, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(JobOutcome::Success));
    assert!(report.is_success());
    assert_eq!(report.completed.len(), 3);
    assert!(report.orphaned.is_empty());
    assert!(report.hosts_lost.is_empty());
}

#[tokio::test]
async fn dead_host_is_lost_after_quorum_and_job_still_succeeds() {
    let (channel, inbound) = Simulator::new()
        .with_default(AgentBehavior::responsive(Duration::from_millis(15)))
        .agent("host-c", AgentBehavior::silent())
        .start();

    let now = Instant::now();
    let mut job = DispatchJob::new(fast_config(2), channel, now);
    job.dispatch("host-a", "task 1", now).unwrap();
    job.dispatch("host-b", "task 2", now).unwrap();
    job.dispatch("host-c", "task 3", now).unwrap();

    let report = run_job(job, inbound, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(JobOutcome::PartialFailure));
    assert!(report.is_success());
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].host, "host-c");
    assert_eq!(report.hosts_lost, vec!["host-c"]);
}

#[tokio::test]
async fn stalled_host_times_out_its_task_but_is_never_lost() {
    // host-c answers every probe, so only the task clock can end its task.
    let (channel, inbound) = Simulator::new()
        .with_default(AgentBehavior::responsive(Duration::from_millis(15)))
        .agent("host-c", AgentBehavior::stalled())
        .start();

    let config = fast_config(1).with_task_timeout(Duration::from_millis(150));
    let now = Instant::now();
    let mut job = DispatchJob::new(config, channel, now);
    job.dispatch("host-a", "task 1", now).unwrap();
    job.dispatch("host-c", "task 2", now).unwrap();

    let report = run_job(job, inbound, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, Some(JobOutcome::PartialFailure));
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.timed_out.len(), 1);
    assert_eq!(report.timed_out[0].host, "host-c");
    assert!(report.orphaned.is_empty());
    assert!(report.hosts_lost.is_empty());
}

#[tokio::test]
async fn cancellation_aborts_the_job_and_orphans_pending_work() {
    let (channel, inbound) = Simulator::new()
        .with_default(AgentBehavior::responsive(Duration::from_secs(30)))
        .start();

    let now = Instant::now();
    let mut job = DispatchJob::new(fast_config(2), channel, now);
    job.dispatch("host-a", "task 1", now).unwrap();
    job.dispatch("host-b", "task 2", now).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let report = run_job(job, inbound, cancel).await.unwrap();

    assert!(report.aborted);
    assert_eq!(report.outcome, None);
    assert!(!report.is_success());
    assert_eq!(report.orphaned.len(), 2);
    assert!(report.completed.is_empty());
}

#[tokio::test]
async fn job_fails_fast_when_quorum_becomes_unreachable() {
    let (channel, inbound) = Simulator::new()
        .with_default(AgentBehavior::silent())
        .start();

    let config = fast_config(2).with_task_timeout(Duration::from_millis(60));
    let now = Instant::now();
    let mut job = DispatchJob::new(config, channel, now);
    job.dispatch("host-a", "task 1", now).unwrap();
    job.dispatch("host-b", "task 2", now).unwrap();

    let err = run_job(job, inbound, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        DispatchError::QuorumUnreachable { feasible, minhosts } => {
            assert_eq!(feasible, 0);
            assert_eq!(minhosts, 2);
        }
        other => panic!("expected QuorumUnreachable, got {other}"),
    }
}
