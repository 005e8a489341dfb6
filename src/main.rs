use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netjobs::config::JobConfig;
use netjobs::dispatch::{run_job, DispatchJob};
use netjobs::shutdown::install_shutdown_handler;
use netjobs::sim::{AgentBehavior, Simulator};
use netjobs::specfile::{self, JobSpec, TimeoutSpec};

#[derive(Parser, Debug)]
#[command(name = "netjobs")]
#[command(version)]
#[command(about = "A network job synchronizer: quorum-based task dispatch across agent hosts")]
#[command(propagate_version = true)]
struct Args {
    /// Verbose logging (equivalent to RUST_LOG=debug)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Parse a job spec file and print what would run
    Check {
        /// Path to the job spec file
        spec: PathBuf,
    },

    /// Run the jobs in a spec file
    Run {
        /// Path to the job spec file
        spec: PathBuf,

        /// Run against in-process simulated agents (no networking)
        #[arg(long, short = 's')]
        simulate: bool,

        /// Default host timeout when the spec does not set one (e.g. "30s")
        #[arg(long, default_value = "30s")]
        host_timeout: String,

        /// Default task timeout when the spec does not set one
        #[arg(long, default_value = "60s")]
        task_timeout: String,

        /// Default probe timeout when the spec does not set one
        #[arg(long, default_value = "10s")]
        probe_timeout: String,

        /// Simulated completion latency per task (simulate mode)
        #[arg(long, default_value = "50")]
        sim_latency_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Commands::Check { spec } => {
            let specs = specfile::parse_file(&spec)?;
            for job in &specs {
                print_spec(job);
            }
            println!("{} job(s) parsed from {}", specs.len(), spec.display());
            Ok(())
        }

        Commands::Run {
            spec,
            simulate,
            host_timeout,
            task_timeout,
            probe_timeout,
            sim_latency_ms,
        } => {
            if !simulate {
                return Err(
                    "no agent transport is configured in this build; re-run with --simulate".into(),
                );
            }

            let defaults = JobConfig::default()
                .with_host_timeout(required_timeout("--host-timeout", &host_timeout)?)
                .with_task_timeout(required_timeout("--task-timeout", &task_timeout)?)
                .with_probe_timeout(required_timeout("--probe-timeout", &probe_timeout)?);

            let specs = specfile::parse_file(&spec)?;
            let cancel = install_shutdown_handler();

            let mut failures = 0usize;
            for job_spec in &specs {
                tracing::info!(label = %job_spec.label, targets = job_spec.targets.len(), "Starting job");
                match run_one(job_spec, &defaults, sim_latency_ms, cancel.clone()).await {
                    Ok(report) => {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                        if !report.is_success() {
                            failures += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(label = %job_spec.label, error = %e, "Job failed");
                        failures += 1;
                    }
                }
                if cancel.is_cancelled() {
                    break;
                }
            }

            if failures > 0 {
                Err(format!("{failures} job(s) failed").into())
            } else {
                Ok(())
            }
        }
    }
}

async fn run_one(
    spec: &JobSpec,
    defaults: &JobConfig,
    sim_latency_ms: u64,
    cancel: tokio_util::sync::CancellationToken,
) -> netjobs::Result<netjobs::report::JobReport> {
    let config = spec
        .job_config(defaults)
        .with_tick_interval(Duration::from_millis(100));

    let simulator = Simulator::new()
        .with_default(AgentBehavior::responsive(Duration::from_millis(
            sim_latency_ms,
        )))
        .with_jitter(Duration::from_millis(sim_latency_ms / 2));
    let (channel, inbound) = simulator.start();

    let now = Instant::now();
    let mut job = DispatchJob::new(config.clone(), channel, now);
    for target in &spec.targets {
        // An explicit `none` resolves to no deadline at all.
        let timeout = target.timeout.resolve(config.task_timeout);
        job.dispatch_with_timeout(&target.host, &target.command, Instant::now(), timeout)?;
    }

    run_job(job, inbound, cancel).await
}

fn required_timeout(flag: &str, value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    match specfile::parse_timeout(value)? {
        TimeoutSpec::After(d) => Ok(d),
        _ => Err(format!("{flag} must be a concrete duration, not \"none\"").into()),
    }
}

fn timeout_label(timeout: TimeoutSpec) -> String {
    match timeout {
        TimeoutSpec::Unset => "default".to_string(),
        TimeoutSpec::Never => "none".to_string(),
        TimeoutSpec::After(d) => format!("{}s", d.as_secs()),
    }
}

fn print_spec(spec: &JobSpec) {
    println!("{}:", spec.label);
    println!("  minhosts: {}", spec.minhosts_count());
    println!("  general timeout: {}", timeout_label(spec.general_timeout));
    for target in &spec.targets {
        println!(
            "  {} ({}): {}",
            target.host,
            timeout_label(target.timeout),
            target.command
        );
    }
}
