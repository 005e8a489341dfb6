//! Job spec file parsing.
//!
//! A spec file holds one or more job blocks:
//!
//! ```text
//! # nightly sync
//! backup:
//! -generaltimeout: 60s
//! -minhosts: 2
//! host-a: "tar czf /backup/a.tgz /data"
//! host-b: rsync -a /data mirror::data
//! -timeout: 5m
//! end
//! ```
//!
//! Directives (`-generaltimeout`, `-minhosts`, `-hosttimeout`,
//! `-probetimeout`) must precede the target lines; a `-timeout` line applies
//! retroactively to the target immediately above it. Timeouts are written
//! `30s`, `5m`, `2h`, or `none`; `none` disables the task deadline entirely
//! (wait indefinitely) and is not accepted for the host and probe clocks.
//! Minhosts is an integer or `all`. Lines starting with `#` and blank lines
//! are skipped.

use std::path::Path;
use std::time::Duration;

use crate::config::JobConfig;
use crate::error::{DispatchError, Result};

/// Quorum requirement for a job block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinHosts {
    /// Every target host must complete (the default).
    All,
    Count(usize),
}

/// A parsed timeout directive.
///
/// The explicit `none` sentinel (`Never`) disables the clock, which is not
/// the same as `Unset` (no directive given, the caller's fallback applies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSpec {
    Unset,
    Never,
    After(Duration),
}

impl TimeoutSpec {
    /// Effective timeout: `Unset` takes the fallback, `Never` yields no
    /// deadline at all.
    pub fn resolve(self, fallback: Duration) -> Option<Duration> {
        match self {
            TimeoutSpec::Unset => Some(fallback),
            TimeoutSpec::Never => None,
            TimeoutSpec::After(d) => Some(d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub command: String,
    /// Per-task timeout; starts as the block's general timeout and may be
    /// overridden by a retroactive `-timeout` line.
    pub timeout: TimeoutSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub label: String,
    pub minhosts: MinHosts,
    pub general_timeout: TimeoutSpec,
    pub host_timeout: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub targets: Vec<TargetSpec>,
}

impl JobSpec {
    /// Number of distinct hosts named by this block.
    pub fn host_count(&self) -> usize {
        let mut hosts: Vec<&str> = self.targets.iter().map(|t| t.host.as_str()).collect();
        hosts.sort_unstable();
        hosts.dedup();
        hosts.len()
    }

    /// Resolve the quorum requirement to a concrete count.
    pub fn minhosts_count(&self) -> usize {
        match self.minhosts {
            MinHosts::All => self.host_count(),
            MinHosts::Count(n) => n.min(self.host_count()).max(1),
        }
    }

    /// Build the per-job configuration, taking unspecified values from
    /// `defaults`. Targets carry their own tri-state timeout, so the
    /// job-wide `task_timeout` only backs targets with no directive at all.
    pub fn job_config(&self, defaults: &JobConfig) -> JobConfig {
        JobConfig {
            minhosts: self.minhosts_count(),
            host_timeout: self.host_timeout.unwrap_or(defaults.host_timeout),
            task_timeout: match self.general_timeout {
                TimeoutSpec::After(d) => d,
                _ => defaults.task_timeout,
            },
            probe_timeout: self.probe_timeout.unwrap_or(defaults.probe_timeout),
            tick_interval: defaults.tick_interval,
        }
    }
}

/// Parse a timeout value: `none`, or an integer with an `h`/`m`/`s` suffix.
pub fn parse_timeout(value: &str) -> Result<TimeoutSpec> {
    let value = value.trim();
    if value == "none" {
        return Ok(TimeoutSpec::Never);
    }
    let (digits, unit) = value.split_at(value.len().saturating_sub(1));
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| DispatchError::Spec(format!("invalid timeout value \"{value}\"")))?;
    let secs = match unit {
        "h" => n * 60 * 60,
        "m" => n * 60,
        "s" => n,
        _ => {
            return Err(DispatchError::Spec(format!(
                "invalid timeout unit in \"{value}\" (expected h, m, or s)"
            )))
        }
    };
    Ok(TimeoutSpec::After(Duration::from_secs(secs)))
}

/// Line-level parser state, mirroring the block structure: outside any
/// block, inside a block before the first target, inside with targets.
#[derive(Debug, PartialEq, Eq)]
enum State {
    Outside,
    InBlockNoTarget,
    InBlockWithTargets,
}

struct OpenBlock {
    label: String,
    minhosts: MinHosts,
    general_timeout: TimeoutSpec,
    host_timeout: Option<Duration>,
    probe_timeout: Option<Duration>,
    targets: Vec<TargetSpec>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn strip_quotes(command: &str) -> &str {
    if command.len() > 1 && command.starts_with('"') && command.ends_with('"') {
        &command[1..command.len() - 1]
    } else {
        command
    }
}

pub fn parse_str(input: &str) -> Result<Vec<JobSpec>> {
    let mut specs = Vec::new();
    let mut state = State::Outside;
    let mut block: Option<OpenBlock> = None;

    for (lineno, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = lineno + 1;
        let err = |msg: String| DispatchError::Spec(format!("line {lineno}: {msg}"));

        match state {
            State::Outside => {
                let label = line
                    .strip_suffix(':')
                    .map(str::trim)
                    .filter(|l| valid_name(l))
                    .ok_or_else(|| {
                        err(format!("expected job label but found \"{line}\""))
                    })?;
                block = Some(OpenBlock {
                    label: label.to_string(),
                    minhosts: MinHosts::All,
                    general_timeout: TimeoutSpec::Unset,
                    host_timeout: None,
                    probe_timeout: None,
                    targets: Vec::new(),
                });
                state = State::InBlockNoTarget;
            }

            State::InBlockNoTarget | State::InBlockWithTargets => {
                let open = block.as_mut().expect("open block inside a job");

                if line == "end" {
                    if open.targets.is_empty() {
                        return Err(err(format!(
                            "job \"{}\" contains no targets",
                            open.label
                        )));
                    }
                    let open = block.take().expect("open block at end marker");
                    specs.push(JobSpec {
                        label: open.label,
                        minhosts: open.minhosts,
                        general_timeout: open.general_timeout,
                        host_timeout: open.host_timeout,
                        probe_timeout: open.probe_timeout,
                        targets: open.targets,
                    });
                    state = State::Outside;
                    continue;
                }

                if let Some(rest) = line.strip_prefix('-') {
                    let (name, value) = rest
                        .split_once(':')
                        .ok_or_else(|| err(format!("malformed directive \"{line}\"")))?;
                    let (name, value) = (name.trim(), value.trim());
                    match name {
                        "timeout" => {
                            // Applies retroactively to the target above.
                            let target = open.targets.last_mut().ok_or_else(|| {
                                err("timeout specified but no current target".to_string())
                            })?;
                            target.timeout = parse_timeout(value)?;
                        }
                        "generaltimeout" | "minhosts" | "hosttimeout" | "probetimeout"
                            if state == State::InBlockWithTargets =>
                        {
                            return Err(err(format!(
                                "-{name} must precede all target specifications"
                            )));
                        }
                        "generaltimeout" => open.general_timeout = parse_timeout(value)?,
                        "hosttimeout" => {
                            open.host_timeout = match parse_timeout(value)? {
                                TimeoutSpec::After(d) => Some(d),
                                _ => {
                                    return Err(err(
                                        "-hosttimeout must be a concrete duration, not \"none\""
                                            .to_string(),
                                    ))
                                }
                            }
                        }
                        "probetimeout" => {
                            open.probe_timeout = match parse_timeout(value)? {
                                TimeoutSpec::After(d) => Some(d),
                                _ => {
                                    return Err(err(
                                        "-probetimeout must be a concrete duration, not \"none\""
                                            .to_string(),
                                    ))
                                }
                            }
                        }
                        "minhosts" => {
                            open.minhosts = if value == "all" {
                                MinHosts::All
                            } else {
                                let n: usize = value.parse().map_err(|_| {
                                    err("minhosts must be \"all\" or an integer > 0".to_string())
                                })?;
                                if n == 0 {
                                    return Err(err(
                                        "minhosts must be \"all\" or an integer > 0".to_string(),
                                    ));
                                }
                                MinHosts::Count(n)
                            };
                        }
                        _ => return Err(err(format!("unknown directive \"-{name}\""))),
                    }
                    continue;
                }

                let (host, command) = line
                    .split_once(':')
                    .map(|(h, c)| (h.trim(), c.trim()))
                    .filter(|(h, c)| valid_name(h) && !c.is_empty())
                    .ok_or_else(|| err(format!("unable to interpret line \"{line}\"")))?;
                open.targets.push(TargetSpec {
                    host: host.to_string(),
                    command: strip_quotes(command).to_string(),
                    timeout: open.general_timeout,
                });
                state = State::InBlockWithTargets;
            }
        }
    }

    if state != State::Outside {
        let label = block.map(|b| b.label).unwrap_or_default();
        return Err(DispatchError::Spec(format!(
            "job \"{label}\" is missing its end marker"
        )));
    }
    Ok(specs)
}

pub fn parse_file(path: &Path) -> Result<Vec<JobSpec>> {
    let input = std::fs::read_to_string(path)
        .map_err(|e| DispatchError::Spec(format!("{}: {e}", path.display())))?;
    parse_str(&input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("none").unwrap(), TimeoutSpec::Never);
        assert_eq!(
            parse_timeout("30s").unwrap(),
            TimeoutSpec::After(Duration::from_secs(30))
        );
        assert_eq!(
            parse_timeout("5m").unwrap(),
            TimeoutSpec::After(Duration::from_secs(300))
        );
        assert_eq!(
            parse_timeout("2h").unwrap(),
            TimeoutSpec::After(Duration::from_secs(7200))
        );
    }

    #[test]
    fn timeout_spec_resolution() {
        let fallback = Duration::from_secs(60);
        assert_eq!(TimeoutSpec::Unset.resolve(fallback), Some(fallback));
        assert_eq!(TimeoutSpec::Never.resolve(fallback), None);
        assert_eq!(
            TimeoutSpec::After(Duration::from_secs(5)).resolve(fallback),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_timeout_rejects_garbage() {
        assert!(parse_timeout("30").is_err());
        assert!(parse_timeout("s").is_err());
        assert!(parse_timeout("30d").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn parse_single_block() {
        let specs = parse_str(
            "# comment\n\
             nightly:\n\
             -generaltimeout: 60s\n\
             -minhosts: 2\n\
             host-a: \"echo hello\"\n\
             host-b: sleep 5\n\
             -timeout: 5m\n\
             end\n",
        )
        .unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.label, "nightly");
        assert_eq!(spec.minhosts, MinHosts::Count(2));
        assert_eq!(
            spec.general_timeout,
            TimeoutSpec::After(Duration::from_secs(60))
        );
        assert_eq!(spec.targets.len(), 2);
        // Quotes stripped, general timeout applied.
        assert_eq!(spec.targets[0].host, "host-a");
        assert_eq!(spec.targets[0].command, "echo hello");
        assert_eq!(
            spec.targets[0].timeout,
            TimeoutSpec::After(Duration::from_secs(60))
        );
        // Retroactive -timeout overrides the target above it only.
        assert_eq!(
            spec.targets[1].timeout,
            TimeoutSpec::After(Duration::from_secs(300))
        );
    }

    #[test]
    fn explicit_none_disables_the_deadline_instead_of_falling_back() {
        let specs = parse_str(
            "job:\n\
             -generaltimeout: 45s\n\
             a: echo 1\n\
             b: echo 2\n\
             -timeout: none\n\
             end\n",
        )
        .unwrap();
        let cfg = specs[0].job_config(&JobConfig::default());
        assert_eq!(cfg.task_timeout, Duration::from_secs(45));
        assert_eq!(
            specs[0].targets[0].timeout.resolve(cfg.task_timeout),
            Some(Duration::from_secs(45))
        );
        // `none` means wait indefinitely, not "inherit the 45s general".
        assert_eq!(specs[0].targets[1].timeout, TimeoutSpec::Never);
        assert_eq!(specs[0].targets[1].timeout.resolve(cfg.task_timeout), None);
    }

    #[test]
    fn general_none_leaves_every_target_unbounded() {
        let specs = parse_str(
            "job:\n\
             -generaltimeout: none\n\
             a: echo 1\n\
             end\n",
        )
        .unwrap();
        assert_eq!(specs[0].general_timeout, TimeoutSpec::Never);
        assert_eq!(specs[0].targets[0].timeout, TimeoutSpec::Never);
        assert_eq!(
            specs[0].targets[0]
                .timeout
                .resolve(JobConfig::default().task_timeout),
            None
        );
    }

    #[test]
    fn none_is_rejected_for_host_and_probe_clocks() {
        let err = parse_str("job:\n-hosttimeout: none\na: echo 1\nend\n").unwrap_err();
        assert!(err.to_string().contains("concrete duration"));
        let err = parse_str("job:\n-probetimeout: none\na: echo 1\nend\n").unwrap_err();
        assert!(err.to_string().contains("concrete duration"));
    }

    #[test]
    fn parse_multiple_blocks() {
        let specs = parse_str(
            "first:\n\
             a: echo 1\n\
             end\n\
             second:\n\
             -minhosts: all\n\
             b: echo 2\n\
             c: echo 3\n\
             end\n",
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].label, "first");
        assert_eq!(specs[1].minhosts, MinHosts::All);
        assert_eq!(specs[1].minhosts_count(), 2);
    }

    #[test]
    fn minhosts_count_clamps_to_host_count() {
        let specs = parse_str(
            "job:\n\
             -minhosts: 9\n\
             a: echo 1\n\
             b: echo 2\n\
             end\n",
        )
        .unwrap();
        assert_eq!(specs[0].minhosts_count(), 2);
    }

    #[test]
    fn repeated_host_counts_once() {
        let specs = parse_str(
            "job:\n\
             a: echo 1\n\
             a: echo 2\n\
             b: echo 3\n\
             end\n",
        )
        .unwrap();
        assert_eq!(specs[0].targets.len(), 3);
        assert_eq!(specs[0].host_count(), 2);
    }

    #[test]
    fn timeout_before_target_is_an_error() {
        let err = parse_str("job:\n-timeout: 10s\na: echo 1\nend\n").unwrap_err();
        assert!(err.to_string().contains("no current target"));
    }

    #[test]
    fn directives_after_targets_are_an_error() {
        let err = parse_str("job:\na: echo 1\n-minhosts: 1\nend\n").unwrap_err();
        assert!(err.to_string().contains("must precede"));
    }

    #[test]
    fn empty_block_is_an_error() {
        let err = parse_str("job:\nend\n").unwrap_err();
        assert!(err.to_string().contains("no targets"));
    }

    #[test]
    fn missing_end_is_an_error() {
        let err = parse_str("job:\na: echo 1\n").unwrap_err();
        assert!(err.to_string().contains("missing its end marker"));
    }

    #[test]
    fn job_config_resolution() {
        let specs = parse_str(
            "job:\n\
             -generaltimeout: 45s\n\
             -hosttimeout: 20s\n\
             -probetimeout: 5s\n\
             -minhosts: 1\n\
             a: echo 1\n\
             b: echo 2\n\
             end\n",
        )
        .unwrap();
        let cfg = specs[0].job_config(&JobConfig::default());
        assert_eq!(cfg.minhosts, 1);
        assert_eq!(cfg.task_timeout, Duration::from_secs(45));
        assert_eq!(cfg.host_timeout, Duration::from_secs(20));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
    }
}
