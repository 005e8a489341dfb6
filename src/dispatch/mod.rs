//! The dispatch/liveness state machine.
//!
//! Three components, each owned and serialized by the coordinator:
//! - [`HostRegistry`]: per-host liveness, driven by the host-timeout clock
//! - [`TaskLedger`]: per-task state, driven by the task-timeout clock
//! - [`StatusProber`]: post-quorum probes that disambiguate dead from slow
//!
//! The host and task clocks are fully independent: a silent host may hold a
//! task that is still within budget, and a live host may sit on a stalled
//! task. [`DispatchJob`] ties the components together and owns the
//! completion decision.

pub mod coordinator;
pub mod ledger;
pub mod prober;
pub mod registry;

pub use coordinator::{run_job, DispatchJob, Phase};
pub use ledger::{Task, TaskLedger, TaskState};
pub use prober::StatusProber;
pub use registry::{HostEntry, HostRegistry, HostState};
