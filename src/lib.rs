pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod report;
pub mod shutdown;
pub mod sim;
pub mod specfile;

pub use config::JobConfig;
pub use dispatch::{run_job, DispatchJob, Phase};
pub use error::{DispatchError, Result};
