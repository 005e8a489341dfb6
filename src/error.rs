use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Unknown task: {0}")]
    UnknownTask(uuid::Uuid),

    #[error("Duplicate task: {0}")]
    DuplicateTask(uuid::Uuid),

    #[error("Invalid transition for host {host}: {from} -> {to}")]
    InvalidTransition {
        host: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid state for host {host}: expected {expected}, was {actual}")]
    InvalidState {
        host: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Quorum unreachable: {feasible} host(s) can still complete, {minhosts} required")]
    QuorumUnreachable { feasible: usize, minhosts: usize },

    #[error("Spec file error: {0}")]
    Spec(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
