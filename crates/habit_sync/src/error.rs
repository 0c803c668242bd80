use habit_domain::DomainError;
use thiserror::Error;

use crate::timer::TimerCommit;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction on `{path}` kept conflicting after {attempts} attempts")]
    Contention { path: String, attempts: usize },
    #[error("document encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The seconds are still owed to `commit.target`; re-apply `commit` to retry.
    #[error("committing {commit} failed: {source}")]
    Commit {
        commit: TimerCommit,
        source: DomainError,
    },
}
