use std::collections::BTreeMap;

use super::alias::Alias;
use super::dataset::{DataSet, ScoreChangeError};
use super::validation::ValidationReport;

/// Backing store for the three tables, so the service can run against files or memory.
pub trait ScoreStore: Send + Sync {
    /// Reads and validates every table into a fresh snapshot.
    fn load(&self) -> Result<DataSet, StoreError>;

    /// Applies `changes` to one member, recomputes the bounds of the touched metrics over
    /// the whole population, persists, and returns the snapshot that was written.
    fn write_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError>;

    /// Whether the backing data changed since this store last loaded or wrote it.
    fn has_external_changes(&self) -> Result<bool, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Validation(#[from] ValidationReport),
    #[error(transparent)]
    Change(#[from] ScoreChangeError),
    #[error("data changed on disk since it was last loaded; reload and retry")]
    Conflict,
    #[error("another writer holds the data lock; retry shortly")]
    Locked,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Conflicts and lock contention clear up on their own; callers may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::Locked)
    }
}
