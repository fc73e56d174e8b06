//! CSV-backed `ScoreStore` over a data directory holding `Roles.csv`, `Scores.csv` and an
//! optional `ExpectedRanking.csv`.

mod parser;
mod writer;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::ranking::{
    Alias, DataSet, DataSetLimits, ScoreStore, StoreError, Table, ValidationFinding,
    ValidationReport,
};

pub const ROLES_FILE: &str = "Roles.csv";
pub const SCORES_FILE: &str = "Scores.csv";
pub const EXPECTED_FILE: &str = "ExpectedRanking.csv";
pub const LOCK_FILE: &str = ".stack-rank.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Length and mtime of each table; `None` for a table that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint([Option<FileStamp>; 3]);

#[derive(Debug, Default)]
struct StoreState {
    fingerprint: Option<Fingerprint>,
}

/// File-backed store. Writes are serialized in-process by a mutex and across processes by
/// an advisory lock on `LOCK_FILE`.
#[derive(Debug)]
pub struct CsvScoreStore {
    data_dir: PathBuf,
    limits: DataSetLimits,
    state: Mutex<StoreState>,
}

impl CsvScoreStore {
    pub fn new(data_dir: impl Into<PathBuf>, limits: DataSetLimits) -> Self {
        Self {
            data_dir: data_dir.into(),
            limits,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fingerprint(&self) -> Result<Fingerprint, StoreError> {
        let mut stamps = [None; 3];
        for (slot, file) in stamps
            .iter_mut()
            .zip([ROLES_FILE, SCORES_FILE, EXPECTED_FILE])
        {
            *slot = match fs::metadata(self.path(file)) {
                Ok(metadata) => Some(FileStamp {
                    len: metadata.len(),
                    modified: metadata.modified().ok(),
                }),
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(err) => return Err(err.into()),
            };
        }
        Ok(Fingerprint(stamps))
    }

    fn read_optional(&self, file: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(file)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads and validates the tables. Returns the Scores text too so a writer can rewrite it.
    fn read_tables(&self) -> Result<(DataSet, String), StoreError> {
        let roles = self.read_optional(ROLES_FILE)?;
        let scores = self.read_optional(SCORES_FILE)?;
        let expected = self.read_optional(EXPECTED_FILE)?;

        let (roles, scores) = match (roles, scores) {
            (Some(roles), Some(scores)) => (roles, scores),
            (roles, scores) => {
                let mut report = ValidationReport::default();
                if roles.is_none() {
                    report.push(ValidationFinding::MissingTable { table: Table::Roles });
                }
                if scores.is_none() {
                    report.push(ValidationFinding::MissingTable {
                        table: Table::Scores,
                    });
                }
                return Err(report.into());
            }
        };

        let draft = parser::read_draft(
            roles.as_bytes(),
            scores.as_bytes(),
            expected.as_deref().map(str::as_bytes),
        )?;
        let dataset = DataSet::build(draft, &self.limits)?;
        Ok((dataset, scores))
    }

    fn acquire_file_lock(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path(LOCK_FILE))?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }
        Ok(file)
    }

    /// Writes next to the target and renames over it so readers never see a partial table.
    fn replace_file(&self, file: &str, contents: &[u8]) -> Result<(), StoreError> {
        let target = self.path(file);
        let staging = self.path(&format!("{file}.tmp"));
        {
            let mut handle = File::create(&staging)?;
            handle.write_all(contents)?;
            handle.sync_all()?;
        }
        fs::rename(&staging, &target)?;
        Ok(())
    }
}

impl ScoreStore for CsvScoreStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        let mut state = self.state();
        // Taken before reading so an edit landing mid-read still counts as a change.
        let fingerprint = self.fingerprint()?;
        let (dataset, _) = self.read_tables()?;
        state.fingerprint = Some(fingerprint);
        info!(
            dir = %self.data_dir.display(),
            members = dataset.member_count(),
            metrics = dataset.metrics().len(),
            "csv tables loaded"
        );
        Ok(dataset)
    }

    fn write_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        let mut state = self.state();
        let lock = self.acquire_file_lock()?;

        let current = self.fingerprint()?;
        if state
            .fingerprint
            .as_ref()
            .is_some_and(|known| *known != current)
        {
            warn!(alias = %alias, "scores changed on disk since last load");
            let _ = lock.unlock();
            return Err(StoreError::Conflict);
        }

        let result = self.read_tables().and_then(|(dataset, scores)| {
            let next = dataset.with_scores(alias, changes)?;
            let touched: BTreeSet<String> = changes.keys().cloned().collect();
            let bytes = writer::rewrite_scores(&scores, &next, alias, &touched)?;
            self.replace_file(SCORES_FILE, &bytes)?;
            Ok(next)
        });

        if result.is_ok() {
            state.fingerprint = Some(self.fingerprint()?);
            debug!(alias = %alias, metrics = changes.len(), "scores table rewritten");
        }
        let _ = lock.unlock();
        result
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        let state = self.state();
        let current = self.fingerprint()?;
        Ok(state.fingerprint.as_ref() != Some(&current))
    }
}
