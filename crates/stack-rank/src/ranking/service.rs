use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::adjustment::{
    AdjustmentError, AdjustmentProposal, AdjustmentRequest, AdjustmentSettings, AdjustmentSolver,
    RankShift, TargetGuard,
};
use super::alias::Alias;
use super::dataset::{DataSet, Member, Metric, ScoreChangeError};
use super::percentile::{PercentileBasis, PercentileBucket, PercentileEngine, PercentileError};
use super::rank::{RankingEngine, RankingRow};
use super::repository::{ScoreStore, StoreError};
use super::score::ScoreError;
use super::snapshot::SnapshotCell;

/// Accepted `percent` range for previews, in percent units.
pub const MIN_PERCENT: f64 = 0.1;
pub const MAX_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolesView {
    pub roles: Vec<String>,
    pub counts_by_role: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub alias: Alias,
    pub role: String,
    pub scores: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreMatrix {
    pub metrics: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

/// Solver output together with the one-level plan that produced its reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentPreview {
    pub target_rank: u32,
    pub guard: Option<TargetGuard>,
    pub percent: f64,
    #[serde(flatten)]
    pub proposal: AdjustmentProposal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedAdjustment {
    pub ok: bool,
    pub updated_at: DateTime<Utc>,
    pub rankings: Vec<RankingRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub members: usize,
    pub metrics: usize,
    pub roles: usize,
}

impl ReloadSummary {
    fn of(dataset: &DataSet) -> Self {
        Self {
            members: dataset.member_count(),
            metrics: dataset.metrics().len(),
            roles: dataset.roles().count(),
        }
    }
}

/// Service composing the store, the cached snapshot, and the ranking engines.
pub struct RankingService<S> {
    store: Arc<S>,
    snapshot: SnapshotCell,
    /// Held across a store write or load and the snapshot swap that follows it, so
    /// snapshots are installed in the order the store produced them.
    writes: Mutex<()>,
    ranking: RankingEngine,
    percentiles: PercentileEngine,
    solver: AdjustmentSolver,
}

impl<S> RankingService<S>
where
    S: ScoreStore + 'static,
{
    /// Loads the initial snapshot from `store`.
    pub fn new(store: Arc<S>, settings: AdjustmentSettings) -> Result<Self, RankingServiceError> {
        let dataset = store.load()?;
        info!(
            members = dataset.member_count(),
            metrics = dataset.metrics().len(),
            "ranking data loaded"
        );
        Ok(Self::with_dataset(store, dataset, settings))
    }

    pub fn with_dataset(store: Arc<S>, dataset: DataSet, settings: AdjustmentSettings) -> Self {
        Self {
            store,
            snapshot: SnapshotCell::new(dataset),
            writes: Mutex::new(()),
            ranking: RankingEngine::new(),
            percentiles: PercentileEngine::new(),
            solver: AdjustmentSolver::new(settings),
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Arc<DataSet> {
        self.snapshot.load()
    }

    pub fn settings(&self) -> &AdjustmentSettings {
        self.solver.settings()
    }

    pub fn roles(&self) -> RolesView {
        let dataset = self.snapshot.load();
        RolesView {
            roles: dataset.roles().map(str::to_string).collect(),
            counts_by_role: dataset.role_counts(),
        }
    }

    pub fn members(&self) -> Vec<Member> {
        self.snapshot.load().members().cloned().collect()
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.snapshot.load().metrics().to_vec()
    }

    pub fn scores(&self) -> ScoreMatrix {
        let dataset = self.snapshot.load();
        let rows = dataset
            .members()
            .map(|member| ScoreRow {
                alias: member.alias.clone(),
                role: member.role.clone(),
                scores: dataset
                    .metrics()
                    .iter()
                    .enumerate()
                    .map(|(position, metric)| {
                        (metric.name.clone(), dataset.score(&member.alias, position))
                    })
                    .collect(),
            })
            .collect();
        ScoreMatrix {
            metrics: dataset.metrics().iter().map(|m| m.name.clone()).collect(),
            rows,
        }
    }

    pub fn compute_rankings(
        &self,
        roles: Option<&BTreeSet<String>>,
    ) -> Result<Vec<RankingRow>, RankingServiceError> {
        let dataset = self.snapshot.load();
        Ok(self.ranking.rank(&dataset, roles)?)
    }

    pub fn mismatches(&self) -> Result<Vec<RankingRow>, RankingServiceError> {
        let dataset = self.snapshot.load();
        Ok(self.ranking.mismatches(&dataset)?)
    }

    /// Buckets for one role, or for every role when `role` is `None`.
    pub fn compute_percentiles(
        &self,
        role: Option<&str>,
        basis: PercentileBasis,
    ) -> Result<BTreeMap<String, Vec<PercentileBucket>>, RankingServiceError> {
        let dataset = self.snapshot.load();
        let buckets = match role {
            Some(role) => {
                let buckets = self.percentiles.bucket(&dataset, role, basis)?;
                BTreeMap::from([(role.to_string(), buckets)])
            }
            None => self.percentiles.bucket_all(&dataset, basis)?,
        };
        Ok(buckets)
    }

    /// Plans a one-level move for `alias` and runs the solver. Nothing is persisted.
    ///
    /// `percent` is in percent units; `None` uses the configured default.
    pub fn preview_adjustment(
        &self,
        alias: &Alias,
        selected_metrics: Vec<String>,
        percent: Option<f64>,
    ) -> Result<AdjustmentPreview, RankingServiceError> {
        let percent = percent.unwrap_or(self.settings().default_percent);
        if !(MIN_PERCENT..=MAX_PERCENT).contains(&percent) {
            return Err(AdjustmentError::InvalidPercent(percent).into());
        }

        let dataset = self.snapshot.load();
        let member = dataset
            .member(alias)
            .ok_or_else(|| AdjustmentError::UnknownMember(alias.clone()))?;
        let rows = self.ranking.rank_role(&dataset, &member.role)?;
        let plan = self
            .ranking
            .plan_adjustment(&rows, alias, self.settings().tier_gap)?;

        let request = AdjustmentRequest::from_plan(&plan, selected_metrics, percent / 100.0);
        let proposal = self.solver.propose(&dataset, &request)?;

        Ok(AdjustmentPreview {
            target_rank: plan.target_rank,
            guard: plan.guard,
            percent,
            proposal,
        })
    }

    pub fn check_one_level(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<RankShift, RankingServiceError> {
        let dataset = self.snapshot.load();
        Ok(self.solver.check_one_level(&dataset, alias, changes)?)
    }

    /// Persists `changes` through the store and serves the written snapshot.
    pub fn apply_adjustment(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<AppliedAdjustment, RankingServiceError> {
        if changes.is_empty() {
            return Err(RankingServiceError::EmptyChanges);
        }
        let current = self.snapshot.load();
        // Reject bad input before the store takes its lock.
        current.with_scores(alias, changes)?;

        let writes = self.write_guard();
        let written = match self.store.write_scores(alias, changes) {
            Ok(dataset) => dataset,
            Err(error) => {
                if error.is_retryable() {
                    warn!(alias = %alias, %error, "score write rejected");
                }
                return Err(error.into());
            }
        };
        let dataset = self.snapshot.replace(written);
        drop(writes);
        info!(alias = %alias, metrics = changes.len(), "scores written");

        let rankings = self.ranking.rank(&dataset, None)?;
        Ok(AppliedAdjustment {
            ok: true,
            updated_at: Utc::now(),
            rankings,
        })
    }

    /// Replaces the snapshot with a fresh load. A failed load keeps the current one.
    pub fn reload(&self) -> Result<ReloadSummary, RankingServiceError> {
        let _writes = self.write_guard();
        let dataset = match self.store.load() {
            Ok(dataset) => dataset,
            Err(error) => {
                warn!(%error, "reload rejected; keeping current snapshot");
                return Err(error.into());
            }
        };
        let summary = ReloadSummary::of(&dataset);
        self.snapshot.replace(dataset);
        info!(
            members = summary.members,
            metrics = summary.metrics,
            roles = summary.roles,
            "ranking data reloaded"
        );
        Ok(summary)
    }

    /// Reloads only when the store reports an outside change. Returns whether it did.
    pub fn refresh_if_modified(&self) -> Result<bool, RankingServiceError> {
        if !self.store.has_external_changes()? {
            return Ok(false);
        }
        info!("external data change detected");
        self.reload().map(|_| true)
    }
}

/// Error raised by the ranking service.
#[derive(Debug, thiserror::Error)]
pub enum RankingServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Percentile(#[from] PercentileError),
    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),
    #[error(transparent)]
    Change(#[from] ScoreChangeError),
    #[error("no score changes supplied")]
    EmptyChanges,
}
