//! Cohort ranking, percentile bucketing and the score-adjustment solver.
//!
//! Engines are synchronous and pure over an immutable `DataSet`; `RankingService` owns the
//! swappable snapshot and the store, and `ranking_router` exposes it over HTTP.

pub mod adjustment;
pub mod alias;
pub mod dataset;
pub mod percentile;
pub mod rank;
pub mod repository;
pub mod router;
pub mod score;
pub mod service;
pub(crate) mod snapshot;
pub mod validation;

#[cfg(test)]
mod tests;

pub use adjustment::{
    AdjustmentError, AdjustmentPlan, AdjustmentProposal, AdjustmentRequest, AdjustmentSettings,
    AdjustmentSolver, Direction, MetricDiff, RankShift, TargetGuard,
};
pub use alias::Alias;
pub use dataset::{
    DataSet, DataSetDraft, DataSetLimits, DraftExpectedRank, DraftMember, DraftMetric, Member,
    Metric, ScoreChangeError,
};
pub use percentile::{
    PercentileBasis, PercentileBucket, PercentileEngine, PercentileError, PercentileMember,
};
pub use rank::{RankingEngine, RankingRow};
pub use repository::{ScoreStore, StoreError};
pub use router::{error_response, ranking_router};
pub use score::{ScoreEngine, ScoreError};
pub use service::{
    AdjustmentPreview, AppliedAdjustment, RankingService, RankingServiceError, ReloadSummary,
    RolesView, ScoreMatrix, ScoreRow, MAX_PERCENT, MIN_PERCENT,
};
pub use validation::{Table, ValidationFinding, ValidationReport};
