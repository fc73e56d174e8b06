use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::alias::Alias;
use super::dataset::{DataSet, ScoreChangeError};
use super::rank::RankingEngine;
use super::score::{ScoreEngine, ScoreError};

/// Remaining weighted delta below which another pass changes nothing meaningful.
const CONVERGED_EPSILON: f64 = 1e-9;

/// Solver knobs. `default_percent` is in percent units (5.0 = 5%) as callers pass it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentSettings {
    pub max_passes: usize,
    pub tolerance: f64,
    pub tier_gap: f64,
    pub default_percent: f64,
}

impl Default for AdjustmentSettings {
    fn default() -> Self {
        Self {
            max_passes: 3,
            tolerance: 0.005,
            tier_gap: 0.01,
            default_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// `Up` when `current` is numerically worse than `expected`, `None` when they match.
    pub fn between(current: u32, expected: u32) -> Option<Self> {
        match current.cmp(&expected) {
            std::cmp::Ordering::Greater => Some(Self::Up),
            std::cmp::Ordering::Less => Some(Self::Down),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Score bound derived from the tier beyond the reference.
///
/// For `Up` the target may not exceed `limit`; for `Down` it may not fall below it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetGuard {
    pub member: Alias,
    pub limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentPlan {
    pub member: Alias,
    pub role: String,
    pub current_rank: u32,
    pub expected_rank: u32,
    pub target_rank: u32,
    pub direction: Direction,
    pub reference: Alias,
    pub guard: Option<TargetGuard>,
}

/// Input to `AdjustmentSolver::propose`. `percent` is a fraction (0.05 = 5%).
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentRequest {
    pub member: Alias,
    pub reference: Alias,
    pub selected_metrics: Vec<String>,
    pub percent: f64,
    pub guard: Option<TargetGuard>,
}

impl AdjustmentRequest {
    pub fn from_plan(plan: &AdjustmentPlan, selected_metrics: Vec<String>, percent: f64) -> Self {
        Self {
            member: plan.member.clone(),
            reference: plan.reference.clone(),
            selected_metrics,
            percent,
            guard: plan.guard.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDiff {
    pub metric: String,
    pub old: f64,
    pub new: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentProposal {
    pub alias: Alias,
    pub role: String,
    pub reference: Alias,
    pub direction: Direction,
    pub current_rank: u32,
    pub expected_rank: u32,
    pub current_weighted_score: f64,
    pub reference_weighted_score: f64,
    pub target_weighted_score: f64,
    pub achieved_weighted_score: f64,
    pub proposed_scores: BTreeMap<String, f64>,
    pub diff: Vec<MetricDiff>,
    pub hit_clamps: Vec<String>,
    pub fully_achieved: bool,
    pub passes: usize,
}

/// Rank movement a set of changes would cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankShift {
    pub before: u32,
    pub after: u32,
    pub within_one_level: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdjustmentError {
    #[error("member not found: {0}")]
    UnknownMember(Alias),
    #[error("metric not found: {0}")]
    UnknownMetric(String),
    #[error("no metrics selected for adjustment")]
    EmptySelection,
    #[error("every selected metric has zero weight for role '{role}'")]
    ZeroWeightSelection { role: String },
    #[error("metric '{metric}' does not apply to role '{role}'")]
    InapplicableMetric { metric: String, role: String },
    #[error("percent must be a finite value greater than 0 and below 1, got {0}")]
    InvalidPercent(f64),
    #[error("reference '{reference}' is not in the '{role}' cohort")]
    ReferenceOutsideCohort { reference: Alias, role: String },
    #[error("member '{0}' cannot be its own reference")]
    SelfReference(Alias),
    #[error("member '{0}' has no expected rank")]
    NoExpectedRank(Alias),
    #[error("member '{alias}' is already at expected rank {rank}")]
    AlreadyAtExpectedRank { alias: Alias, rank: u32 },
    #[error("no reference member at or below rank {target_rank} for '{alias}'")]
    NoReferenceMember { alias: Alias, target_rank: u32 },
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Change(#[from] ScoreChangeError),
}

struct WorkingMetric {
    name: String,
    weight: f64,
    min: f64,
    max: f64,
    original: f64,
    proposed: f64,
}

/// Proportional, bounded score redistribution toward a target weighted score.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustmentSolver {
    settings: AdjustmentSettings,
    ranking: RankingEngine,
    scores: ScoreEngine,
}

impl AdjustmentSolver {
    pub fn new(settings: AdjustmentSettings) -> Self {
        Self {
            settings,
            ranking: RankingEngine::new(),
            scores: ScoreEngine,
        }
    }

    pub fn settings(&self) -> &AdjustmentSettings {
        &self.settings
    }

    /// Proposed raw scores for the selected metrics. Nothing is persisted.
    pub fn propose(
        &self,
        dataset: &DataSet,
        request: &AdjustmentRequest,
    ) -> Result<AdjustmentProposal, AdjustmentError> {
        let member = dataset
            .member(&request.member)
            .ok_or_else(|| AdjustmentError::UnknownMember(request.member.clone()))?;
        let reference = dataset
            .member(&request.reference)
            .ok_or_else(|| AdjustmentError::UnknownMember(request.reference.clone()))?;
        if reference.alias == member.alias {
            return Err(AdjustmentError::SelfReference(member.alias.clone()));
        }
        if reference.role != member.role {
            return Err(AdjustmentError::ReferenceOutsideCohort {
                reference: reference.alias.clone(),
                role: member.role.clone(),
            });
        }

        let mut working = self.select_metrics(dataset, &member.alias, &member.role, request)?;

        let percent = request.percent;
        if !percent.is_finite() || percent <= 0.0 || percent >= 1.0 {
            return Err(AdjustmentError::InvalidPercent(percent));
        }

        let rows = self.ranking.rank_role(dataset, &member.role)?;
        let subject = rows
            .iter()
            .find(|row| row.alias == member.alias)
            .ok_or_else(|| AdjustmentError::UnknownMember(member.alias.clone()))?;
        let expected_rank = subject
            .expected_rank
            .ok_or_else(|| AdjustmentError::NoExpectedRank(member.alias.clone()))?;
        let direction = Direction::between(subject.rank, expected_rank).ok_or_else(|| {
            AdjustmentError::AlreadyAtExpectedRank {
                alias: member.alias.clone(),
                rank: subject.rank,
            }
        })?;

        let current = subject.weighted_score;
        let reference_score = self.scores.weighted_score(dataset, &reference.alias)?;
        let mut target = match direction {
            Direction::Up => reference_score * (1.0 + percent),
            Direction::Down => reference_score * (1.0 - percent),
        };
        if let Some(guard) = &request.guard {
            target = match direction {
                Direction::Up => target.min(guard.limit),
                Direction::Down => target.max(guard.limit),
            };
        }

        let needed = target - current;
        // A zero-range metric cannot move, so it never takes a share of any pass.
        let mut clamped: BTreeSet<usize> = working
            .iter()
            .enumerate()
            .filter(|(_, metric)| metric.min == metric.max)
            .map(|(index, _)| index)
            .collect();
        let mut remaining = needed;
        let mut passes = 0;

        while passes < self.settings.max_passes {
            if remaining.abs() <= CONVERGED_EPSILON {
                break;
            }
            let available: f64 = working
                .iter()
                .enumerate()
                .filter(|(index, _)| !clamped.contains(index))
                .map(|(_, metric)| metric.weight)
                .sum();
            if available <= 0.0 {
                break;
            }
            passes += 1;

            for (index, metric) in working.iter_mut().enumerate() {
                if clamped.contains(&index) {
                    continue;
                }
                let share = remaining * metric.weight / available;
                let candidate = metric.proposed + share / metric.weight;
                let bounded = candidate.clamp(metric.min, metric.max);
                if bounded != candidate {
                    clamped.insert(index);
                }
                metric.proposed = bounded;
            }

            let achieved: f64 = working
                .iter()
                .map(|metric| (metric.proposed - metric.original) * metric.weight)
                .sum();
            remaining = needed - achieved;
            debug!(
                alias = %member.alias,
                pass = passes,
                achieved,
                remaining,
                clamped = clamped.len(),
                "adjustment pass complete"
            );
        }

        let proposed_scores: BTreeMap<String, f64> = working
            .iter()
            .map(|metric| (metric.name.clone(), metric.proposed))
            .collect();
        let achieved = self
            .scores
            .weighted_score_with(dataset, &member.alias, &proposed_scores)?;
        let fully_achieved = (achieved - target).abs() <= self.settings.tolerance * target.abs();

        let hit_clamps = clamped
            .iter()
            .map(|index| working[*index].name.clone())
            .collect();
        let diff = working
            .iter()
            .map(|metric| MetricDiff {
                metric: metric.name.clone(),
                old: metric.original,
                new: metric.proposed,
                delta: metric.proposed - metric.original,
            })
            .collect();

        Ok(AdjustmentProposal {
            alias: member.alias.clone(),
            role: member.role.clone(),
            reference: reference.alias.clone(),
            direction,
            current_rank: subject.rank,
            expected_rank,
            current_weighted_score: current,
            reference_weighted_score: reference_score,
            target_weighted_score: target,
            achieved_weighted_score: achieved,
            proposed_scores,
            diff,
            hit_clamps,
            fully_achieved,
            passes,
        })
    }

    /// Simulates `changes` on a copy of the snapshot and compares the member's rank.
    pub fn check_one_level(
        &self,
        dataset: &DataSet,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<RankShift, AdjustmentError> {
        let member = dataset
            .member(alias)
            .ok_or_else(|| AdjustmentError::UnknownMember(alias.clone()))?;
        let before = self.rank_of(dataset, &member.role, alias)?;
        let simulated = dataset.with_scores(alias, changes)?;
        let after = self.rank_of(&simulated, &member.role, alias)?;

        Ok(RankShift {
            before,
            after,
            within_one_level: before.abs_diff(after) <= 1,
        })
    }

    fn rank_of(&self, dataset: &DataSet, role: &str, alias: &Alias) -> Result<u32, AdjustmentError> {
        self.ranking
            .rank_role(dataset, role)?
            .into_iter()
            .find(|row| &row.alias == alias)
            .map(|row| row.rank)
            .ok_or_else(|| AdjustmentError::UnknownMember(alias.clone()))
    }

    /// Resolves the selection in metric order, rejecting anything the solver cannot move.
    fn select_metrics(
        &self,
        dataset: &DataSet,
        alias: &Alias,
        role: &str,
        request: &AdjustmentRequest,
    ) -> Result<Vec<WorkingMetric>, AdjustmentError> {
        if request.selected_metrics.is_empty() {
            return Err(AdjustmentError::EmptySelection);
        }

        let mut positions = BTreeSet::new();
        for name in &request.selected_metrics {
            let position = dataset
                .metric_position(name.trim())
                .ok_or_else(|| AdjustmentError::UnknownMetric(name.clone()))?;
            positions.insert(position);
        }

        let metrics = dataset.metrics();
        if positions
            .iter()
            .all(|position| !metrics[*position].applies_to(role))
        {
            return Err(AdjustmentError::ZeroWeightSelection {
                role: role.to_string(),
            });
        }

        let mut working = Vec::with_capacity(positions.len());
        for position in positions {
            let metric = &metrics[position];
            if !metric.applies_to(role) {
                return Err(AdjustmentError::InapplicableMetric {
                    metric: metric.name.clone(),
                    role: role.to_string(),
                });
            }
            let original =
                dataset
                    .score(alias, position)
                    .ok_or_else(|| ScoreError::MissingScore {
                        alias: alias.clone(),
                        metric: metric.name.clone(),
                    })?;
            working.push(WorkingMetric {
                name: metric.name.clone(),
                weight: metric.weight_for(role),
                min: metric.min,
                max: metric.max,
                original,
                proposed: original,
            });
        }
        Ok(working)
    }
}
