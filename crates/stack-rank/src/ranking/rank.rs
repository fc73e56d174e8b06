use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use super::adjustment::{AdjustmentError, AdjustmentPlan, Direction, TargetGuard};
use super::alias::Alias;
use super::dataset::{DataSet, Metric};
use super::score::{ScoreEngine, ScoreError};

/// One member's standing inside their role cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRow {
    pub alias: Alias,
    pub role: String,
    pub weighted_score: f64,
    pub rank: u32,
    pub expected_rank: Option<u32>,
    pub mismatch: bool,
}

impl RankingRow {
    /// Distance between computed and expected rank; zero when no expectation is set.
    pub fn rank_gap(&self) -> u32 {
        self.expected_rank
            .map(|expected| expected.abs_diff(self.rank))
            .unwrap_or(0)
    }
}

/// Cohort-scoped dense ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankingEngine {
    scores: ScoreEngine,
}

impl RankingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank every requested role (all roles when `roles` is `None`), roles ascending.
    ///
    /// Roles with no members produce no rows.
    pub fn rank(
        &self,
        dataset: &DataSet,
        roles: Option<&BTreeSet<String>>,
    ) -> Result<Vec<RankingRow>, ScoreError> {
        let mut rows = Vec::with_capacity(dataset.member_count());
        for role in dataset.roles() {
            if roles.is_some_and(|filter| !filter.contains(role)) {
                continue;
            }
            rows.extend(self.rank_role(dataset, role)?);
        }
        Ok(rows)
    }

    /// Rank a single cohort: weighted score descending, alias ascending on exact ties.
    ///
    /// Ties are detected with exact `f64` equality. Scores are accumulated in a fixed
    /// metric order, so identical inputs always give identical sums and identical ranks.
    pub fn rank_role(&self, dataset: &DataSet, role: &str) -> Result<Vec<RankingRow>, ScoreError> {
        let mut scored = Vec::new();
        for member in dataset.cohort(role) {
            let score = self.scores.weighted_score(dataset, &member.alias)?;
            scored.push((member, score));
        }

        scored.sort_by(|(left, left_score), (right, right_score)| {
            right_score
                .partial_cmp(left_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.alias.cmp(&right.alias))
        });

        let mut rows = Vec::with_capacity(scored.len());
        let mut rank = 0u32;
        let mut previous: Option<f64> = None;
        for (member, score) in scored {
            if previous != Some(score) {
                rank += 1;
                previous = Some(score);
            }
            let expected_rank = dataset.expected_rank(&member.alias);
            rows.push(RankingRow {
                alias: member.alias.clone(),
                role: member.role.clone(),
                weighted_score: score,
                rank,
                expected_rank,
                mismatch: expected_rank.is_some_and(|expected| expected != rank),
            });
        }
        Ok(rows)
    }

    /// Mismatching rows: role ascending, largest rank gap first, then alias.
    pub fn mismatches(&self, dataset: &DataSet) -> Result<Vec<RankingRow>, ScoreError> {
        let mut rows: Vec<RankingRow> = self
            .rank(dataset, None)?
            .into_iter()
            .filter(|row| row.mismatch)
            .collect();
        rows.sort_by(|left, right| {
            left.role
                .cmp(&right.role)
                .then_with(|| right.rank_gap().cmp(&left.rank_gap()))
                .then_with(|| left.alias.cmp(&right.alias))
        });
        Ok(rows)
    }

    /// Metrics carrying a positive weight for `role`, in source order.
    pub fn applicable_metrics<'a>(&self, dataset: &'a DataSet, role: &str) -> Vec<&'a Metric> {
        dataset
            .metrics()
            .iter()
            .filter(|metric| metric.applies_to(role))
            .collect()
    }

    /// Cohort member at exactly `target_rank`, or failing that the first one ranked below it.
    ///
    /// `rows` must be a single cohort in ranked order. The subject is never its own reference.
    pub fn reference_member<'a>(
        rows: &'a [RankingRow],
        subject: &Alias,
        target_rank: u32,
    ) -> Option<&'a RankingRow> {
        rows.iter()
            .find(|row| row.rank == target_rank && &row.alias != subject)
            .or_else(|| {
                rows.iter()
                    .find(|row| row.rank >= target_rank && &row.alias != subject)
            })
    }

    /// One-level plan for moving `subject` toward its expected rank.
    ///
    /// The reference is the member one rank step away in the needed direction. A guard from
    /// the tier beyond the reference keeps a single adjustment from jumping two tiers.
    pub fn plan_adjustment(
        &self,
        rows: &[RankingRow],
        subject: &Alias,
        tier_gap: f64,
    ) -> Result<AdjustmentPlan, AdjustmentError> {
        let row = rows
            .iter()
            .find(|row| &row.alias == subject)
            .ok_or_else(|| AdjustmentError::UnknownMember(subject.clone()))?;
        let expected_rank = row
            .expected_rank
            .ok_or_else(|| AdjustmentError::NoExpectedRank(subject.clone()))?;
        let direction = Direction::between(row.rank, expected_rank).ok_or_else(|| {
            AdjustmentError::AlreadyAtExpectedRank {
                alias: subject.clone(),
                rank: row.rank,
            }
        })?;

        let target_rank = match direction {
            Direction::Up => row.rank.saturating_sub(1).max(1),
            Direction::Down => row.rank + 1,
        };
        let reference = Self::reference_member(rows, subject, target_rank).ok_or_else(|| {
            AdjustmentError::NoReferenceMember {
                alias: subject.clone(),
                target_rank,
            }
        })?;

        let guard = match direction {
            Direction::Up if target_rank > 1 => {
                Self::reference_member(rows, subject, target_rank - 1)
                    .filter(|beyond| beyond.rank < reference.rank)
                    .map(|beyond| TargetGuard {
                        member: beyond.alias.clone(),
                        limit: beyond.weighted_score - tier_gap,
                    })
            }
            Direction::Up => None,
            Direction::Down => Self::reference_member(rows, subject, target_rank + 1)
                .filter(|beyond| beyond.rank > reference.rank)
                .map(|beyond| TargetGuard {
                    member: beyond.alias.clone(),
                    limit: beyond.weighted_score + tier_gap,
                }),
        };

        Ok(AdjustmentPlan {
            member: subject.clone(),
            role: row.role.clone(),
            current_rank: row.rank,
            expected_rank,
            target_rank,
            direction,
            reference: reference.alias.clone(),
            guard,
        })
    }
}
