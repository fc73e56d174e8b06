use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::alias::Alias;
use super::dataset::DataSet;
use super::rank::RankingEngine;
use super::score::ScoreError;

const BUCKETS: usize = 10;

/// What a cohort is ordered by before bucketing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileBasis {
    #[default]
    Weighted,
    Rank,
}

impl FromStr for PercentileBasis {
    type Err = PercentileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "weighted" | "score" | "weighted_score" => Ok(Self::Weighted),
            "rank" => Ok(Self::Rank),
            other => Err(PercentileError::UnknownBasis(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileMember {
    pub alias: Alias,
    pub value: f64,
}

/// One 10%-wide slice of a cohort. `pct` is the upper edge: 10 holds the top tenth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileBucket {
    pub pct: u32,
    pub count: usize,
    pub members: Vec<PercentileMember>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PercentileError {
    #[error("role not found: {0}")]
    UnknownRole(String),
    #[error("unknown percentile basis '{0}', expected 'weighted' or 'rank'")]
    UnknownBasis(String),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileEngine {
    ranking: RankingEngine,
}

impl PercentileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ten buckets for `role`, labeled 10 through 100, empty buckets included.
    pub fn bucket(
        &self,
        dataset: &DataSet,
        role: &str,
        basis: PercentileBasis,
    ) -> Result<Vec<PercentileBucket>, PercentileError> {
        if !dataset.has_role(role) {
            return Err(PercentileError::UnknownRole(role.to_string()));
        }

        // Ranked rows already follow score descending, alias ascending, which is also
        // rank ascending with the same tie-break.
        let rows = self.ranking.rank_role(dataset, role)?;
        let total = rows.len();

        let mut buckets: Vec<PercentileBucket> = (1..=BUCKETS)
            .map(|slot| PercentileBucket {
                pct: (slot * 10) as u32,
                count: 0,
                members: Vec::new(),
            })
            .collect();

        for (index, row) in rows.into_iter().enumerate() {
            let slot = bucket_slot(index + 1, total);
            let value = match basis {
                PercentileBasis::Weighted => row.weighted_score,
                PercentileBasis::Rank => f64::from(row.rank),
            };
            let bucket = &mut buckets[slot - 1];
            bucket.count += 1;
            bucket.members.push(PercentileMember {
                alias: row.alias,
                value,
            });
        }

        Ok(buckets)
    }

    /// Buckets for every role, keyed by role.
    pub fn bucket_all(
        &self,
        dataset: &DataSet,
        basis: PercentileBasis,
    ) -> Result<BTreeMap<String, Vec<PercentileBucket>>, PercentileError> {
        dataset
            .roles()
            .map(|role| Ok((role.to_string(), self.bucket(dataset, role, basis)?)))
            .collect()
    }
}

/// `ceil(10 * position / total)` for a 1-indexed position, clamped to 1..=10.
fn bucket_slot(position: usize, total: usize) -> usize {
    let slot = (BUCKETS * position).div_ceil(total.max(1));
    slot.clamp(1, BUCKETS)
}
