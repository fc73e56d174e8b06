use std::collections::BTreeMap;

use super::alias::Alias;
use super::dataset::DataSet;

/// Failure computing a weighted score.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("member not found: {0}")]
    UnknownMember(Alias),
    #[error("member '{alias}' has no score for applicable metric '{metric}'")]
    MissingScore { alias: Alias, metric: String },
}

/// Stateless weighted-score calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreEngine;

impl ScoreEngine {
    /// Σ score × weight over the metrics that apply to the member's role.
    ///
    /// Zero-weight metrics are skipped without reading the score. Accumulation follows the
    /// DataSet's metric order so identical inputs always produce the identical `f64`.
    pub fn weighted_score(&self, dataset: &DataSet, alias: &Alias) -> Result<f64, ScoreError> {
        self.weighted_score_with(dataset, alias, &BTreeMap::new())
    }

    /// Same as `weighted_score`, reading `overrides` (metric name → raw value) first.
    pub fn weighted_score_with(
        &self,
        dataset: &DataSet,
        alias: &Alias,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<f64, ScoreError> {
        let member = dataset
            .member(alias)
            .ok_or_else(|| ScoreError::UnknownMember(alias.clone()))?;

        let mut total = 0.0;
        for (position, metric) in dataset.metrics().iter().enumerate() {
            let weight = metric.weight_for(&member.role);
            if weight <= 0.0 {
                continue;
            }
            let raw = match overrides.get(&metric.name) {
                Some(value) => *value,
                None => dataset
                    .score(alias, position)
                    .ok_or_else(|| ScoreError::MissingScore {
                        alias: alias.clone(),
                        metric: metric.name.clone(),
                    })?,
            };
            total += raw * weight;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::dataset::{DataSetDraft, DataSetLimits};

    fn dataset() -> DataSet {
        let draft = DataSetDraft::default()
            .member("Dev01", "Dev")
            .member("QA01", "QA")
            .metric("Delivery", 0.0, 10.0, &[("Dev", 2.0), ("QA", 0.0)])
            .metric("Testing", 0.0, 10.0, &[("Dev", 1.0), ("QA", 3.0)])
            .score("Dev01", "Delivery", 4.0)
            .score("Dev01", "Testing", 5.0)
            .blank_score("QA01", "Delivery")
            .score("QA01", "Testing", 2.0);
        DataSet::build(draft, &DataSetLimits::default()).expect("valid")
    }

    #[test]
    fn sums_applicable_metrics() {
        let score = ScoreEngine
            .weighted_score(&dataset(), &Alias::new("dev01"))
            .expect("score computes");
        assert_eq!(score, 13.0);
    }

    #[test]
    fn zero_weight_metric_with_missing_score_is_skipped() {
        let score = ScoreEngine
            .weighted_score(&dataset(), &Alias::new("qa01"))
            .expect("blank cell on non-applicable metric is ignored");
        assert_eq!(score, 6.0);
    }

    #[test]
    fn missing_applicable_score_never_reaches_the_engine() {
        let draft = DataSetDraft::default()
            .member("Dev01", "Dev")
            .metric("Delivery", 0.0, 10.0, &[("Dev", 1.0)])
            .blank_score("Dev01", "Delivery");
        let report = DataSet::build(draft, &DataSetLimits::default()).expect_err("rejected");

        assert_eq!(
            report.findings,
            vec![crate::ranking::ValidationFinding::MissingScore {
                alias: "dev01".to_string(),
                role: "Dev".to_string(),
                metric: "Delivery".to_string(),
            }]
        );
    }

    #[test]
    fn overrides_replace_recorded_scores() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Delivery".to_string(), 10.0);
        let score = ScoreEngine
            .weighted_score_with(&dataset(), &Alias::new("dev01"), &overrides)
            .expect("score computes");
        assert_eq!(score, 25.0);
    }
}
