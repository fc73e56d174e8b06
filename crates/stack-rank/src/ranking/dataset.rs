use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::alias::{normalize_label, Alias};
use super::validation::{Table, ValidationFinding, ValidationReport};

/// A ranked person and the cohort they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub alias: Alias,
    pub role: String,
}

/// Metric definition with per-role weights and the population bounds of its raw scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub weights: BTreeMap<String, f64>,
}

impl Metric {
    /// Weight for `role`; an absent entry reads as "not applicable".
    pub fn weight_for(&self, role: &str) -> f64 {
        self.weights.get(role).copied().unwrap_or(0.0)
    }

    pub fn applies_to(&self, role: &str) -> bool {
        self.weight_for(role) > 0.0
    }

    /// `min == max`: every member sits at the same value and nothing can move.
    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Size ceilings applied during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSetLimits {
    pub max_members: usize,
    pub max_metrics: usize,
    pub max_roles: usize,
}

impl Default for DataSetLimits {
    fn default() -> Self {
        Self {
            max_members: 500,
            max_metrics: 100,
            max_roles: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftMember {
    pub row: usize,
    pub alias: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftMetric {
    pub row: usize,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub weights: BTreeMap<String, f64>,
    /// Keyed by the raw alias as it appeared in the source; `None` is an empty cell.
    pub scores: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftExpectedRank {
    pub row: usize,
    pub alias: String,
    pub role: String,
    pub rank: i64,
}

/// Unvalidated tables as read from a store.
///
/// Readers push cell-level problems (unparseable numbers, missing columns) into
/// `findings`; `DataSet::build` adds the cross-table checks and either returns a complete
/// snapshot or every finding at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSetDraft {
    pub members: Vec<DraftMember>,
    pub metrics: Vec<DraftMetric>,
    pub expected: Vec<DraftExpectedRank>,
    pub findings: Vec<ValidationFinding>,
}

impl DataSetDraft {
    pub fn member(mut self, alias: &str, role: &str) -> Self {
        let row = self.members.len() + 1;
        self.members.push(DraftMember {
            row,
            alias: alias.to_string(),
            role: role.to_string(),
        });
        self
    }

    pub fn metric(mut self, name: &str, min: f64, max: f64, weights: &[(&str, f64)]) -> Self {
        let row = self.metrics.len() + 1;
        self.metrics.push(DraftMetric {
            row,
            name: name.to_string(),
            min,
            max,
            weights: weights
                .iter()
                .map(|(role, weight)| (role.to_string(), *weight))
                .collect(),
            scores: BTreeMap::new(),
        });
        self
    }

    /// Records a score on a metric added earlier; unknown metric names are ignored.
    pub fn score(mut self, alias: &str, metric: &str, value: f64) -> Self {
        if let Some(draft) = self.metrics.iter_mut().find(|draft| draft.name == metric) {
            draft.scores.insert(alias.to_string(), Some(value));
        }
        self
    }

    /// Records an empty score cell for `alias` on `metric`.
    pub fn blank_score(mut self, alias: &str, metric: &str) -> Self {
        if let Some(draft) = self.metrics.iter_mut().find(|draft| draft.name == metric) {
            draft.scores.insert(alias.to_string(), None);
        }
        self
    }

    pub fn expect(mut self, alias: &str, role: &str, rank: i64) -> Self {
        let row = self.expected.len() + 1;
        self.expected.push(DraftExpectedRank {
            row,
            alias: alias.to_string(),
            role: role.to_string(),
            rank,
        });
        self
    }
}

/// Immutable, validated snapshot of members, metrics, scores and expected ranks.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    members: BTreeMap<Alias, Member>,
    roles: BTreeSet<String>,
    metrics: Vec<Metric>,
    metric_index: HashMap<String, usize>,
    /// Indexed by metric position so accumulation always follows the same order.
    scores: BTreeMap<Alias, Vec<Option<f64>>>,
    expected: BTreeMap<Alias, u32>,
}

/// Rejected score change.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreChangeError {
    #[error("member not found: {0}")]
    UnknownMember(Alias),
    #[error("metric not found: {0}")]
    UnknownMetric(String),
    #[error("score for metric '{metric}' must be a finite number")]
    NonFinite { metric: String },
}

impl DataSet {
    pub fn build(draft: DataSetDraft, limits: &DataSetLimits) -> Result<Self, ValidationReport> {
        let DataSetDraft {
            members: draft_members,
            metrics: draft_metrics,
            expected: draft_expected,
            findings,
        } = draft;
        let mut report = ValidationReport::new(findings);

        let mut members = BTreeMap::new();
        let mut member_rows: HashMap<Alias, usize> = HashMap::new();
        for draft in draft_members {
            let alias = Alias::new(&draft.alias);
            let role = normalize_label(&draft.role);
            if alias.is_empty() {
                report.push(ValidationFinding::EmptyAlias {
                    table: Table::Roles,
                    row: draft.row,
                });
                continue;
            }
            if role.is_empty() {
                report.push(ValidationFinding::EmptyRole {
                    row: draft.row,
                    alias: alias.to_string(),
                });
                continue;
            }
            if let Some(first_row) = member_rows.get(&alias) {
                report.push(ValidationFinding::DuplicateMember {
                    alias: alias.to_string(),
                    row: draft.row,
                    first_row: *first_row,
                });
                continue;
            }
            member_rows.insert(alias.clone(), draft.row);
            members.insert(alias.clone(), Member { alias, role });
        }

        let roles: BTreeSet<String> = members.values().map(|member| member.role.clone()).collect();

        let mut metrics = Vec::with_capacity(draft_metrics.len());
        let mut metric_index = HashMap::new();
        let mut metric_rows: HashMap<String, usize> = HashMap::new();
        let mut raw_scores: Vec<BTreeMap<Alias, Option<f64>>> = Vec::new();
        let mut unknown_aliases = BTreeSet::new();
        let mut aliases_with_scores = BTreeSet::new();

        for draft in draft_metrics {
            let name = normalize_label(&draft.name);
            if name.is_empty() {
                report.push(ValidationFinding::EmptyMetricName { row: draft.row });
                continue;
            }
            if let Some(first_row) = metric_rows.get(&name) {
                report.push(ValidationFinding::DuplicateMetric {
                    metric: name,
                    row: draft.row,
                    first_row: *first_row,
                });
                continue;
            }
            metric_rows.insert(name.clone(), draft.row);

            if !(draft.min <= draft.max) {
                report.push(ValidationFinding::InvalidBounds {
                    metric: name.clone(),
                    min: draft.min,
                    max: draft.max,
                });
            }

            let weights: BTreeMap<String, f64> = draft
                .weights
                .iter()
                .map(|(role, weight)| (normalize_label(role), *weight))
                .collect();
            for role in &roles {
                match weights.get(role) {
                    None => report.push(ValidationFinding::MissingRoleWeight {
                        metric: name.clone(),
                        role: role.clone(),
                    }),
                    Some(weight) if !(*weight >= 0.0) || !weight.is_finite() => {
                        report.push(ValidationFinding::NegativeWeight {
                            metric: name.clone(),
                            role: role.clone(),
                            weight: *weight,
                        })
                    }
                    Some(_) => {}
                }
            }

            let mut scores = BTreeMap::new();
            for (raw_alias, value) in draft.scores {
                let alias = Alias::new(&raw_alias);
                if members.contains_key(&alias) {
                    aliases_with_scores.insert(alias.clone());
                    scores.insert(alias, value);
                } else {
                    unknown_aliases.insert(alias);
                }
            }

            metric_index.insert(name.clone(), metrics.len());
            metrics.push(Metric {
                name,
                min: draft.min,
                max: draft.max,
                weights,
            });
            raw_scores.push(scores);
        }

        for alias in unknown_aliases {
            report.push(ValidationFinding::UnknownScoreAlias {
                alias: alias.to_string(),
            });
        }
        if !metrics.is_empty() {
            for alias in members.keys() {
                if !aliases_with_scores.contains(alias) {
                    report.push(ValidationFinding::MemberMissingFromScores {
                        alias: alias.to_string(),
                    });
                }
            }
        }
        // A blank cell on a weighted metric would otherwise surface on every ranking read.
        for (metric, column) in metrics.iter().zip(&raw_scores) {
            for member in members.values() {
                if !metric.applies_to(&member.role) || !aliases_with_scores.contains(&member.alias) {
                    continue;
                }
                if column.get(&member.alias).copied().flatten().is_none() {
                    report.push(ValidationFinding::MissingScore {
                        alias: member.alias.to_string(),
                        role: member.role.clone(),
                        metric: metric.name.clone(),
                    });
                }
            }
        }

        let mut expected = BTreeMap::new();
        for draft in draft_expected {
            let alias = Alias::new(&draft.alias);
            if alias.is_empty() {
                report.push(ValidationFinding::EmptyAlias {
                    table: Table::ExpectedRanking,
                    row: draft.row,
                });
                continue;
            }
            let Some(member) = members.get(&alias) else {
                report.push(ValidationFinding::ExpectedRankUnknownMember {
                    row: draft.row,
                    alias: alias.to_string(),
                });
                continue;
            };
            let listed_role = normalize_label(&draft.role);
            if listed_role != member.role {
                report.push(ValidationFinding::ExpectedRankRoleMismatch {
                    row: draft.row,
                    alias: alias.to_string(),
                    listed_role,
                    member_role: member.role.clone(),
                });
                continue;
            }
            let rank = match u32::try_from(draft.rank) {
                Ok(rank) if rank >= 1 => rank,
                _ => {
                    report.push(ValidationFinding::InvalidExpectedRank {
                        row: draft.row,
                        alias: alias.to_string(),
                        rank: draft.rank,
                    });
                    continue;
                }
            };
            if expected.insert(alias.clone(), rank).is_some() {
                report.push(ValidationFinding::DuplicateExpectedRank {
                    row: draft.row,
                    alias: alias.to_string(),
                });
            }
        }

        for (subject, count, limit) in [
            ("members", members.len(), limits.max_members),
            ("metrics", metrics.len(), limits.max_metrics),
            ("roles", roles.len(), limits.max_roles),
        ] {
            if count > limit {
                report.push(ValidationFinding::LimitExceeded {
                    subject,
                    count,
                    limit,
                });
            }
        }

        if !report.is_empty() {
            return Err(report);
        }

        let scores = members
            .keys()
            .map(|alias| {
                let row = raw_scores
                    .iter()
                    .map(|column| column.get(alias).copied().flatten())
                    .collect();
                (alias.clone(), row)
            })
            .collect();

        Ok(Self {
            members,
            roles,
            metrics,
            metric_index,
            scores,
            expected,
        })
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, alias: &Alias) -> Option<&Member> {
        self.members.get(alias)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members of one role cohort, alias ascending.
    pub fn cohort<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Member> + 'a {
        self.members.values().filter(move |member| member.role == role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn role_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for member in self.members.values() {
            *counts.entry(member.role.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Metrics in their fixed source order.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric_position(&self, name: &str) -> Option<usize> {
        self.metric_index.get(name).copied()
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metric_position(name).map(|index| &self.metrics[index])
    }

    pub fn score(&self, alias: &Alias, metric_position: usize) -> Option<f64> {
        self.scores
            .get(alias)
            .and_then(|row| row.get(metric_position).copied().flatten())
    }

    pub fn score_by_name(&self, alias: &Alias, metric: &str) -> Option<f64> {
        self.metric_position(metric)
            .and_then(|position| self.score(alias, position))
    }

    pub fn expected_rank(&self, alias: &Alias) -> Option<u32> {
        self.expected.get(alias).copied()
    }

    /// Copy of this snapshot with `changes` applied to one member.
    ///
    /// Bounds of every touched metric are recomputed from the whole population afterwards,
    /// matching what a store does after write-back.
    pub fn with_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<Self, ScoreChangeError> {
        if !self.members.contains_key(alias) {
            return Err(ScoreChangeError::UnknownMember(alias.clone()));
        }

        let mut positions = Vec::with_capacity(changes.len());
        for (metric, value) in changes {
            let position = self
                .metric_position(metric)
                .ok_or_else(|| ScoreChangeError::UnknownMetric(metric.clone()))?;
            if !value.is_finite() {
                return Err(ScoreChangeError::NonFinite {
                    metric: metric.clone(),
                });
            }
            positions.push((position, *value));
        }

        let mut next = self.clone();
        if let Some(row) = next.scores.get_mut(alias) {
            for (position, value) in &positions {
                row[*position] = Some(*value);
            }
        }
        for (position, _) in positions {
            next.recompute_bounds(position);
        }
        Ok(next)
    }

    fn recompute_bounds(&mut self, position: usize) {
        let mut observed = self
            .scores
            .values()
            .filter_map(|row| row.get(position).copied().flatten());
        let Some(first) = observed.next() else {
            return;
        };
        let (min, max) = observed.fold((first, first), |(min, max), value| {
            (min.min(value), max.max(value))
        });
        let metric = &mut self.metrics[position];
        metric.min = min;
        metric.max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> DataSetDraft {
        DataSetDraft::default()
            .member("Dev01", "Dev")
            .member("Dev02", "Dev")
            .member("QA01", "QA")
            .metric("Delivery", 0.0, 10.0, &[("Dev", 0.6), ("QA", 0.0)])
            .metric("Testing", 0.0, 10.0, &[("Dev", 0.4), ("QA", 1.0)])
            .score("Dev01", "Delivery", 8.0)
            .score("Dev01", "Testing", 6.0)
            .score("Dev02", "Delivery", 5.0)
            .score("Dev02", "Testing", 9.0)
            .score("QA01", "Delivery", 1.0)
            .score("QA01", "Testing", 7.0)
            .expect("dev01", "Dev", 1)
    }

    #[test]
    fn build_normalizes_aliases_and_indexes_metrics() {
        let dataset = DataSet::build(draft(), &DataSetLimits::default()).expect("valid draft");

        assert_eq!(dataset.member_count(), 3);
        assert_eq!(dataset.roles().collect::<Vec<_>>(), vec!["Dev", "QA"]);
        assert_eq!(dataset.metric_position("Testing"), Some(1));
        assert_eq!(dataset.score_by_name(&Alias::new("DEV02"), "Testing"), Some(9.0));
        assert_eq!(dataset.expected_rank(&Alias::new("Dev01")), Some(1));
        assert_eq!(dataset.role_counts().get("Dev"), Some(&2));
    }

    #[test]
    fn build_collects_every_cross_table_finding() {
        let mut broken = draft()
            .member("dev01", "Dev")
            .metric("Delivery", 0.0, 1.0, &[("Dev", 1.0), ("QA", 1.0)])
            .metric("Reviews", 5.0, 1.0, &[("Dev", 1.0)])
            .score("Ghost", "Reviews", 3.0)
            .expect("Nobody", "Dev", 2)
            .expect("QA01", "Dev", 1)
            .expect("Dev02", "Dev", 0);
        broken.metrics[1].weights.insert("QA".to_string(), -1.0);

        let report = DataSet::build(broken, &DataSetLimits::default()).expect_err("invalid");
        let findings = &report.findings;

        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::DuplicateMember { alias, .. } if alias == "dev01")));
        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::DuplicateMetric { metric, .. } if metric == "Delivery")));
        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::InvalidBounds { metric, .. } if metric == "Reviews")));
        assert!(findings.iter().any(
            |f| matches!(f, ValidationFinding::MissingRoleWeight { metric, role } if metric == "Reviews" && role == "QA")
        ));
        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::NegativeWeight { metric, .. } if metric == "Testing")));
        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::UnknownScoreAlias { alias } if alias == "ghost")));
        assert!(findings.iter().any(
            |f| matches!(f, ValidationFinding::ExpectedRankUnknownMember { alias, .. } if alias == "nobody")
        ));
        assert!(findings.iter().any(
            |f| matches!(f, ValidationFinding::ExpectedRankRoleMismatch { alias, .. } if alias == "qa01")
        ));
        assert!(findings
            .iter()
            .any(|f| matches!(f, ValidationFinding::InvalidExpectedRank { rank: 0, .. })));
    }

    #[test]
    fn member_without_score_column_is_reported() {
        let draft = draft().member("Dev03", "Dev");
        let report = DataSet::build(draft, &DataSetLimits::default()).expect_err("invalid");

        assert_eq!(
            report.findings,
            vec![ValidationFinding::MemberMissingFromScores {
                alias: "dev03".to_string()
            }]
        );
    }

    #[test]
    fn limits_are_enforced() {
        let limits = DataSetLimits {
            max_members: 2,
            max_metrics: 100,
            max_roles: 1,
        };
        let report = DataSet::build(draft(), &limits).expect_err("over limits");

        assert!(report.findings.contains(&ValidationFinding::LimitExceeded {
            subject: "members",
            count: 3,
            limit: 2,
        }));
        assert!(report.findings.contains(&ValidationFinding::LimitExceeded {
            subject: "roles",
            count: 2,
            limit: 1,
        }));
    }

    #[test]
    fn with_scores_recomputes_population_bounds() {
        let dataset = DataSet::build(draft(), &DataSetLimits::default()).expect("valid draft");
        let mut changes = BTreeMap::new();
        changes.insert("Delivery".to_string(), 12.5);

        let next = dataset
            .with_scores(&Alias::new("dev02"), &changes)
            .expect("change applies");

        assert_eq!(next.score_by_name(&Alias::new("dev02"), "Delivery"), Some(12.5));
        let delivery = next.metric("Delivery").expect("metric present");
        assert_eq!((delivery.min, delivery.max), (1.0, 12.5));
        assert_eq!(
            dataset.score_by_name(&Alias::new("dev02"), "Delivery"),
            Some(5.0),
            "original snapshot is untouched"
        );
    }

    #[test]
    fn with_scores_rejects_unknown_metric_and_nan() {
        let dataset = DataSet::build(draft(), &DataSetLimits::default()).expect("valid draft");
        let alias = Alias::new("dev01");

        let mut unknown = BTreeMap::new();
        unknown.insert("Velocity".to_string(), 1.0);
        assert_eq!(
            dataset.with_scores(&alias, &unknown),
            Err(ScoreChangeError::UnknownMetric("Velocity".to_string()))
        );

        let mut nan = BTreeMap::new();
        nan.insert("Delivery".to_string(), f64::NAN);
        assert!(matches!(
            dataset.with_scores(&alias, &nan),
            Err(ScoreChangeError::NonFinite { .. })
        ));
    }
}
