use std::fmt;

use serde::Serialize;

/// Table a finding points at, using the names of the three-table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Roles,
    Scores,
    ExpectedRanking,
}

impl Table {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Roles => "Roles",
            Self::Scores => "Scores",
            Self::ExpectedRanking => "ExpectedRanking",
        }
    }
}

/// One structural problem found while assembling a `DataSet`.
///
/// Rows are 1-indexed data rows (the header is not counted).
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFinding {
    #[error("{} table is missing", .table.label())]
    MissingTable { table: Table },
    #[error("{} table is missing required column '{column}'", .table.label())]
    MissingColumn { table: Table, column: String },
    #[error("{} row {row}: '{value}' in column '{column}' is not a valid number", .table.label())]
    InvalidNumber {
        table: Table,
        row: usize,
        column: String,
        value: String,
    },
    #[error("{} row {row}: alias is empty", .table.label())]
    EmptyAlias { table: Table, row: usize },
    #[error("Roles row {row}: member '{alias}' has no role")]
    EmptyRole { row: usize, alias: String },
    #[error("Roles row {row}: member '{alias}' already defined on row {first_row}")]
    DuplicateMember {
        alias: String,
        row: usize,
        first_row: usize,
    },
    #[error("Scores row {row}: metric name is empty")]
    EmptyMetricName { row: usize },
    #[error("Scores row {row}: metric '{metric}' already defined on row {first_row}")]
    DuplicateMetric {
        metric: String,
        row: usize,
        first_row: usize,
    },
    #[error("metric '{metric}' has min {min} greater than max {max}")]
    InvalidBounds { metric: String, min: f64, max: f64 },
    #[error("metric '{metric}' has no weight for role '{role}'")]
    MissingRoleWeight { metric: String, role: String },
    #[error("metric '{metric}' has negative weight {weight} for role '{role}'")]
    NegativeWeight {
        metric: String,
        role: String,
        weight: f64,
    },
    #[error("Scores column '{alias}' does not match any member in the Roles table")]
    UnknownScoreAlias { alias: String },
    #[error("member '{alias}' has no column in the Scores table")]
    MemberMissingFromScores { alias: String },
    #[error("member '{alias}' has no score for metric '{metric}', which is weighted for role '{role}'")]
    MissingScore {
        alias: String,
        role: String,
        metric: String,
    },
    #[error("ExpectedRanking row {row}: '{alias}' is not a known member")]
    ExpectedRankUnknownMember { row: usize, alias: String },
    #[error(
        "ExpectedRanking row {row}: '{alias}' listed under role '{listed_role}' but belongs to '{member_role}'"
    )]
    ExpectedRankRoleMismatch {
        row: usize,
        alias: String,
        listed_role: String,
        member_role: String,
    },
    #[error("ExpectedRanking row {row}: rank {rank} for '{alias}' must be at least 1")]
    InvalidExpectedRank { row: usize, alias: String, rank: i64 },
    #[error("ExpectedRanking row {row}: '{alias}' already has an expected rank")]
    DuplicateExpectedRank { row: usize, alias: String },
    #[error("too many {subject}: {count} exceeds the limit of {limit}")]
    LimitExceeded {
        subject: &'static str,
        count: usize,
        limit: usize,
    },
}

/// Every finding from one validation pass. A `DataSet` is only built when this is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn new(findings: Vec<ValidationFinding>) -> Self {
        Self { findings }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn push(&mut self, finding: ValidationFinding) {
        self.findings.push(finding);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data validation failed with {} finding(s)", self.len())?;
        for finding in self.findings.iter().take(5) {
            write!(f, "; {finding}")?;
        }
        if self.len() > 5 {
            write!(f, "; ... {} more", self.len() - 5)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}
