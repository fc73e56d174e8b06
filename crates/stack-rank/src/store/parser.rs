use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::{Deserialize, Deserializer};

use crate::ranking::alias::normalize_label;
use crate::ranking::{
    DataSetDraft, DraftExpectedRank, DraftMember, DraftMetric, Table, ValidationFinding,
};

pub(crate) const METRIC_COLUMN: &str = "metrics";
pub(crate) const MIN_COLUMN: &str = "min";
pub(crate) const MAX_COLUMN: &str = "max";

/// Reads the three tables into an unvalidated draft.
///
/// Structural CSV failures are errors; anything cell-level becomes a finding on the draft.
pub(crate) fn read_draft<A, B, C>(
    roles: A,
    scores: B,
    expected: Option<C>,
) -> Result<DataSetDraft, csv::Error>
where
    A: Read,
    B: Read,
    C: Read,
{
    let mut draft = DataSetDraft::default();
    parse_roles(roles, &mut draft)?;
    let role_set: BTreeSet<String> = draft
        .members
        .iter()
        .map(|member| normalize_label(&member.role))
        .filter(|role| !role.is_empty())
        .collect();
    parse_scores(scores, &role_set, &mut draft)?;
    if let Some(expected) = expected {
        parse_expected(expected, &mut draft)?;
    }
    Ok(draft)
}

pub(crate) fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source)
}

/// Lower-cases the header row so serde field names match regardless of export casing.
/// Returns the required columns that are absent.
fn normalize_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    required: &[&'static str],
) -> Result<Vec<&'static str>, csv::Error> {
    let headers: csv::StringRecord = reader
        .headers()?
        .iter()
        .map(|header| normalize_label(header).to_lowercase())
        .collect();
    let missing = required
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    reader.set_headers(headers);
    Ok(missing)
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    role: String,
}

fn parse_roles<R: Read>(source: R, draft: &mut DataSetDraft) -> Result<(), csv::Error> {
    let mut reader = csv_reader(source);
    let missing = normalize_headers(&mut reader, &["alias", "role"])?;
    if !missing.is_empty() {
        report_missing(draft, Table::Roles, &missing);
        return Ok(());
    }

    for (offset, record) in reader.deserialize::<RoleRow>().enumerate() {
        let row = record?;
        if row.alias.is_empty() && row.role.is_empty() {
            continue;
        }
        draft.members.push(DraftMember {
            row: offset + 1,
            alias: row.alias,
            role: row.role,
        });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ExpectedRow {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    role: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    rank: Option<String>,
}

fn parse_expected<R: Read>(source: R, draft: &mut DataSetDraft) -> Result<(), csv::Error> {
    let mut reader = csv_reader(source);
    let missing = normalize_headers(&mut reader, &["alias", "role", "rank"])?;
    if !missing.is_empty() {
        report_missing(draft, Table::ExpectedRanking, &missing);
        return Ok(());
    }

    for (offset, record) in reader.deserialize::<ExpectedRow>().enumerate() {
        let row = offset + 1;
        let ExpectedRow { alias, role, rank } = record?;
        // A blank rank means "no expectation" for that member.
        let Some(raw) = rank else {
            continue;
        };
        match parse_rank(&raw) {
            Some(rank) => draft.expected.push(DraftExpectedRank {
                row,
                alias,
                role,
                rank,
            }),
            None => draft.findings.push(ValidationFinding::InvalidNumber {
                table: Table::ExpectedRanking,
                row,
                column: "rank".to_string(),
                value: raw,
            }),
        }
    }
    Ok(())
}

/// Spreadsheet exports often write whole ranks as `2.0`.
fn parse_rank(raw: &str) -> Option<i64> {
    if let Ok(rank) = raw.parse::<i64>() {
        return Some(rank);
    }
    let value = parse_number(raw)?;
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}

fn parse_scores<R: Read>(
    source: R,
    roles: &BTreeSet<String>,
    draft: &mut DataSetDraft,
) -> Result<(), csv::Error> {
    let mut reader = csv_reader(source);
    let labels: Vec<String> = reader.headers()?.iter().map(normalize_label).collect();
    let position = |name: &str| labels.iter().position(|label| label.eq_ignore_ascii_case(name));

    let (metric_col, min_col, max_col) = match (
        position(METRIC_COLUMN),
        position(MIN_COLUMN),
        position(MAX_COLUMN),
    ) {
        (Some(metric), Some(min), Some(max)) => (metric, min, max),
        (metric, min, max) => {
            let missing: Vec<&'static str> = [
                (metric, METRIC_COLUMN),
                (min, MIN_COLUMN),
                (max, MAX_COLUMN),
            ]
            .into_iter()
            .filter_map(|(found, column)| found.is_none().then_some(column))
            .collect();
            report_missing(draft, Table::Scores, &missing);
            return Ok(());
        }
    };

    let mut role_columns = Vec::new();
    let mut alias_columns = Vec::new();
    for (index, label) in labels.iter().enumerate() {
        if index == metric_col || index == min_col || index == max_col || label.is_empty() {
            continue;
        }
        if roles.contains(label) {
            role_columns.push((index, label.clone()));
        } else {
            alias_columns.push((index, label.clone()));
        }
    }
    for role in roles {
        if !role_columns.iter().any(|(_, label)| label == role) {
            draft.findings.push(ValidationFinding::MissingColumn {
                table: Table::Scores,
                column: role.clone(),
            });
        }
    }

    for (offset, record) in reader.records().enumerate() {
        let record = record?;
        let row = offset + 1;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let cell = |index: usize| record.get(index).unwrap_or("");
        let mut invalid = |column: &str, value: &str| {
            draft.findings.push(ValidationFinding::InvalidNumber {
                table: Table::Scores,
                row,
                column: column.to_string(),
                value: value.to_string(),
            });
        };

        let min = parse_number(cell(min_col));
        if min.is_none() {
            invalid(&labels[min_col], cell(min_col));
        }
        let max = parse_number(cell(max_col));
        if max.is_none() {
            invalid(&labels[max_col], cell(max_col));
        }

        let mut weights = BTreeMap::new();
        for (index, role) in &role_columns {
            let raw = cell(*index);
            if raw.is_empty() {
                continue;
            }
            match parse_number(raw) {
                Some(weight) => {
                    weights.insert(role.clone(), weight);
                }
                None => invalid(role, raw),
            }
        }

        let mut scores = BTreeMap::new();
        for (index, alias) in &alias_columns {
            let raw = cell(*index);
            let value = if raw.is_empty() {
                None
            } else {
                let parsed = parse_number(raw);
                if parsed.is_none() {
                    invalid(alias, raw);
                }
                parsed
            };
            scores.insert(alias.clone(), value);
        }

        // Without both bounds the row cannot describe a metric; the finding already fails the load.
        let (Some(min), Some(max)) = (min, max) else {
            continue;
        };
        draft.metrics.push(DraftMetric {
            row,
            name: cell(metric_col).to_string(),
            min,
            max,
            weights,
            scores,
        });
    }
    Ok(())
}

fn report_missing(draft: &mut DataSetDraft, table: Table, columns: &[&'static str]) {
    for column in columns {
        draft.findings.push(ValidationFinding::MissingColumn {
            table,
            column: column.to_string(),
        });
    }
}

pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
