use std::collections::BTreeSet;

use crate::ranking::alias::normalize_label;
use crate::ranking::{Alias, DataSet, StoreError};

use super::parser::{csv_reader, MAX_COLUMN, METRIC_COLUMN, MIN_COLUMN};

/// Re-renders the Scores table with `alias`'s touched cells and bounds taken from `dataset`.
///
/// Every other cell, the column order, and the original header text are kept as read.
pub(crate) fn rewrite_scores(
    source: &str,
    dataset: &DataSet,
    alias: &Alias,
    touched: &BTreeSet<String>,
) -> Result<Vec<u8>, StoreError> {
    let mut reader = csv_reader(source.as_bytes());
    let headers = reader.headers()?.clone();
    let labels: Vec<String> = headers.iter().map(normalize_label).collect();
    let column = |name: &str| {
        labels
            .iter()
            .position(|label| label.eq_ignore_ascii_case(name))
            .ok_or_else(|| StoreError::Unavailable(format!("scores table lost column '{name}'")))
    };
    let metric_col = column(METRIC_COLUMN)?;
    let min_col = column(MIN_COLUMN)?;
    let max_col = column(MAX_COLUMN)?;
    let alias_col = labels
        .iter()
        .position(|label| Alias::new(label) == *alias)
        .ok_or_else(|| StoreError::Unavailable(format!("scores table has no column for '{alias}'")))?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers)?;

    let mut written = BTreeSet::new();
    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
        if cells.len() < headers.len() {
            cells.resize(headers.len(), String::new());
        }

        let name = normalize_label(&cells[metric_col]);
        if touched.contains(&name) {
            if let (Some(metric), Some(value)) =
                (dataset.metric(&name), dataset.score_by_name(alias, &name))
            {
                cells[alias_col] = value.to_string();
                cells[min_col] = metric.min.to_string();
                cells[max_col] = metric.max.to_string();
                written.insert(name);
            }
        }
        writer.write_record(&cells)?;
    }

    if let Some(missing) = touched.difference(&written).next() {
        return Err(StoreError::Unavailable(format!(
            "scores table has no row for metric '{missing}'"
        )));
    }

    writer
        .into_inner()
        .map_err(|err| StoreError::Io(err.into_error()))
}
