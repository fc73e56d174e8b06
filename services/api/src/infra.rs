use metrics_exporter_prometheus::PrometheusHandle;
use stack_rank::ranking::{
    Alias, DataSet, DataSetDraft, DataSetLimits, PercentileBasis, ScoreStore, StoreError,
};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local store for demos and `serve --sample`. Nothing outside the process can
/// edit it, so it never reports external changes.
pub(crate) struct InMemoryScoreStore {
    dataset: Mutex<DataSet>,
}

impl InMemoryScoreStore {
    pub(crate) fn new(dataset: DataSet) -> Self {
        Self {
            dataset: Mutex::new(dataset),
        }
    }
}

impl ScoreStore for InMemoryScoreStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        let guard = self
            .dataset
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn write_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        let mut guard = self
            .dataset
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".to_string()))?;
        let next = guard.with_scores(alias, changes)?;
        *guard = next.clone();
        Ok(next)
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Built-in engineering team used by `demo` and `serve --sample`.
pub(crate) fn sample_dataset() -> Result<DataSet, StoreError> {
    let mut draft = DataSetDraft::default()
        .member("Dev01", "Dev")
        .member("Dev02", "Dev")
        .member("Dev03", "Dev")
        .member("Dev04", "Dev")
        .member("Dev05", "Dev")
        .member("QA01", "QA")
        .member("QA02", "QA")
        .member("QA03", "QA")
        .metric("Delivery", 40.0, 95.0, &[("Dev", 0.5), ("QA", 0.2)])
        .metric("Code Review", 30.0, 90.0, &[("Dev", 0.3), ("QA", 0.0)])
        .metric("Test Coverage", 20.0, 98.0, &[("Dev", 0.2), ("QA", 0.5)])
        .metric("Defect Triage", 10.0, 90.0, &[("Dev", 0.0), ("QA", 0.3)]);

    let scores: [(&str, [Option<f64>; 4]); 8] = [
        ("Dev01", [Some(92.0), Some(85.0), Some(70.0), None]),
        ("Dev02", [Some(78.0), Some(88.0), Some(81.0), None]),
        ("Dev03", [Some(64.0), Some(72.0), Some(90.0), None]),
        ("Dev04", [Some(81.0), Some(60.0), Some(55.0), None]),
        ("Dev05", [Some(58.0), Some(45.0), Some(62.0), None]),
        ("QA01", [Some(70.0), None, Some(88.0), Some(75.0)]),
        ("QA02", [Some(85.0), None, Some(72.0), Some(64.0)]),
        ("QA03", [Some(60.0), None, Some(94.0), Some(82.0)]),
    ];
    let metrics = ["Delivery", "Code Review", "Test Coverage", "Defect Triage"];

    for (alias, row) in scores {
        for (metric, value) in metrics.iter().zip(row) {
            draft = match value {
                Some(value) => draft.score(alias, metric, value),
                None => draft.blank_score(alias, metric),
            };
        }
    }

    let draft = draft
        .expect("Dev01", "Dev", 1)
        .expect("Dev02", "Dev", 2)
        .expect("Dev03", "Dev", 2)
        .expect("Dev04", "Dev", 4)
        .expect("QA01", "QA", 2)
        .expect("QA02", "QA", 1)
        .expect("QA03", "QA", 1);

    Ok(DataSet::build(draft, &DataSetLimits::default())?)
}

pub(crate) fn parse_basis(raw: &str) -> Result<PercentileBasis, String> {
    raw.parse::<PercentileBasis>()
        .map_err(|err| err.to_string())
}

pub(crate) fn parse_percent(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as a percentage ({err})"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("'{raw}' is not a finite percentage"))
    }
}
