use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::ranking::{
    ranking_router, AdjustmentSettings, Alias, DataSet, DataSetDraft, DataSetLimits,
    RankingService, ScoreStore, StoreError, ValidationFinding, ValidationReport,
};

/// Two cohorts. Dev holds a tie at the top (Scenario A: 90, 90, 70) plus a member with no
/// expected rank; QA is inverted against its expectations.
pub(super) fn team_draft() -> DataSetDraft {
    DataSetDraft::default()
        .member("Dev01", "Dev")
        .member("Dev02", "Dev")
        .member("Dev03", "Dev")
        .member("Dev04", "Dev")
        .member("QA01", "QA")
        .member("QA02", "QA")
        .metric("Delivery", 0.0, 100.0, &[("Dev", 0.6), ("QA", 0.2)])
        .metric("Quality", 0.0, 100.0, &[("Dev", 0.4), ("QA", 0.5)])
        .metric("Testing", 0.0, 100.0, &[("Dev", 0.0), ("QA", 0.3)])
        .score("Dev01", "Delivery", 90.0)
        .score("Dev01", "Quality", 90.0)
        .blank_score("Dev01", "Testing")
        .score("Dev02", "Delivery", 90.0)
        .score("Dev02", "Quality", 90.0)
        .blank_score("Dev02", "Testing")
        .score("Dev03", "Delivery", 70.0)
        .score("Dev03", "Quality", 70.0)
        .blank_score("Dev03", "Testing")
        .score("Dev04", "Delivery", 50.0)
        .score("Dev04", "Quality", 50.0)
        .blank_score("Dev04", "Testing")
        .score("QA01", "Delivery", 80.0)
        .score("QA01", "Quality", 80.0)
        .score("QA01", "Testing", 80.0)
        .score("QA02", "Delivery", 60.0)
        .score("QA02", "Quality", 60.0)
        .score("QA02", "Testing", 60.0)
        .expect("Dev01", "Dev", 1)
        .expect("Dev03", "Dev", 1)
        .expect("QA01", "QA", 2)
        .expect("QA02", "QA", 1)
}

pub(super) fn team() -> DataSet {
    DataSet::build(team_draft(), &DataSetLimits::default()).expect("team dataset is valid")
}

pub(super) fn build_service() -> (RankingService<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(team()));
    let service = RankingService::new(store.clone(), AdjustmentSettings::default())
        .expect("memory store loads");
    (service, store)
}

pub(super) fn service_with<S: ScoreStore + 'static>(store: S) -> RankingService<S> {
    RankingService::with_dataset(Arc::new(store), team(), AdjustmentSettings::default())
}

pub(super) fn changes(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(metric, value)| (metric.to_string(), *value))
        .collect()
}

pub(super) struct MemoryStore {
    dataset: Mutex<DataSet>,
    dirty: AtomicBool,
}

impl MemoryStore {
    pub(super) fn new(dataset: DataSet) -> Self {
        Self {
            dataset: Mutex::new(dataset),
            dirty: AtomicBool::new(false),
        }
    }

    /// Simulates someone editing the backing tables outside the service.
    pub(super) fn edit_externally(&self, dataset: DataSet) {
        *self.dataset.lock().expect("store mutex poisoned") = dataset;
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(super) fn current(&self) -> DataSet {
        self.dataset.lock().expect("store mutex poisoned").clone()
    }
}

impl ScoreStore for MemoryStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        self.dirty.store(false, Ordering::SeqCst);
        Ok(self.current())
    }

    fn write_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        let mut guard = self.dataset.lock().expect("store mutex poisoned");
        let next = guard.with_scores(alias, changes)?;
        *guard = next.clone();
        Ok(next)
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        Ok(self.dirty.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct Gate {
    armed: bool,
    parked: bool,
    released: bool,
}

/// Memory store that holds its first write open after persisting it, until `release`.
pub(super) struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Gate>,
    signal: Condvar,
}

impl GatedStore {
    pub(super) fn new(dataset: DataSet) -> Self {
        Self {
            inner: MemoryStore::new(dataset),
            gate: Mutex::new(Gate {
                armed: true,
                ..Gate::default()
            }),
            signal: Condvar::new(),
        }
    }

    pub(super) fn wait_until_parked(&self) {
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        while !gate.parked {
            gate = self.signal.wait(gate).expect("gate mutex poisoned");
        }
    }

    pub(super) fn release(&self) {
        self.gate.lock().expect("gate mutex poisoned").released = true;
        self.signal.notify_all();
    }

    pub(super) fn current(&self) -> DataSet {
        self.inner.current()
    }
}

impl ScoreStore for GatedStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        self.inner.load()
    }

    fn write_scores(
        &self,
        alias: &Alias,
        changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        let written = self.inner.write_scores(alias, changes)?;
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        if gate.armed {
            gate.armed = false;
            gate.parked = true;
            self.signal.notify_all();
            while !gate.released {
                gate = self.signal.wait(gate).expect("gate mutex poisoned");
            }
        }
        Ok(written)
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        self.inner.has_external_changes()
    }
}

pub(super) struct ConflictStore;

impl ScoreStore for ConflictStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        Ok(team())
    }

    fn write_scores(
        &self,
        _alias: &Alias,
        _changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        Err(StoreError::Conflict)
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

pub(super) struct UnavailableStore;

impl ScoreStore for UnavailableStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        Err(StoreError::Unavailable("share offline".to_string()))
    }

    fn write_scores(
        &self,
        _alias: &Alias,
        _changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        Err(StoreError::Unavailable("share offline".to_string()))
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("share offline".to_string()))
    }
}

/// Store whose tables were edited into an invalid state.
pub(super) struct BrokenStore;

impl ScoreStore for BrokenStore {
    fn load(&self) -> Result<DataSet, StoreError> {
        Err(StoreError::Validation(ValidationReport::new(vec![
            ValidationFinding::MissingRoleWeight {
                metric: "Delivery".to_string(),
                role: "QA".to_string(),
            },
        ])))
    }

    fn write_scores(
        &self,
        _alias: &Alias,
        _changes: &BTreeMap<String, f64>,
    ) -> Result<DataSet, StoreError> {
        Err(StoreError::Locked)
    }

    fn has_external_changes(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

pub(super) fn router_with<S: ScoreStore + 'static>(service: RankingService<S>) -> axum::Router {
    ranking_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
