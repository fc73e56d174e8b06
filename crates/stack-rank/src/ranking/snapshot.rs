use std::sync::{Arc, RwLock};

use super::dataset::DataSet;

/// Shared, swappable handle to the current `DataSet`.
///
/// The lock only guards the `Arc` itself: readers clone it and release immediately, so a
/// reload never blocks ranking work and no reader sees a half-replaced snapshot.
#[derive(Debug)]
pub struct SnapshotCell {
    current: RwLock<Arc<DataSet>>,
}

impl SnapshotCell {
    pub fn new(dataset: DataSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(dataset)),
        }
    }

    pub fn load(&self) -> Arc<DataSet> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Installs `dataset` and returns the handle now being served.
    pub fn replace(&self, dataset: DataSet) -> Arc<DataSet> {
        let next = Arc::new(dataset);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&next);
        next
    }
}
