use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{DatasetKind, Snapshot};

/// Latest successful snapshot per dataset kind.
///
/// Snapshots are immutable and swapped whole, so a reader either sees the
/// previous list or the new one, never a partially-built one.
#[derive(Debug, Clone, Default)]
pub struct DataCache {
    inner: Arc<RwLock<HashMap<DatasetKind, Arc<Snapshot>>>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: DatasetKind) -> Option<Arc<Snapshot>> {
        let map = self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache lock");
            poisoned.into_inner()
        });
        map.get(&kind).cloned()
    }

    /// Replaces the snapshot for its kind. Returns true if the data differs
    /// from the previous snapshot (or there was none).
    pub(crate) fn commit(&self, snapshot: Snapshot) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache lock");
            poisoned.into_inner()
        });
        let changed = map
            .get(&snapshot.kind)
            .is_none_or(|prev| prev.data_hash != snapshot.data_hash);
        map.insert(snapshot.kind, Arc::new(snapshot));
        changed
    }
}
