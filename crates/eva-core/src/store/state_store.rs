use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::mask::oid_match;
use crate::model::ItemState;

/// Current item states keyed by OID, in insertion order.
///
/// Holds at most one state per OID. No ordering rules are applied here.
#[derive(Default)]
pub struct StateStore {
    states: Mutex<IndexMap<String, Arc<ItemState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, oid: &str) -> Option<Arc<ItemState>> {
        self.states.lock().get(oid).cloned()
    }

    /// States whose OID matches `mask`, in insertion order.
    pub fn by_mask(&self, mask: &str) -> Vec<Arc<ItemState>> {
        self.states
            .lock()
            .iter()
            .filter(|(oid, _)| oid_match(oid, mask))
            .map(|(_, state)| Arc::clone(state))
            .collect()
    }

    /// Insert or replace. A replaced OID keeps its position.
    pub fn insert(&self, state: Arc<ItemState>) {
        self.states.lock().insert(state.oid.clone(), state);
    }

    pub fn remove(&self, oid: &str) -> Option<Arc<ItemState>> {
        self.states.lock().shift_remove(oid)
    }

    /// OIDs of states carrying a non-null status.
    pub fn oids_with_status(&self) -> Vec<String> {
        self.states
            .lock()
            .iter()
            .filter(|(_, state)| state.has_status())
            .map(|(oid, _)| oid.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}
