// ── State engine ──
//
// The ordering/merge rules applied to every incoming state record, and
// the seam for swapping the whole store + registry pair for an external
// implementation. The supervisor and dispatcher only talk to the trait.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::model::ItemState;
use crate::store::{StateCallback, StateStore, WatcherRegistry, invoke_watcher, is_mask};

/// Which engine implementation a client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EngineMode {
    InProcess,
    Delegated,
}

/// State store plus watcher registry, as one capability.
///
/// All methods are synchronous and must not be called concurrently with
/// each other in a way that tears an update: implementations serialize
/// ingestion internally.
pub trait StateEngine: Send + Sync {
    fn mode(&self) -> EngineMode {
        EngineMode::Delegated
    }

    /// Apply one record. `is_update` marks push-channel deltas, which never
    /// create an unknown item. Returns whether the record was accepted.
    fn apply_update(&self, state: ItemState, is_update: bool) -> bool;

    /// Apply a full snapshot. With `clear_unavailable`, stored items with a
    /// status that are missing from the snapshot are cleared.
    fn process_snapshot(&self, states: Vec<ItemState>, clear_unavailable: bool);

    /// Drop the stored record and feed a null status/value record, so
    /// watchers see the item become unavailable and the next real update
    /// is accepted unconditionally.
    fn clear_state(&self, oid: &str);

    /// Drop every stored state (session teardown).
    fn reset_states(&self);

    /// Drop every watcher.
    fn reset_watchers(&self);

    fn state(&self, oid: &str) -> Option<Arc<ItemState>>;

    fn states_by_mask(&self, mask: &str) -> Vec<Arc<ItemState>>;

    /// Register a watcher. Unless `skip_initial`, the callback is invoked
    /// right away with the current state (`None` for an unknown exact OID,
    /// once per matching state for a mask).
    fn watch(&self, oid_or_mask: &str, callback: StateCallback, skip_initial: bool);

    fn unwatch(&self, oid_or_mask: Option<&str>, callback: Option<&StateCallback>);

    /// Parse and apply a raw record. Malformed records are logged and
    /// dropped.
    fn ingest(&self, record: Value, is_update: bool) -> bool {
        match serde_json::from_value::<ItemState>(record) {
            Ok(state) => self.apply_update(state, is_update),
            Err(e) => {
                warn!(error = %e, "invalid state record received");
                false
            }
        }
    }
}

// ── InProcessEngine ──────────────────────────────────────────────────

/// The default engine: an in-memory store and registry behind one
/// re-entrant ingestion lock.
///
/// The lock is re-entrant so watcher callbacks may call back into the
/// engine (e.g. `clear_state`) from inside a notification.
#[derive(Default)]
pub struct InProcessEngine {
    store: StateStore,
    watchers: WatcherRegistry,
    ingest: ReentrantMutex<()>,
}

impl InProcessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl StateEngine for InProcessEngine {
    fn mode(&self) -> EngineMode {
        EngineMode::InProcess
    }

    fn apply_update(&self, mut state: ItemState, is_update: bool) -> bool {
        let _guard = self.ingest.lock();
        let old = self.store.get(&state.oid);

        let Some(old) = old else {
            if is_update {
                trace!(oid = %state.oid, "incremental update for unknown item dropped");
                return false;
            }
            return self.accept(state);
        };

        if !state.supersedes(Some(&old)) {
            trace!(oid = %state.oid, token = ?state.token, stored = ?old.token, "stale state dropped");
            return false;
        }
        if is_update || !state.has_ieid() {
            state.merge_from(&old);
        }
        self.accept(state)
    }

    fn process_snapshot(&self, states: Vec<ItemState>, clear_unavailable: bool) {
        let _guard = self.ingest.lock();
        let received: HashSet<String> = if clear_unavailable {
            states.iter().map(|s| s.oid.clone()).collect()
        } else {
            HashSet::new()
        };
        let total = states.len();
        let accepted = states
            .into_iter()
            .map(|s| self.apply_update(s, false))
            .filter(|accepted| *accepted)
            .count();

        if clear_unavailable {
            for oid in self.store.oids_with_status() {
                if !received.contains(&oid) {
                    debug!(%oid, "clearing unavailable item");
                    self.clear_state(&oid);
                }
            }
        }
        debug!(total, accepted, "snapshot processed");
    }

    fn clear_state(&self, oid: &str) {
        let _guard = self.ingest.lock();
        self.store.remove(oid);
        self.apply_update(ItemState::cleared(oid), false);
    }

    fn reset_states(&self) {
        let _guard = self.ingest.lock();
        self.store.clear();
    }

    fn reset_watchers(&self) {
        self.watchers.clear();
    }

    fn state(&self, oid: &str) -> Option<Arc<ItemState>> {
        self.store.get(oid)
    }

    fn states_by_mask(&self, mask: &str) -> Vec<Arc<ItemState>> {
        self.store.by_mask(mask)
    }

    fn watch(&self, oid_or_mask: &str, callback: StateCallback, skip_initial: bool) {
        let _guard = self.ingest.lock();
        self.watchers.add(oid_or_mask, Arc::clone(&callback));
        if skip_initial {
            return;
        }
        if is_mask(oid_or_mask) {
            for state in self.store.by_mask(oid_or_mask) {
                let oid = state.oid.clone();
                invoke_watcher(&callback, Some(state), &oid);
            }
        } else {
            invoke_watcher(&callback, self.store.get(oid_or_mask), oid_or_mask);
        }
    }

    fn unwatch(&self, oid_or_mask: Option<&str>, callback: Option<&StateCallback>) {
        self.watchers.remove(oid_or_mask, callback);
    }
}

impl InProcessEngine {
    fn accept(&self, state: ItemState) -> bool {
        debug!(
            oid = %state.oid,
            status = ?state.status(),
            value = ?state.raw_value(),
            "state accepted"
        );
        let state = Arc::new(state);
        self.store.insert(Arc::clone(&state));
        self.watchers.notify(&state);
        true
    }
}
