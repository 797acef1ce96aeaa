// ── Watcher registry ──
//
// Callbacks keyed by exact OID or by mask. Notification always runs over a
// snapshot of the callback lists, so callbacks may watch/unwatch freely
// while being invoked. A panicking callback is logged and skipped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::error;

use super::mask::{is_mask, oid_match};
use crate::model::ItemState;

/// State watcher callback. Receives `None` when an exact OID has no state
/// yet.
pub type StateCallback = Arc<dyn Fn(Option<Arc<ItemState>>) + Send + Sync>;

#[derive(Default)]
pub struct WatcherRegistry {
    exact: Mutex<HashMap<String, Vec<StateCallback>>>,
    masks: Mutex<IndexMap<String, Vec<StateCallback>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under an exact OID or a mask.
    pub fn add(&self, key: &str, callback: StateCallback) {
        if is_mask(key) {
            self.masks
                .lock()
                .entry(key.to_owned())
                .or_default()
                .push(callback);
        } else {
            self.exact
                .lock()
                .entry(key.to_owned())
                .or_default()
                .push(callback);
        }
    }

    /// Remove watchers.
    ///
    /// No key clears everything; a key alone removes all its callbacks; a
    /// key with a callback removes that callback instance only.
    pub fn remove(&self, key: Option<&str>, callback: Option<&StateCallback>) {
        let Some(key) = key else {
            self.clear();
            return;
        };
        if is_mask(key) {
            let mut masks = self.masks.lock();
            match callback {
                Some(cb) => {
                    if let Some(list) = masks.get_mut(key) {
                        list.retain(|f| !Arc::ptr_eq(f, cb));
                    }
                }
                None => {
                    masks.shift_remove(key);
                }
            }
        } else {
            let mut exact = self.exact.lock();
            match callback {
                Some(cb) => {
                    if let Some(list) = exact.get_mut(key) {
                        list.retain(|f| !Arc::ptr_eq(f, cb));
                    }
                }
                None => {
                    exact.remove(key);
                }
            }
        }
    }

    pub fn clear(&self) {
        self.exact.lock().clear();
        self.masks.lock().clear();
    }

    /// Number of registered callbacks (exact and mask).
    pub fn len(&self) -> usize {
        let exact: usize = self.exact.lock().values().map(Vec::len).sum();
        let masks: usize = self.masks.lock().values().map(Vec::len).sum();
        exact + masks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an accepted state: exact watchers first, then every matching
    /// mask in registration order.
    pub fn notify(&self, state: &Arc<ItemState>) {
        let exact: Vec<StateCallback> = self
            .exact
            .lock()
            .get(&state.oid)
            .cloned()
            .unwrap_or_default();
        let masked: Vec<StateCallback> = self
            .masks
            .lock()
            .iter()
            .filter(|(mask, _)| oid_match(&state.oid, mask))
            .flat_map(|(_, list)| list.iter().cloned())
            .collect();

        for callback in exact.iter().chain(masked.iter()) {
            invoke(callback, Some(Arc::clone(state)), &state.oid);
        }
    }
}

/// Call a watcher, containing any panic.
pub(crate) fn invoke(callback: &StateCallback, state: Option<Arc<ItemState>>, oid: &str) {
    if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
        error!(oid, "state watcher panicked");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn state(oid: &str) -> Arc<ItemState> {
        Arc::new(serde_json::from_value(json!({"oid": oid, "status": 1})).unwrap())
    }

    fn counter() -> (Arc<AtomicUsize>, StateCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let cb: StateCallback = Arc::new(move |_: Option<Arc<ItemState>>| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn exact_and_overlapping_masks_all_fire() {
        let registry = WatcherRegistry::new();
        let (exact, cb_exact) = counter();
        let (wide, cb_wide) = counter();
        let (narrow, cb_narrow) = counter();
        registry.add("sensor:env/temp1", cb_exact);
        registry.add("sensor:*", cb_wide);
        registry.add("sensor:env/*", cb_narrow);

        registry.notify(&state("sensor:env/temp1"));
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wide.load(Ordering::SeqCst), 1);
        assert_eq!(narrow.load(Ordering::SeqCst), 1);

        registry.notify(&state("sensor:room/temp1"));
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wide.load(Ordering::SeqCst), 2);
        assert_eq!(narrow.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exact_watchers_run_before_masks() {
        let registry = WatcherRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        registry.add("unit:*", Arc::new(move |_: Option<Arc<ItemState>>| o.lock().push("mask")));
        let o = Arc::clone(&order);
        registry.add("unit:a", Arc::new(move |_: Option<Arc<ItemState>>| o.lock().push("exact")));
        registry.notify(&state("unit:a"));
        assert_eq!(*order.lock(), vec!["exact", "mask"]);
    }

    #[test]
    fn remove_by_instance_keeps_others() {
        let registry = WatcherRegistry::new();
        let (first, cb_first) = counter();
        let (second, cb_second) = counter();
        registry.add("unit:a", Arc::clone(&cb_first));
        registry.add("unit:a", cb_second);
        registry.remove(Some("unit:a"), Some(&cb_first));
        registry.notify(&state("unit:a"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_key_and_clear() {
        let registry = WatcherRegistry::new();
        let (_, cb) = counter();
        registry.add("unit:a", Arc::clone(&cb));
        registry.add("unit:*", Arc::clone(&cb));
        registry.add("unit:b", cb);
        registry.remove(Some("unit:*"), None);
        assert_eq!(registry.len(), 2);
        registry.remove(None, None);
        assert!(registry.is_empty());
    }

    #[test]
    fn callbacks_may_unwatch_during_notify() {
        let registry = Arc::new(WatcherRegistry::new());
        let (hits, cb_other) = counter();
        let reg = Arc::clone(&registry);
        registry.add(
            "unit:a",
            Arc::new(move |_: Option<Arc<ItemState>>| reg.remove(Some("unit:a"), None)),
        );
        registry.add("unit:a", cb_other);
        // The snapshot still delivers to the second callback.
        registry.notify(&state("unit:a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.notify(&state("unit:a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
