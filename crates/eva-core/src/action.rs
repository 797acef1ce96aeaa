// ── Action watch ──
//
// Callbacks waiting on the outcome of a server-side action, keyed by the
// action UUID. The supervisor polls `action.result` for each watched UUID;
// callbacks fire only when the reported status changes, and the entry goes
// away once the action finishes or the poll fails.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::error;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::ActionResult;

pub type ActionCallback = Arc<dyn Fn(Result<&ActionResult, &CoreError>) + Send + Sync>;

#[derive(Default)]
struct ActionWatch {
    last: Option<ActionResult>,
    callbacks: Vec<ActionCallback>,
}

#[derive(Default)]
pub struct ActionWatcher {
    entries: DashMap<Uuid, ActionWatch>,
}

impl ActionWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback for `uuid`. Returns `true` when the UUID was not
    /// watched yet, i.e. the caller must start polling it.
    ///
    /// A callback joining an existing watch immediately gets the last known
    /// result, if any.
    pub fn register(&self, uuid: Uuid, callback: ActionCallback) -> bool {
        let last = match self.entries.entry(uuid) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get_mut().callbacks.push(Arc::clone(&callback));
                entry.get().last.clone()
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(ActionWatch {
                    last: None,
                    callbacks: vec![callback],
                });
                return true;
            }
        };
        if let Some(result) = last {
            invoke(&callback, Ok(&result), uuid);
        }
        false
    }

    /// Record a polled result. Returns whether polling should continue.
    pub fn update(&self, uuid: Uuid, result: &ActionResult) -> bool {
        let callbacks = {
            let Some(mut entry) = self.entries.get_mut(&uuid) else {
                return false;
            };
            let changed = entry
                .last
                .as_ref()
                .is_none_or(|last| last.status != result.status);
            if changed {
                entry.last = Some(result.clone());
                entry.callbacks.clone()
            } else {
                Vec::new()
            }
        };
        if result.finished {
            self.entries.remove(&uuid);
        }
        for callback in &callbacks {
            invoke(callback, Ok(result), uuid);
        }
        !result.finished
    }

    /// A poll failed: every callback gets the error and the watch ends.
    pub fn fail(&self, uuid: Uuid, err: &CoreError) {
        let Some((_, watch)) = self.entries.remove(&uuid) else {
            return;
        };
        for callback in &watch.callbacks {
            invoke(callback, Err(err), uuid);
        }
    }

    pub fn is_watched(&self, uuid: &Uuid) -> bool {
        self.entries.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn invoke(callback: &ActionCallback, result: Result<&ActionResult, &CoreError>, uuid: Uuid) {
    if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
        error!(%uuid, "action callback panicked");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    fn result(status: &str, finished: bool) -> ActionResult {
        serde_json::from_value(json!({"status": status, "finished": finished})).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, ActionCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ActionCallback = Arc::new(move |r: Result<&ActionResult, &CoreError>| {
            s.lock().push(match r {
                Ok(res) => res.status.clone(),
                Err(e) => format!("error {}", e.code()),
            });
        });
        (seen, cb)
    }

    #[test]
    fn fires_on_status_change_only() {
        let watcher = ActionWatcher::new();
        let uuid = Uuid::new_v4();
        let (seen, cb) = recorder();
        assert!(watcher.register(uuid, cb));

        assert!(watcher.update(uuid, &result("running", false)));
        assert!(watcher.update(uuid, &result("running", false)));
        assert!(!watcher.update(uuid, &result("completed", true)));

        assert_eq!(*seen.lock(), vec!["running", "completed"]);
        assert!(!watcher.is_watched(&uuid));
    }

    #[test]
    fn late_subscriber_gets_last_result() {
        let watcher = ActionWatcher::new();
        let uuid = Uuid::new_v4();
        let (_, first) = recorder();
        watcher.register(uuid, first);
        watcher.update(uuid, &result("running", false));

        let (late, cb) = recorder();
        assert!(!watcher.register(uuid, cb));
        assert_eq!(*late.lock(), vec!["running"]);
    }

    #[test]
    fn failure_fans_out_and_removes() {
        let watcher = ActionWatcher::new();
        let uuid = Uuid::new_v4();
        let (a, cb_a) = recorder();
        let (b, cb_b) = recorder();
        watcher.register(uuid, cb_a);
        watcher.register(uuid, cb_b);
        watcher.fail(
            uuid,
            &CoreError::Remote {
                code: -32001,
                message: "not found".into(),
                data: None,
            },
        );
        assert_eq!(*a.lock(), vec!["error -32001"]);
        assert_eq!(*b.lock(), vec!["error -32001"]);
        assert!(watcher.is_empty());
    }
}
