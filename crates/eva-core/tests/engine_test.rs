#![allow(clippy::unwrap_used)]
// Ordering, merge and watcher behaviour of the in-process state engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use eva_core::{InProcessEngine, ItemState, StateCallback, StateEngine};

// ── Helpers ──────────────────────────────────────────────────────────

fn setup() -> InProcessEngine {
    InProcessEngine::new()
}

fn record(v: Value) -> ItemState {
    serde_json::from_value(v).unwrap()
}

type Seen = Arc<Mutex<Vec<Option<Arc<ItemState>>>>>;

fn recorder() -> (Seen, StateCallback) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let cb: StateCallback = Arc::new(move |state: Option<Arc<ItemState>>| s.lock().push(state));
    (seen, cb)
}

fn counter() -> (Arc<AtomicUsize>, StateCallback) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let cb: StateCallback = Arc::new(move |_: Option<Arc<ItemState>>| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    (hits, cb)
}

// ── Ordering ─────────────────────────────────────────────────────────

#[test]
fn duplicate_record_does_not_renotify() {
    let engine = setup();
    let (hits, cb) = counter();
    engine.watch("unit:x", cb, true);

    let rec = json!({"oid": "unit:x", "status": 1, "value": 10, "ieid": [1, 1]});
    assert!(engine.apply_update(record(rec.clone()), false));
    assert!(!engine.apply_update(record(rec.clone()), true));
    assert!(!engine.apply_update(record(rec), false));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn lower_sequence_is_rejected() {
    let engine = setup();
    engine.apply_update(record(json!({"oid": "unit:x", "status": 5, "ieid": [1, 5]})), false);
    assert!(!engine.apply_update(record(json!({"oid": "unit:x", "status": 3, "ieid": [1, 3]})), true));
    assert_eq!(engine.state("unit:x").unwrap().status(), Some(5));

    // A newer generation wins regardless of sequence.
    assert!(engine.apply_update(record(json!({"oid": "unit:x", "status": 7, "ieid": [2, 1]})), true));
    assert_eq!(engine.state("unit:x").unwrap().status(), Some(7));
}

#[test]
fn generation_zero_is_always_accepted() {
    let engine = setup();
    engine.apply_update(record(json!({"oid": "unit:x", "status": 1, "ieid": [3, 9]})), false);
    assert!(engine.apply_update(record(json!({"oid": "unit:x", "status": 0, "ieid": [0, 1]})), true));
    assert_eq!(engine.state("unit:x").unwrap().status(), Some(0));
}

#[test]
fn node_change_resets_ordering() {
    let engine = setup();
    engine.apply_update(
        record(json!({"oid": "unit:x", "status": 1, "node": "n1", "ieid": [2, 9]})),
        false,
    );
    assert!(engine.apply_update(
        record(json!({"oid": "unit:x", "status": 2, "node": "n2", "ieid": [1, 1]})),
        true
    ));
    let state = engine.state("unit:x").unwrap();
    assert_eq!(state.node.as_deref(), Some("n2"));
    assert_eq!(state.status(), Some(2));
}

#[test]
fn wall_clock_tokens_order_legacy_records() {
    let engine = setup();
    engine.apply_update(record(json!({"oid": "lvar:x", "status": 1, "set_time": 100.5})), false);
    assert!(!engine.apply_update(record(json!({"oid": "lvar:x", "status": 0, "set_time": 99.0})), true));
    assert!(engine.apply_update(record(json!({"oid": "lvar:x", "status": 0, "set_time": 101.0})), true));
    assert_eq!(engine.state("lvar:x").unwrap().status(), Some(0));
}

#[test]
fn equal_wall_clock_token_is_accepted() {
    let engine = setup();
    let (hits, cb) = counter();
    engine.watch("lvar:x", cb, true);

    let rec = json!({"oid": "lvar:x", "status": 1, "set_time": 5.0});
    assert!(engine.apply_update(record(rec.clone()), false));
    assert!(engine.apply_update(record(rec.clone()), false));
    assert!(engine.apply_update(record(rec), true));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn tokenless_snapshot_repeat_is_accepted() {
    let engine = setup();
    let (seen, cb) = recorder();
    engine.watch("unit:a", cb, true);

    let rec = json!({"oid": "unit:a", "status": 1});
    assert!(engine.apply_update(record(rec.clone()), false));
    assert!(engine.apply_update(record(rec), false));

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.as_ref().unwrap().status() == Some(1)));
}

#[test]
fn tokenless_record_overrides_wall_clock_record() {
    let engine = setup();
    let (hits, cb) = counter();
    engine.watch("lvar:x", cb, true);

    engine.apply_update(record(json!({"oid": "lvar:x", "status": 1, "set_time": 100.0})), false);
    assert!(engine.apply_update(record(json!({"oid": "lvar:x", "status": 0})), false));
    assert_eq!(engine.state("lvar:x").unwrap().status(), Some(0));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn repeated_snapshots_without_sequence_all_notify() {
    let engine = setup();
    let (hits, cb) = counter();
    engine.watch("unit:a", cb, true);

    let tokenless = json!({"oid": "unit:a", "status": 1});
    let timed = json!({"oid": "unit:a", "status": 1, "set_time": 5.0});
    for rec in [&tokenless, &tokenless, &timed, &timed] {
        assert!(engine.apply_update(record(rec.clone()), false));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

// ── Merge ────────────────────────────────────────────────────────────

#[test]
fn incremental_update_patches_stored_record() {
    let engine = setup();
    engine.apply_update(
        record(json!({"oid": "x", "status": 1, "value": 5, "meta": {"a": 1}})),
        false,
    );
    assert!(engine.apply_update(record(json!({"oid": "x", "status": 2})), true));
    assert_eq!(
        *engine.state("x").unwrap(),
        record(json!({"oid": "x", "status": 2, "value": 5, "meta": {"a": 1}}))
    );
}

#[test]
fn incremental_update_for_unknown_item_is_dropped() {
    let engine = setup();
    let (seen, cb) = recorder();
    engine.watch("unit:*", cb, true);
    assert!(!engine.apply_update(record(json!({"oid": "unit:new", "status": 1})), true));
    assert!(engine.state("unit:new").is_none());
    assert!(engine.is_empty());
    assert!(seen.lock().is_empty());
}

// ── Masks ────────────────────────────────────────────────────────────

#[test]
fn mask_watcher_matches_whole_oid() {
    let engine = setup();
    let (seen, cb) = recorder();
    engine.watch("sensor:env/*", cb, false);
    for oid in ["sensor:env/temp1", "sensor:env/temp2", "sensor:room/temp1"] {
        engine.apply_update(record(json!({"oid": oid, "status": 1})), false);
    }
    let oids: Vec<String> = seen
        .lock()
        .iter()
        .map(|s| s.as_ref().unwrap().oid.clone())
        .collect();
    assert_eq!(oids, vec!["sensor:env/temp1", "sensor:env/temp2"]);
    assert_eq!(engine.states_by_mask("sensor:*").len(), 3);
}

// ── Clear ────────────────────────────────────────────────────────────

#[test]
fn record_after_clear_is_accepted_unconditionally() {
    let engine = setup();
    let (seen, cb) = recorder();
    engine.apply_update(record(json!({"oid": "x", "status": 1, "ieid": [1, 5]})), false);
    engine.watch("x", cb, true);

    engine.clear_state("x");
    let cleared = engine.state("x").unwrap();
    assert_eq!(cleared.status, Some(None));
    assert_eq!(cleared.value, Some(Value::Null));

    assert!(engine.apply_update(record(json!({"oid": "x", "status": 1, "ieid": [1, 2]})), true));
    assert_eq!(engine.state("x").unwrap().status(), Some(1));
    // Watchers saw the transition to unavailable, then the new record.
    assert_eq!(seen.lock().len(), 2);
}

// ── Watchers ─────────────────────────────────────────────────────────

#[test]
fn panicking_watcher_does_not_block_others() {
    let engine = setup();
    engine.watch(
        "x",
        Arc::new(|_: Option<Arc<ItemState>>| panic!("watcher failure")),
        true,
    );
    let (hits, cb) = counter();
    engine.watch("x", cb, true);

    assert!(engine.apply_update(record(json!({"oid": "x", "status": 1})), false));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state("x").unwrap().status(), Some(1));
}

#[test]
fn unwatch_by_instance_key_and_all() {
    let engine = setup();
    let (a, cb_a) = counter();
    let (b, cb_b) = counter();
    engine.watch("x", Arc::clone(&cb_a), true);
    engine.watch("x", cb_b, true);

    engine.unwatch(Some("x"), Some(&cb_a));
    engine.apply_update(record(json!({"oid": "x", "status": 1})), false);
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);

    engine.unwatch(None, None);
    assert_eq!(engine.watcher_count(), 0);
}

#[test]
fn watch_before_data_then_update_then_duplicate() {
    let engine = setup();
    let (seen, cb) = recorder();

    engine.watch("x", cb, false);
    assert_eq!(seen.lock().len(), 1);
    assert!(seen.lock()[0].is_none());

    let rec = json!({"oid": "x", "status": 1, "value": 10, "ieid": [1, 1]});
    engine.apply_update(record(rec.clone()), false);
    assert_eq!(seen.lock().len(), 2);
    let delivered = seen.lock()[1].clone().unwrap();
    assert_eq!(delivered.status(), Some(1));
    assert_eq!(delivered.value(), Some(json!(10)));

    engine.apply_update(record(rec), true);
    assert_eq!(seen.lock().len(), 2);
}
