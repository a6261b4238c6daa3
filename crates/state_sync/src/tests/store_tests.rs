use std::{sync::Arc, thread};

use serde_json::json;

use super::*;

fn delta(value: Value) -> Delta {
    Delta::new(value).expect("delta")
}

#[test]
fn missing_paths_read_as_null() {
    let store = StateStore::new();
    assert_eq!(store.get("/printer_state/extruder/temperature"), Value::Null);
    store.merge(&delta(json!({"/printer_state/extruder": 5})));
    assert_eq!(store.get("/printer_state/extruder/temperature"), Value::Null);
    assert_eq!(store.get("/printer_state/heater_bed"), Value::Null);
    assert_eq!(store.get("/bad~path"), Value::Null);
}

#[test]
fn temperature_survives_target_update() {
    let store = StateStore::new();
    store.merge(&delta(json!({"/printer_state/extruder/temperature": 205})));
    assert_eq!(store.get("/printer_state/extruder/temperature"), json!(205));

    store.merge(&delta(json!({"/printer_state/extruder/target": 210})));
    assert_eq!(store.get("/printer_state/extruder/temperature"), json!(205));
    assert_eq!(store.get("/printer_state/extruder/target"), json!(210));
}

#[test]
fn unslashed_path_keys_read_back_in_either_form() {
    let store = StateStore::new();
    store.merge(&delta(json!({"printer_state/extruder/temperature": 205})));

    assert_eq!(store.get("printer_state/extruder/temperature"), json!(205));
    assert_eq!(store.get("/printer_state/extruder/temperature"), json!(205));
    assert_eq!(
        store.snapshot(),
        json!({"printer_state": {"extruder": {"temperature": 205}}})
    );

    store.merge(&delta(json!({"/printer_state/extruder/temperature": 210})));
    assert_eq!(store.get("printer_state/extruder/temperature"), json!(210));
}

#[test]
fn last_write_wins_per_path() {
    let store = StateStore::new();
    let updates = [
        json!({"/toolhead/position": [0, 0, 0, 0]}),
        json!({"/print_stats/state": "printing"}),
        json!({"toolhead": {"position": [10.5, 20, 0.2, 3]}}),
        json!({"/print_stats/state": "paused"}),
        json!({"/print_stats/filename": "benchy.gcode"}),
    ];
    for update in updates {
        store.merge(&delta(update));
    }
    assert_eq!(store.get("/toolhead/position"), json!([10.5, 20, 0.2, 3]));
    assert_eq!(store.get("/print_stats/state"), json!("paused"));
    assert_eq!(store.get("/print_stats/filename"), json!("benchy.gcode"));
    assert_eq!(store.revision(), 5);
}

#[test]
fn nested_merge_never_removes_siblings() {
    let store = StateStore::new();
    store.merge(&delta(json!({
        "printer_state": {
            "extruder": {"temperature": 30.1, "target": 0},
            "heater_bed": {"temperature": 22.0, "target": 0}
        }
    })));
    store.merge(&delta(json!({
        "printer_state": {"extruder": {"target": 215}}
    })));

    assert_eq!(store.get("/printer_state/extruder/temperature"), json!(30.1));
    assert_eq!(store.get("/printer_state/extruder/target"), json!(215));
    assert_eq!(
        store.get("/printer_state/heater_bed"),
        json!({"temperature": 22.0, "target": 0})
    );
}

#[test]
fn non_object_values_replace_wholesale() {
    let store = StateStore::new();
    store.merge(&delta(json!({"/toolhead/homed_axes": ["x", "y", "z"]})));
    store.merge(&delta(json!({"/toolhead/homed_axes": ["x"]})));
    assert_eq!(store.get("/toolhead/homed_axes"), json!(["x"]));

    store.merge(&delta(json!({"/webhooks/state": "ready"})));
    store.merge(&delta(json!({"/webhooks": {"state_message": "Printer is ready"}})));
    assert_eq!(store.get("/webhooks/state"), json!("ready"));

    store.merge(&delta(json!({"/webhooks/state/detail": "nested"})));
    assert_eq!(store.get("/webhooks/state"), json!({"detail": "nested"}));
    assert_eq!(store.get("/webhooks/state_message"), json!("Printer is ready"));
}

#[test]
fn array_elements_are_addressable_by_index() {
    let store = StateStore::new();
    store.merge(&delta(json!({"/toolhead/position": [1.0, 2.0, 3.5, 0.0]})));
    assert_eq!(store.get("/toolhead/position/2"), json!(3.5));
    assert_eq!(store.get("/toolhead/position/9"), Value::Null);
    assert_eq!(store.get("/toolhead/position/x"), Value::Null);
}

#[test]
fn integer_and_float_semantics_are_preserved() {
    let store = StateStore::new();
    store.merge(&delta(json!({"/printer_state/extruder": {"temperature": 204.7, "target": 205}})));
    assert!(store.get("/printer_state/extruder/target").is_i64());
    assert!(store.get("/printer_state/extruder/temperature").is_f64());
    assert_eq!(store.get_i64("/printer_state/extruder/temperature"), Some(204));
    assert_eq!(store.get_f64("/printer_state/extruder/target"), Some(205.0));
    assert_eq!(store.get_as::<u32>("/printer_state/extruder/target"), Some(205));
    assert_eq!(store.get_as::<String>("/printer_state/extruder/target"), None);
    assert_eq!(store.get_i64("/printer_state/missing"), None);
}

#[test]
fn snapshot_is_a_detached_copy() {
    let store = StateStore::new();
    store.merge(&delta(json!({"/a": 1})));
    let before = store.snapshot();
    store.merge(&delta(json!({"/a": 2})));
    assert_eq!(before, json!({"a": 1}));
    assert_eq!(store.snapshot(), json!({"a": 2}));
    assert!(store.contains("/a"));
}

#[test]
fn readers_never_observe_a_partial_merge() {
    let store = Arc::new(StateStore::new());
    store.merge(&delta(json!({"/pair": {"left": 0, "right": 0}})));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let pair = store.get("/pair");
                    assert_eq!(pair["left"], pair["right"], "torn read: {pair}");
                }
            })
        })
        .collect();

    for i in 1..=2_000 {
        store.merge(&delta(json!({"/pair/left": i, "/pair/right": i})));
    }
    for reader in readers {
        reader.join().expect("reader thread");
    }
    assert_eq!(store.get("/pair"), json!({"left": 2000, "right": 2000}));
}
