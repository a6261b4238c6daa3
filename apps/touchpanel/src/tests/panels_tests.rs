use client_core::{MissingCommandSink, SessionState};
use serde_json::json;

use super::*;

#[derive(Default)]
struct RecordingSink {
    scripts: Mutex<Vec<String>>,
}

impl CommandSink for RecordingSink {
    fn send_command(&self, script: &str) -> Result<(), ConnectionError> {
        self.scripts.lock().push(script.to_string());
        Ok(())
    }
}

fn status(partial: serde_json::Value) -> Delta {
    Delta::nested(&StatePath::parse("/printer_state").expect("path"), partial).expect("delta")
}

fn panel_with_sink() -> (Arc<Dispatcher>, Arc<RecordingSink>, Arc<ExtruderPanel>) {
    let dispatcher = Dispatcher::shared();
    let sink = Arc::new(RecordingSink::default());
    let panel = ExtruderPanel::attach(
        Arc::clone(&dispatcher),
        Arc::clone(&sink) as Arc<dyn CommandSink>,
        "/printer_state",
    )
    .expect("attach");
    (dispatcher, sink, panel)
}

#[test]
fn temperature_gate_follows_deltas() {
    let (dispatcher, _sink, panel) = panel_with_sink();
    assert!(!panel.view().motion_enabled);

    dispatcher.on_notification(status(json!({"extruder": {"temperature": 169.9}})));
    assert_eq!(panel.view().temperature, Some(169.9));
    assert!(!panel.view().motion_enabled);

    dispatcher.on_notification(status(json!({"extruder": {"temperature": 170.0, "target": 200.0}})));
    let view = panel.view();
    assert!(view.motion_enabled);
    assert_eq!(view.target, Some(200.0));

    dispatcher.on_notification(status(json!({"heater_bed": {"temperature": 60.0}})));
    assert_eq!(panel.view().temperature, Some(170.0));
}

#[test]
fn extrude_and_retract_use_selected_presets() {
    let (dispatcher, sink, panel) = panel_with_sink();
    dispatcher.on_notification(status(json!({"extruder": {"temperature": 210.0}})));

    panel.extrude().expect("extrude with defaults");
    panel.select_length(6).expect("length");
    panel.select_speed(0).expect("speed");
    panel.retract().expect("retract");

    assert_eq!(
        *sink.scripts.lock(),
        vec![
            "M83\nG1 E10 F300".to_string(),
            "M83\nG1 E-35 F60".to_string(),
        ]
    );
}

#[test]
fn cold_extruder_refuses_motion() {
    let (dispatcher, sink, panel) = panel_with_sink();
    dispatcher.on_notification(status(json!({"extruder": {"temperature": 25.0}})));

    let err = panel.extrude().expect_err("too cold");
    assert!(matches!(err, PanelError::TooCold { temperature: Some(t) } if t == 25.0));
    assert!(sink.scripts.lock().is_empty());
}

#[test]
fn temperature_presets_send_heater_commands() {
    let (_dispatcher, sink, panel) = panel_with_sink();

    panel.select_temperature(2).expect("preset");
    assert_eq!(panel.view().temperature_idx, Some(2));

    panel.set_target_temperature(215).expect("custom target");
    assert_eq!(panel.view().temperature_idx, None);

    assert!(matches!(
        panel.select_temperature(7),
        Err(PanelError::InvalidSelection { selector: "temperature", idx: 7 })
    ));
    assert_eq!(
        *sink.scripts.lock(),
        vec![
            "SET_HEATER_TEMPERATURE HEATER=extruder TARGET=200".to_string(),
            "SET_HEATER_TEMPERATURE HEATER=extruder TARGET=215".to_string(),
        ]
    );
}

#[test]
fn foreground_catches_up_from_the_store() {
    let (dispatcher, _sink, panel) = panel_with_sink();
    panel.detach();

    dispatcher.on_notification(status(json!({"extruder": {"temperature": 190.0, "target": 190.0}})));
    assert_eq!(panel.view().temperature, None);

    panel.foreground();
    let view = panel.view();
    assert!(view.foreground);
    assert!(view.motion_enabled);
    assert_eq!(view.temperature, Some(190.0));
    assert_eq!(view.target, Some(190.0));

    panel.background();
    assert!(!panel.view().foreground);
}

#[test]
fn unavailable_connection_is_reported() {
    let dispatcher = Dispatcher::shared();
    let panel = ExtruderPanel::attach(
        Arc::clone(&dispatcher),
        Arc::new(MissingCommandSink),
        "/printer_state",
    )
    .expect("attach");

    let err = panel.select_temperature(0).expect_err("no connection");
    assert!(matches!(
        err,
        PanelError::Command(ConnectionError::ConnectionUnavailable {
            state: SessionState::Disconnected
        })
    ));
    assert_eq!(panel.view().temperature_idx, None);
}

#[test]
fn dropping_the_panel_unregisters_it() {
    let (dispatcher, _sink, panel) = panel_with_sink();
    assert_eq!(dispatcher.consumer_count(), 1);

    drop(panel);
    assert_eq!(dispatcher.consumer_count(), 0);
    let report = dispatcher.on_notification(status(json!({"extruder": {"temperature": 1.0}})));
    assert_eq!(report.delivered, 0);
}

#[test]
fn status_log_counts_touched_objects() {
    let dispatcher = Dispatcher::shared();
    let log = Arc::new(StatusLog::new("/printer_state").expect("status log"));
    let token = dispatcher.register(&log);

    dispatcher.on_notification(status(json!({"extruder": {"temperature": 30.0}})));
    dispatcher.on_notification(status(json!({
        "extruder": {"temperature": 31.0},
        "print_stats": {"state": "printing"}
    })));
    dispatcher.on_notification(Delta::new(json!({"/events/notify_gcode_response": ["ok"]})).expect("delta"));

    let updates = log.updates();
    assert_eq!(updates.get("extruder"), Some(&2));
    assert_eq!(updates.get("print_stats"), Some(&1));
    assert_eq!(updates.len(), 2);

    assert!(dispatcher.unregister(token));
}

#[test]
fn out_of_range_presets_leave_the_selection_alone() {
    let (_dispatcher, _sink, panel) = panel_with_sink();

    assert!(matches!(
        panel.select_length(LENGTH_PRESETS.len()),
        Err(PanelError::InvalidSelection { selector: "length", .. })
    ));
    assert!(matches!(
        panel.select_speed(usize::MAX),
        Err(PanelError::InvalidSelection { selector: "speed", .. })
    ));

    let view = panel.view();
    assert_eq!(view.length_idx, 1);
    assert_eq!(view.speed_idx, 2);
    assert_eq!(view.length_mm(), 10);
    assert_eq!(view.speed_mm_s(), 5);
}
