use client_core::{CommandSink, ConnectionError, ConnectionSettings};
use serde_json::json;
use state_sync::{Delta, Dispatcher};

use super::*;

fn offline_console() -> (Arc<Dispatcher>, Console) {
    let dispatcher = Dispatcher::shared();
    let connection = ConnectionManager::new(ConnectionSettings::default(), Arc::clone(&dispatcher))
        .expect("connection manager");
    let extruder = ExtruderPanel::attach(
        Arc::clone(&dispatcher),
        Arc::clone(&connection) as Arc<dyn CommandSink>,
        "/printer_state",
    )
    .expect("extruder panel");
    (
        dispatcher,
        Console {
            connection,
            extruder,
        },
    )
}

#[test]
fn parses_console_words() {
    assert_eq!(parse_line("   ").expect("empty"), ConsoleCommand::Empty);
    assert_eq!(parse_line("quit").expect("quit"), ConsoleCommand::Quit);
    assert_eq!(parse_line("extrude").expect("extrude"), ConsoleCommand::Extrude);
    assert_eq!(
        parse_line("temp 215").expect("temp"),
        ConsoleCommand::SetTemperature(215)
    );
    assert_eq!(parse_line("speed 25").expect("speed"), ConsoleCommand::Speed(25));
    assert_eq!(
        parse_line("show /printer_state/extruder").expect("show"),
        ConsoleCommand::Show("/printer_state/extruder".to_string())
    );
    assert_eq!(parse_line("show").expect("show"), ConsoleCommand::Show("/".to_string()));
}

#[test]
fn anything_else_is_gcode() {
    assert_eq!(
        parse_line("G28 X Y").expect("gcode"),
        ConsoleCommand::Gcode("G28 X Y".to_string())
    );
    assert_eq!(
        parse_line("extrude 10").expect("gcode"),
        ConsoleCommand::Gcode("extrude 10".to_string())
    );
}

#[test]
fn bad_numbers_are_errors() {
    let err = parse_line("temp hot").expect_err("not a number");
    assert!(err.to_string().contains("invalid temperature"));
}

#[test]
fn presets_are_matched_by_value() {
    assert_eq!(preset_index(&LENGTH_PRESETS, 25, "length").expect("preset"), 4);
    assert!(preset_index(&SPEED_PRESETS, 3, "speed").is_err());
}

#[test]
fn show_reads_the_store() {
    let (dispatcher, console) = offline_console();
    dispatcher.on_notification(
        Delta::new(json!({"printer_state": {"extruder": {"temperature": 42.5}}})).expect("delta"),
    );

    let Flow::Continue(Some(output)) = console
        .execute(ConsoleCommand::Show("/printer_state/extruder/temperature".into()))
        .expect("show")
    else {
        panic!("show prints a value");
    };
    assert_eq!(output, "42.5");
}

#[test]
fn gcode_while_disconnected_fails() {
    let (_dispatcher, console) = offline_console();
    let err = console
        .execute(ConsoleCommand::Gcode("G28".into()))
        .expect_err("disconnected");
    assert!(matches!(
        err.downcast_ref::<ConnectionError>(),
        Some(ConnectionError::ConnectionUnavailable { .. })
    ));
}

#[test]
fn selectors_update_the_extruder_view() {
    let (_dispatcher, console) = offline_console();
    console.execute(ConsoleCommand::Length(35)).expect("length");
    console.execute(ConsoleCommand::Speed(1)).expect("speed");

    let view = console.extruder.view();
    assert_eq!(view.length_mm(), 35);
    assert_eq!(view.speed_mm_s(), 1);
    assert!(console.execute(ConsoleCommand::Length(12)).is_err());
}

#[tokio::test]
async fn run_stops_at_quit() {
    let (_dispatcher, console) = offline_console();
    let input: &[u8] = b"length 20\nquit\nlength 5\n";

    run(input, &console).await.expect("console run");

    assert_eq!(console.extruder.view().length_mm(), 20);
}

#[test]
fn state_reports_the_panel() {
    let (dispatcher, console) = offline_console();
    dispatcher.on_notification(
        Delta::new(json!({"/printer_state/extruder/temperature": 200.0})).expect("delta"),
    );
    console.execute(ConsoleCommand::Foreground).expect("foreground");

    let Flow::Continue(Some(output)) = console.execute(ConsoleCommand::State).expect("state")
    else {
        panic!("state prints a summary");
    };
    assert!(output.starts_with("session=disconnected panel=shown extruder=Some(200.0)"));
    assert!(output.contains("motion=true length=10mm speed=5mm/s"));

    console.execute(ConsoleCommand::Background).expect("background");
    assert!(!console.extruder.view().foreground);
}
