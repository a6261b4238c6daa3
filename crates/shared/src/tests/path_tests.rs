use super::*;

#[test]
fn parses_with_and_without_leading_slash() {
    let with_slash = StatePath::parse("/printer_state/extruder/temperature").expect("path");
    let without = StatePath::parse("printer_state/extruder/temperature").expect("path");
    assert_eq!(with_slash, without);
    assert_eq!(
        with_slash.segments(),
        &["printer_state", "extruder", "temperature"]
    );
}

#[test]
fn empty_and_slash_are_root() {
    assert!(StatePath::parse("").expect("root").is_root());
    assert!(StatePath::parse("/").expect("root").is_root());
    assert_eq!(StatePath::root().to_string(), "/");
}

#[test]
fn unescapes_pointer_segments() {
    let path = StatePath::parse("/gcode_macro~1load/a~0b").expect("path");
    assert_eq!(path.segments(), &["gcode_macro/load", "a~b"]);
    assert_eq!(path.to_string(), "/gcode_macro~1load/a~0b");
}

#[test]
fn rejects_dangling_tilde() {
    let err = StatePath::parse("/bad~2").expect_err("must fail");
    assert!(matches!(err, ProtocolError::InvalidPath { .. }));
}

#[test]
fn join_and_parent_walk_the_tree() {
    let extruder = StatePath::parse("/printer_state/extruder").expect("path");
    let temperature = extruder.join("temperature");
    assert_eq!(temperature.to_string(), "/printer_state/extruder/temperature");
    assert_eq!(temperature.parent(), Some(extruder.clone()));
    assert_eq!(temperature.last(), Some("temperature"));
    assert!(temperature.starts_with(&extruder));
    assert!(StatePath::root().parent().is_none());
}

#[test]
fn serializes_as_string() {
    let path: StatePath = serde_json::from_str("\"/print_stats/state\"").expect("deserialize");
    assert_eq!(path.len(), 2);
    assert_eq!(
        serde_json::to_string(&path).expect("serialize"),
        "\"/print_stats/state\""
    );
}
