use serialcast_lib::config::ConnectionRequest;
use serialcast_lib::decoder::{decode, DecodeErrorKind, FormatConfig};

fn format_from(request: &str) -> FormatConfig {
    let (_, _, format) = ConnectionRequest::from_json(request).unwrap().into_parts().unwrap();
    format
}

#[test]
fn test_bare_number_uses_line_key() {
    let format = format_from(r#"{"line_enable": true, "line_key": "arduino"}"#);
    let sample = decode("23.5", &format, 1_700_000_000.25).unwrap();
    assert_eq!(sample.key, "arduino");
    assert_eq!(sample.value, 23.5);
    assert_eq!(sample.time, 1_700_000_000.25);
}

#[test]
fn test_delimited_key_and_value() {
    let format = format_from(r#"{"line_enable": false, "csv_enable": true, "csv_delimiter": ",", "csv_key_index": 0, "csv_value_index": 1}"#);
    let sample = decode("temp,21.3", &format, 5.0).unwrap();
    assert_eq!((sample.key.as_str(), sample.value, sample.time), ("temp", 21.3, 5.0));

    assert_eq!(decode("temp", &format, 5.0).unwrap_err().kind, DecodeErrorKind::IndexOutOfRange);
    assert_eq!(decode("temp,warm", &format, 5.0).unwrap_err().kind, DecodeErrorKind::ValueParse);
}

#[test]
fn test_delimited_time_column() {
    let format = format_from(r#"{"line_enable": "", "csv_enable": "on", "csv_delimiter": ";", "csv_time_index": "2"}"#);
    let sample = decode("hum;55;12.5", &format, 99.0).unwrap();
    assert_eq!((sample.key.as_str(), sample.value, sample.time), ("hum", 55.0, 12.5));
}

#[test]
fn test_structured_fields() {
    let format = format_from(r#"{"json_enable": true, "json_key_field": "k", "json_value_field": "v"}"#);
    let sample = decode(r#"{"k":"hum","v":55}"#, &format, 1.0).unwrap();
    assert_eq!((sample.key.as_str(), sample.value), ("hum", 55.0));

    let missing = decode(r#"{"v":55}"#, &format, 1.0).unwrap_err();
    assert_eq!(missing.kind, DecodeErrorKind::MissingField);
    assert_eq!(missing.raw_line, r#"{"v":55}"#);
}

#[test]
fn test_malformed_structured_line_never_falls_through() {
    // Line and delimited policies are enabled too; a structured failure still ends decoding.
    let format = format_from(r#"{"json_enable": true, "csv_enable": true, "line_key": "x"}"#);
    assert_eq!(decode("{broken", &format, 0.0).unwrap_err().kind, DecodeErrorKind::DecodeSyntax);
    assert_eq!(decode("42", &format, 0.0).unwrap_err().kind, DecodeErrorKind::DecodeSyntax);
    assert_eq!(decode(r#"{"key":"x"}"#, &format, 0.0).unwrap_err().kind, DecodeErrorKind::MissingField);
}

#[test]
fn test_delimited_failure_falls_back_to_line() {
    let format = format_from(r#"{"csv_enable": true, "line_key": "raw"}"#);
    let sample = decode("17", &format, 0.0).unwrap();
    assert_eq!((sample.key.as_str(), sample.value), ("raw", 17.0));
    assert_eq!(decode("temp,21", &format, 0.0).unwrap().key, "temp");
}

#[test]
fn test_nothing_enabled() {
    let format = format_from(r#"{"line_enable": false}"#);
    assert_eq!(decode("1", &format, 0.0).unwrap_err().kind, DecodeErrorKind::NoPolicyEnabled);
}
