use serde_json::{Map, Value};

use super::types::*;

/// Outcome of running one policy against a line.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Success(Sample),
    /// `terminal` stops the policy chain even if later policies are enabled.
    Fail { error: DecodeError, terminal: bool },
    Skipped,
}

impl Attempt {
    fn fail(kind: DecodeErrorKind, line: &str) -> Self {
        Attempt::Fail { error: DecodeError::new(kind, line), terminal: false }
    }

    fn terminal(error: DecodeError) -> Self {
        Attempt::Fail { error, terminal: true }
    }
}

type Policy = fn(&str, &FormatConfig, f64) -> Attempt;

/// Fixed precedence: structured, then delimited, then line.
const POLICIES: [Policy; 3] = [structured, delimited, line];

/// Decode one trimmed, non-empty line.
///
/// Policies run in precedence order and the first success wins. A structured failure ends
/// the chain; other failures fall through and the last one is reported.
pub fn decode(line: &str, config: &FormatConfig, received_at: f64) -> Result<Sample, DecodeError> {
    reduce(POLICIES.iter().map(|policy| policy(line, config, received_at)), line)
}

/// Pick the first success, stop at a terminal failure, otherwise report the last failure.
pub fn reduce(attempts: impl IntoIterator<Item = Attempt>, line: &str) -> Result<Sample, DecodeError> {
    let mut last_error = None;
    for attempt in attempts {
        match attempt {
            Attempt::Success(sample) => return Ok(sample),
            Attempt::Fail { error, terminal: true } => return Err(error),
            Attempt::Fail { error, terminal: false } => last_error = Some(error),
            Attempt::Skipped => {}
        }
    }
    Err(last_error.unwrap_or_else(|| DecodeError::new(DecodeErrorKind::NoPolicyEnabled, line)))
}

pub fn structured(line: &str, config: &FormatConfig, received_at: f64) -> Attempt {
    let Some(format) = config.structured.as_ref() else {
        return Attempt::Skipped;
    };

    let record: Map<String, Value> = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Attempt::terminal(
                DecodeError::new(DecodeErrorKind::DecodeSyntax, line)
                    .with_detail(format!("expected an object, got {}", json_type(&other))),
            )
        }
        Err(e) => {
            return Attempt::terminal(
                DecodeError::new(DecodeErrorKind::DecodeSyntax, line).with_detail(e.to_string()),
            )
        }
    };

    let key = record.get(&format.key_field).and_then(json_key);
    let value = record.get(&format.value_field).and_then(json_number);
    let (Some(key), Some(value)) = (key, value) else {
        let missing = if record.get(&format.key_field).and_then(json_key).is_none() {
            &format.key_field
        } else {
            &format.value_field
        };
        return Attempt::terminal(
            DecodeError::new(DecodeErrorKind::MissingField, line).with_detail(missing.clone()),
        );
    };

    let time = format
        .time_field
        .as_ref()
        .and_then(|field| record.get(field))
        .and_then(json_number)
        .unwrap_or(received_at);

    Attempt::Success(Sample { key, value, time })
}

pub fn delimited(line: &str, config: &FormatConfig, received_at: f64) -> Attempt {
    let Some(format) = config.delimited.as_ref() else {
        return Attempt::Skipped;
    };

    let parts: Vec<&str> = if format.delimiter.is_empty() {
        vec![line]
    } else {
        line.split(format.delimiter.as_str()).collect()
    };
    let field = |index: Option<usize>| index.and_then(|i| parts.get(i).copied()).map(str::trim);

    let Some(raw_value) = field(format.value_index) else {
        return Attempt::fail(DecodeErrorKind::IndexOutOfRange, line);
    };
    let Some(value) = parse_number(raw_value) else {
        return Attempt::fail(DecodeErrorKind::ValueParse, line);
    };

    let key = field(format.key_index)
        .unwrap_or(config.fallback_key.as_str())
        .to_string();
    let time = field(format.time_index).and_then(parse_number).unwrap_or(received_at);

    Attempt::Success(Sample { key, value, time })
}

pub fn line(line: &str, config: &FormatConfig, received_at: f64) -> Attempt {
    if !config.line {
        return Attempt::Skipped;
    }
    match parse_number(line) {
        Some(value) => Attempt::Success(Sample {
            key: config.fallback_key.clone(),
            value,
            time: received_at,
        }),
        None => Attempt::fail(DecodeErrorKind::ValueParse, line),
    }
}

/// Locale-independent decimal parse. Empty, whitespace-only and non-finite input is rejected.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn json_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
