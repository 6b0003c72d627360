use serde::{Deserialize, Serialize};

pub const DEFAULT_DELIMITER: &str = ",";
pub const DEFAULT_KEY_FIELD: &str = "key";
pub const DEFAULT_VALUE_FIELD: &str = "value";
pub const DEFAULT_TIME_FIELD: &str = "time";

/// One normalized telemetry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub key: String,
    pub value: f64,
    /// Epoch seconds. Receipt time when the device did not send one.
    pub time: f64,
}

/// Delimited-text policy: `key<delim>value[<delim>time]` with configurable positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelimitedFormat {
    pub delimiter: String,
    /// Falls back to the connection's fallback key when absent or out of range.
    pub key_index: Option<usize>,
    /// Absent means every line fails with `IndexOutOfRange`.
    pub value_index: Option<usize>,
    pub time_index: Option<usize>,
}

impl Default for DelimitedFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            key_index: Some(0),
            value_index: Some(1),
            time_index: None,
        }
    }
}

/// Structured-record policy: one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredFormat {
    pub key_field: String,
    pub value_field: String,
    pub time_field: Option<String>,
}

impl Default for StructuredFormat {
    fn default() -> Self {
        Self {
            key_field: DEFAULT_KEY_FIELD.to_string(),
            value_field: DEFAULT_VALUE_FIELD.to_string(),
            time_field: Some(DEFAULT_TIME_FIELD.to_string()),
        }
    }
}

/// Per-connection decoding configuration. Built once when the connection opens.
///
/// A policy is enabled when its entry is present (`line` for the bare-number policy).
/// `fallback_key` names samples from the line policy and delimited lines without a key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub fallback_key: String,
    pub line: bool,
    pub delimited: Option<DelimitedFormat>,
    pub structured: Option<StructuredFormat>,
}

impl FormatConfig {
    /// Only the bare-number policy, keyed by `fallback_key`.
    pub fn line_only(fallback_key: impl Into<String>) -> Self {
        Self {
            fallback_key: fallback_key.into(),
            line: true,
            delimited: None,
            structured: None,
        }
    }

    /// No policy enabled. Every line decodes to `NoPolicyEnabled` until one is added.
    pub fn disabled(fallback_key: impl Into<String>) -> Self {
        Self {
            fallback_key: fallback_key.into(),
            line: false,
            delimited: None,
            structured: None,
        }
    }

    pub fn with_line(mut self, enabled: bool) -> Self {
        self.line = enabled;
        self
    }

    pub fn with_delimited(mut self, format: DelimitedFormat) -> Self {
        self.delimited = Some(format);
        self
    }

    pub fn with_structured(mut self, format: StructuredFormat) -> Self {
        self.structured = Some(format);
        self
    }

    pub fn any_enabled(&self) -> bool {
        self.line || self.delimited.is_some() || self.structured.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    /// Structured policy: the line is not a JSON object.
    DecodeSyntax,
    /// Structured policy: key or value field absent or non-numeric value.
    MissingField,
    /// Delimited policy: value column missing.
    IndexOutOfRange,
    /// Delimited or line policy: value is not a number.
    ValueParse,
    NoPolicyEnabled,
    /// The device read itself failed; not produced by the decoder.
    DeviceRead,
}

impl DecodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeErrorKind::DecodeSyntax => "decode_syntax_error",
            DecodeErrorKind::MissingField => "missing_field",
            DecodeErrorKind::IndexOutOfRange => "index_out_of_range",
            DecodeErrorKind::ValueParse => "value_parse_error",
            DecodeErrorKind::NoPolicyEnabled => "no_policy_enabled",
            DecodeErrorKind::DeviceRead => "device_read_error",
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line (or read) that produced no sample. Routed to diagnostics, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {raw_line:?}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub raw_line: String,
    pub detail: Option<String>,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, raw_line: impl Into<String>) -> Self {
        Self {
            kind,
            raw_line: raw_line.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn device_read(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::DeviceRead, String::new()).with_detail(detail)
    }
}
