//! Connection requests and process-wide settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::decoder::{
    DelimitedFormat, FormatConfig, StructuredFormat, DEFAULT_DELIMITER, DEFAULT_KEY_FIELD,
    DEFAULT_TIME_FIELD, DEFAULT_VALUE_FIELD,
};
use crate::serial::interface::{PortChoice, DEFAULT_BAUD_RATE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A connect request as submitted by a host form or a JSON file.
///
/// Every field is optional and parsed leniently: numbers may arrive as strings, and a value
/// that cannot be interpreted is treated as missing, so the default applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRequest {
    pub serial_port: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub baudrate: Option<u32>,

    #[serde(deserialize_with = "lenient")]
    pub line_enable: Option<bool>,
    pub line_key: Option<String>,

    #[serde(deserialize_with = "lenient")]
    pub csv_enable: Option<bool>,
    pub csv_delimiter: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub csv_key_index: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub csv_value_index: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub csv_time_index: Option<i64>,

    #[serde(deserialize_with = "lenient")]
    pub json_enable: Option<bool>,
    pub json_key_field: Option<String>,
    pub json_value_field: Option<String>,
    pub json_time_field: Option<String>,
}

impl ConnectionRequest {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Validate and split into the port choice, baud rate and decoding configuration.
    pub fn into_parts(self) -> Result<(PortChoice, u32, FormatConfig)> {
        let port = PortChoice::parse(self.serial_port.as_deref().unwrap_or_default());

        let baudrate = self.baudrate.unwrap_or(DEFAULT_BAUD_RATE);
        if baudrate == 0 {
            return Err(ConfigError::Invalid("baudrate must be greater than zero".to_string()));
        }

        let fallback_key = non_empty(self.line_key).unwrap_or_else(random_key);
        let mut format = FormatConfig::disabled(fallback_key).with_line(self.line_enable.unwrap_or(true));

        if self.csv_enable.unwrap_or(false) {
            format = format.with_delimited(DelimitedFormat {
                delimiter: non_empty(self.csv_delimiter).unwrap_or_else(|| DEFAULT_DELIMITER.to_string()),
                key_index: index(self.csv_key_index, Some(0)),
                value_index: index(self.csv_value_index, Some(1)),
                time_index: index(self.csv_time_index, None),
            });
        }

        if self.json_enable.unwrap_or(false) {
            format = format.with_structured(StructuredFormat {
                key_field: non_empty(self.json_key_field).unwrap_or_else(|| DEFAULT_KEY_FIELD.to_string()),
                value_field: non_empty(self.json_value_field)
                    .unwrap_or_else(|| DEFAULT_VALUE_FIELD.to_string()),
                time_field: Some(
                    non_empty(self.json_time_field).unwrap_or_else(|| DEFAULT_TIME_FIELD.to_string()),
                ),
            });
        }

        if !format.any_enabled() {
            log::warn!("Connection request enables no format; every line will be reported as an error");
        }

        Ok((port, baudrate, format))
    }
}

/// Six hex characters, used when a request carries no line key.
pub fn random_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Missing values take `default`; negative ones mean "no column".
fn index(value: Option<i64>, default: Option<usize>) -> Option<usize> {
    match value {
        None => default,
        Some(i) => usize::try_from(i).ok(),
    }
}

trait Loose: Sized {
    fn from_loose(value: &Value) -> Option<Self>;
}

impl Loose for i64 {
    fn from_loose(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Loose for u32 {
    fn from_loose(value: &Value) -> Option<Self> {
        i64::from_loose(value).and_then(|v| u32::try_from(v).ok())
    }
}

impl Loose for bool {
    fn from_loose(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Some(true),
                "false" | "off" | "no" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Loose,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::from_loose(&value))
}

/// Process-wide settings shared by every connection and stream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub listen_addr: String,
    /// Capacity of each connection's sample and error queue.
    pub queue_capacity: usize,
    /// Sleep between polls of an idle device.
    pub idle_interval_ms: u64,
    /// Upper bound on one read, and on how late a stop request is noticed.
    pub read_timeout_ms: u64,
    /// Per-consumer outbound buffer; the oldest payload is dropped when full.
    pub stream_buffer: usize,
    pub stream_pacing_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8765".to_string(),
            queue_capacity: 1024,
            idle_interval_ms: 10,
            read_timeout_ms: 100,
            stream_buffer: 256,
            stream_pacing_ms: 30,
        }
    }
}

impl BridgeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings: Self = read_json(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be greater than zero".to_string()));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::Invalid("stream_buffer must be greater than zero".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn stream_pacing(&self) -> Duration {
        Duration::from_millis(self.stream_pacing_ms)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
