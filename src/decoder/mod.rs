//! Line decoding: raw device text to a normalized [`Sample`] or a classified [`DecodeError`].
//!
//! Pure and synchronous. The connection reader calls it once per received line.

pub mod policy;
pub mod types;

pub use policy::{decode, parse_number, Attempt};
pub use types::*;

/// Current wall-clock time as epoch seconds.
pub fn receipt_time() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Decode with the current wall-clock time as the receipt timestamp.
pub fn decode_now(line: &str, config: &FormatConfig) -> Result<Sample, DecodeError> {
    decode(line, config, receipt_time())
}
