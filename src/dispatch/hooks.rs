use crate::connection::ConnectionId;
use crate::decoder::DecodeError;

/// Announces a newly observed unique signal name to the host. Called once per name.
pub trait SignalDeclarer: Send + Sync {
    fn declare(&self, unique_key: &str, owner: &ConnectionId);
}

/// Receives decode and device-read failures. Must not block.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, connection: &ConnectionId, error: &DecodeError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeclarer;

impl SignalDeclarer for LogDeclarer {
    fn declare(&self, unique_key: &str, owner: &ConnectionId) {
        log::info!("New signal {} (connection {})", unique_key, owner);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn report(&self, connection: &ConnectionId, error: &DecodeError) {
        match &error.detail {
            Some(detail) => log::warn!("{} | {}\t{}\t({})", connection, error.kind, error.raw_line, detail),
            None => log::warn!("{} | {}\t{}", connection, error.kind, error.raw_line),
        }
    }
}
