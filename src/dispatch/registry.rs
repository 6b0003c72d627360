use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::connection::ConnectionId;

/// A declared signal name and the connection that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalEntry {
    pub unique_key: String,
    pub base_key: String,
    pub owner: ConnectionId,
}

/// Result of a lookup-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub unique_key: String,
    /// True only for the call that created the mapping.
    pub created: bool,
}

#[derive(Default)]
struct RegistryInner {
    ordinals: HashMap<ConnectionId, u64>,
    signals: HashMap<ConnectionId, HashMap<String, String>>,
    /// Unique name to the `(connection, base key)` it was handed to.
    assigned: HashMap<String, (ConnectionId, String)>,
    declared: Vec<SignalEntry>,
}

impl RegistryInner {
    fn is_taken(&self, name: &str) -> bool {
        self.assigned.contains_key(name)
    }
}

/// Process-wide mapping of `(connection, base key)` to a unique signal name.
///
/// Ordinal 0 keeps the base key; ordinal n > 0 yields `key[n]`. When that name is already
/// held by another pair (a device that sends `temp[1]` literally, say), the suffix is bumped
/// until a free name is found. Mappings are never reassigned and are retained after their
/// connection closes.
#[derive(Default)]
pub struct SignalRegistry {
    inner: Mutex<RegistryInner>,
}

pub fn unique_name(base_key: &str, ordinal: u64) -> String {
    if ordinal == 0 {
        base_key.to_string()
    } else {
        format!("{}[{}]", base_key, ordinal)
    }
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ordinal a connection was opened with. The first binding wins.
    pub fn bind_connection(&self, connection: &ConnectionId, ordinal: u64) {
        let mut inner = self.inner.lock();
        inner.ordinals.entry(*connection).or_insert(ordinal);
    }

    pub fn ordinal(&self, connection: &ConnectionId) -> Option<u64> {
        self.inner.lock().ordinals.get(connection).copied()
    }

    /// Look up or create the unique name for `base_key` on `connection`.
    ///
    /// An unbound connection is named as ordinal 0.
    pub fn resolve(&self, connection: &ConnectionId, base_key: &str) -> Resolution {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.signals.get(connection).and_then(|m| m.get(base_key)) {
            return Resolution { unique_key: existing.clone(), created: false };
        }

        let ordinal = match inner.ordinals.get(connection) {
            Some(ordinal) => *ordinal,
            None => {
                log::warn!("Connection {} has no ordinal, naming {} as ordinal 0", connection, base_key);
                0
            }
        };
        let mut unique_key = unique_name(base_key, ordinal);
        let mut suffix = ordinal;
        while inner.is_taken(&unique_key) {
            suffix += 1;
            unique_key = unique_name(base_key, suffix);
        }
        if suffix != ordinal {
            log::warn!(
                "Signal name {} was taken, {} on {} is published as {}",
                unique_name(base_key, ordinal),
                base_key,
                connection,
                unique_key
            );
        }
        inner
            .assigned
            .insert(unique_key.clone(), (*connection, base_key.to_string()));
        inner
            .signals
            .entry(*connection)
            .or_default()
            .insert(base_key.to_string(), unique_key.clone());
        inner.declared.push(SignalEntry {
            unique_key: unique_key.clone(),
            base_key: base_key.to_string(),
            owner: *connection,
        });

        Resolution { unique_key, created: true }
    }

    pub fn lookup(&self, connection: &ConnectionId, base_key: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.signals.get(connection).and_then(|m| m.get(base_key)).cloned()
    }

    /// Declared signals in creation order.
    pub fn entries(&self) -> Vec<SignalEntry> {
        self.inner.lock().declared.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
