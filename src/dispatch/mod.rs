//! Signal naming and subscriber fan-out.

pub mod handler;
pub mod hooks;
pub mod registry;

pub use handler::{handler, same_handler, HandlerError, SampleHandler, SpawnHandler};
pub use hooks::{DiagnosticsSink, LogDeclarer, LogDiagnostics, SignalDeclarer};
pub use registry::{unique_name, Resolution, SignalEntry, SignalRegistry};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::ConnectionId;
use crate::decoder::{DecodeError, Sample};

/// Routes samples from every connection to the handlers subscribed by signal name.
///
/// A sample reaches handlers subscribed to its base key, then handlers subscribed to its
/// unique key when that differs. Subscriber lists are snapshotted before delivery, so
/// subscribe/unsubscribe from inside a handler is safe.
pub struct Dispatcher {
    registry: Arc<SignalRegistry>,
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn SampleHandler>>>>,
    declarer: Arc<dyn SignalDeclarer>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SignalRegistry>) -> Self {
        Self::with_hooks(registry, Arc::new(LogDeclarer), Arc::new(LogDiagnostics))
    }

    pub fn with_hooks(
        registry: Arc<SignalRegistry>,
        declarer: Arc<dyn SignalDeclarer>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            registry,
            subscribers: RwLock::new(HashMap::new()),
            declarer,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    /// Name the sample and deliver it. Returns the number of handler invocations.
    pub fn register_sample(&self, connection: &ConnectionId, sample: Sample) -> usize {
        let resolution = self.registry.resolve(connection, &sample.key);
        if resolution.created {
            let declarer = &self.declarer;
            let declared = panic::catch_unwind(AssertUnwindSafe(|| {
                declarer.declare(&resolution.unique_key, connection)
            }));
            if declared.is_err() {
                log::error!("Signal declaration hook panicked for {}", resolution.unique_key);
            }
        }

        let handlers = {
            let subscribers = self.subscribers.read();
            let mut handlers = subscribers.get(&sample.key).cloned().unwrap_or_default();
            if resolution.unique_key != sample.key {
                if let Some(unique) = subscribers.get(&resolution.unique_key) {
                    handlers.extend(unique.iter().cloned());
                }
            }
            handlers
        };

        for handler in &handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(connection, &sample)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Handler error for {}: {}", sample.key, e),
                Err(_) => log::error!("Handler panicked for {}", sample.key),
            }
        }
        handlers.len()
    }

    /// Forward a decode or read failure to diagnostics. Never affects dispatch.
    pub fn register_error(&self, connection: &ConnectionId, error: &DecodeError) {
        let diagnostics = &self.diagnostics;
        if panic::catch_unwind(AssertUnwindSafe(|| diagnostics.report(connection, error))).is_err() {
            log::error!("Diagnostics sink panicked on {}", error.kind);
        }
    }

    /// Add `handler` under `signal`. Returns false if this exact handler is already there.
    pub fn subscribe(&self, signal: &str, handler: Arc<dyn SampleHandler>) -> bool {
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(signal.to_string()).or_default();
        if list.iter().any(|existing| same_handler(existing, &handler)) {
            return false;
        }
        list.push(handler);
        log::debug!("Subscribed to {} ({} handlers)", signal, list.len());
        true
    }

    /// Remove `handler` from `signal`. Unknown signal or handler is a no-op returning false.
    pub fn unsubscribe(&self, signal: &str, handler: &Arc<dyn SampleHandler>) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(signal) else {
            return false;
        };
        let Some(pos) = list.iter().position(|existing| same_handler(existing, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            subscribers.remove(signal);
        }
        log::debug!("Unsubscribed from {}", signal);
        true
    }

    pub fn subscriber_count(&self, signal: &str) -> usize {
        self.subscribers.read().get(signal).map_or(0, Vec::len)
    }

    /// Every signal name declared so far, in declaration order.
    pub fn signals(&self) -> Vec<SignalEntry> {
        self.registry.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingDeclarer(Mutex<Vec<(String, ConnectionId)>>);

    impl SignalDeclarer for RecordingDeclarer {
        fn declare(&self, unique_key: &str, owner: &ConnectionId) {
            self.0.lock().push((unique_key.to_string(), *owner));
        }
    }

    #[derive(Default)]
    struct RecordingDiagnostics(Mutex<Vec<DecodeError>>);

    impl DiagnosticsSink for RecordingDiagnostics {
        fn report(&self, _connection: &ConnectionId, error: &DecodeError) {
            self.0.lock().push(error.clone());
        }
    }

    fn sample(key: &str, value: f64) -> Sample {
        Sample { key: key.into(), value, time: 0.0 }
    }

    fn counting() -> (Arc<dyn SampleHandler>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let h = handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (h, hits)
    }

    fn two_connections(dispatcher: &Dispatcher) -> (ConnectionId, ConnectionId) {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        dispatcher.registry().bind_connection(&a, 0);
        dispatcher.registry().bind_connection(&b, 1);
        (a, b)
    }

    #[test]
    fn test_declares_each_unique_key_once() {
        let declarer = Arc::new(RecordingDeclarer::default());
        let dispatcher = Dispatcher::with_hooks(
            Arc::new(SignalRegistry::new()),
            declarer.clone(),
            Arc::new(LogDiagnostics),
        );
        let (a, b) = two_connections(&dispatcher);

        dispatcher.register_sample(&a, sample("temp", 1.0));
        dispatcher.register_sample(&a, sample("temp", 2.0));
        dispatcher.register_sample(&b, sample("temp", 3.0));

        let declared = declarer.0.lock().clone();
        assert_eq!(declared, vec![("temp".to_string(), a), ("temp[1]".to_string(), b)]);
    }

    #[test]
    fn test_literal_suffix_key_is_declared_once() {
        let declarer = Arc::new(RecordingDeclarer::default());
        let dispatcher = Dispatcher::with_hooks(
            Arc::new(SignalRegistry::new()),
            declarer.clone(),
            Arc::new(LogDiagnostics),
        );
        let (a, b) = two_connections(&dispatcher);
        let (h, hits) = counting();
        dispatcher.subscribe("temp[1]", h);

        dispatcher.register_sample(&a, sample("temp[1]", 1.0));
        dispatcher.register_sample(&b, sample("temp", 2.0));

        let declared = declarer.0.lock().clone();
        assert_eq!(declared, vec![("temp[1]".to_string(), a), ("temp[2]".to_string(), b)]);
        // Only the device that sent "temp[1]" reaches that name.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fan_out_base_and_unique() {
        let dispatcher = Dispatcher::new(Arc::new(SignalRegistry::new()));
        let (_a, b) = two_connections(&dispatcher);

        let (both, both_hits) = counting();
        let (base_only, base_hits) = counting();
        let (unique_only, unique_hits) = counting();
        let (neither, neither_hits) = counting();
        dispatcher.subscribe("temp", both.clone());
        dispatcher.subscribe("temp[1]", both);
        dispatcher.subscribe("temp", base_only);
        dispatcher.subscribe("temp[1]", unique_only);
        dispatcher.subscribe("hum", neither);

        assert_eq!(dispatcher.register_sample(&b, sample("temp", 1.0)), 4);
        assert_eq!(both_hits.load(Ordering::SeqCst), 2);
        assert_eq!(base_hits.load(Ordering::SeqCst), 1);
        assert_eq!(unique_hits.load(Ordering::SeqCst), 1);
        assert_eq!(neither_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delivery_order_is_insertion_order() {
        let dispatcher = Dispatcher::new(Arc::new(SignalRegistry::new()));
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            dispatcher.subscribe(
                "k",
                handler(move |_, _| {
                    order.lock().push(tag);
                    Ok(())
                }),
            );
        }
        dispatcher.register_sample(&ConnectionId::new(), sample("k", 0.0));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_subscribe_is_rejected() {
        let dispatcher = Dispatcher::new(Arc::new(SignalRegistry::new()));
        let (h, hits) = counting();
        assert!(dispatcher.subscribe("k", h.clone()));
        assert!(!dispatcher.subscribe("k", h));
        dispatcher.register_sample(&ConnectionId::new(), sample("k", 0.0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dispatcher = Dispatcher::new(Arc::new(SignalRegistry::new()));
        let (h, hits) = counting();
        let (other, other_hits) = counting();
        dispatcher.subscribe("k", h.clone());
        dispatcher.subscribe("k", other);

        assert!(dispatcher.unsubscribe("k", &h));
        assert!(!dispatcher.unsubscribe("k", &h));
        assert!(!dispatcher.unsubscribe("missing", &h));
        assert_eq!(dispatcher.subscriber_count("k"), 1);

        dispatcher.register_sample(&ConnectionId::new(), sample("k", 0.0));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let dispatcher = Dispatcher::new(Arc::new(SignalRegistry::new()));
        dispatcher.subscribe("k", handler(|_, _| Err("boom".into())));
        dispatcher.subscribe("k", handler(|_, _| panic!("handler bug")));
        let (h, hits) = counting();
        dispatcher.subscribe("k", h);

        let id = ConnectionId::new();
        dispatcher.register_sample(&id, sample("k", 1.0));
        dispatcher.register_sample(&id, sample("k", 2.0));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SignalRegistry::new())));
        let slot: Arc<Mutex<Option<Arc<dyn SampleHandler>>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let dispatcher = Arc::downgrade(&dispatcher);
            let slot = slot.clone();
            let hits = hits.clone();
            handler(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let (Some(d), Some(me)) = (dispatcher.upgrade(), slot.lock().clone()) {
                    d.unsubscribe("k", &me);
                }
                Ok(())
            })
        };
        *slot.lock() = Some(h.clone());
        dispatcher.subscribe("k", h);

        let id = ConnectionId::new();
        dispatcher.register_sample(&id, sample("k", 1.0));
        dispatcher.register_sample(&id, sample("k", 2.0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count("k"), 0);
    }

    #[test]
    fn test_errors_go_to_diagnostics() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let dispatcher = Dispatcher::with_hooks(
            Arc::new(SignalRegistry::new()),
            Arc::new(LogDeclarer),
            diagnostics.clone(),
        );
        let error = DecodeError::device_read("unplugged");
        dispatcher.register_error(&ConnectionId::new(), &error);
        assert_eq!(*diagnostics.0.lock(), vec![error]);
        assert!(dispatcher.signals().is_empty());
    }
}
