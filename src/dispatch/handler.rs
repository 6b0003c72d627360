use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::connection::ConnectionId;
use crate::decoder::Sample;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback.
///
/// Called synchronously from the dispatcher; must not block on I/O. Handlers that need to
/// do asynchronous work should enqueue it or go through [`SpawnHandler`].
pub trait SampleHandler: Send + Sync {
    fn handle(&self, connection: &ConnectionId, sample: &Sample) -> Result<(), HandlerError>;
}

impl<F> SampleHandler for F
where
    F: Fn(&ConnectionId, &Sample) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, connection: &ConnectionId, sample: &Sample) -> Result<(), HandlerError> {
        self(connection, sample)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler<F>(f: F) -> Arc<dyn SampleHandler>
where
    F: Fn(&ConnectionId, &Sample) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler identity is the allocation, not the value.
pub fn same_handler(a: &Arc<dyn SampleHandler>, b: &Arc<dyn SampleHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapter for async callbacks: each delivery spawns the future on a runtime.
///
/// Delivery is considered finished once the task is spawned; failures inside the task are
/// logged there.
pub struct SpawnHandler<F> {
    f: F,
    runtime: Handle,
}

impl<F, Fut> SpawnHandler<F>
where
    F: Fn(ConnectionId, Sample) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    /// Bind to the runtime of the calling context.
    pub fn new(f: F) -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::with_handle(f, Handle::try_current()?))
    }

    pub fn with_handle(f: F, runtime: Handle) -> Self {
        Self { f, runtime }
    }
}

impl<F, Fut> SampleHandler for SpawnHandler<F>
where
    F: Fn(ConnectionId, Sample) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, connection: &ConnectionId, sample: &Sample) -> Result<(), HandlerError> {
        let key = sample.key.clone();
        let fut = (self.f)(*connection, sample.clone());
        self.runtime.spawn(async move {
            if let Err(e) = fut.await {
                log::warn!("Async handler error for {}: {}", key, e);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Sample {
        Sample { key: "k".into(), value: 1.0, time: 0.0 }
    }

    #[test]
    fn test_closure_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let h = handler(move |_, s| {
            assert_eq!(s.key, "k");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        h.handle(&ConnectionId::new(), &sample()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity() {
        let a = handler(|_, _| Ok(()));
        let b = handler(|_, _| Ok(()));
        assert!(same_handler(&a, &a.clone()));
        assert!(!same_handler(&a, &b));
    }

    #[tokio::test]
    async fn test_spawn_handler_runs_future() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let h = SpawnHandler::new(move |conn: ConnectionId, s: Sample| {
            let tx = tx.clone();
            async move { tx.send((conn, s.value)).map_err(|_| HandlerError::from("receiver dropped")) }
        })
        .unwrap();
        let id = ConnectionId::new();
        h.handle(&id, &sample()).unwrap();
        assert_eq!(rx.recv().await, Some((id, 1.0)));
    }

    #[test]
    fn test_spawn_handler_needs_runtime() {
        let result = SpawnHandler::new(|_: ConnectionId, _: Sample| async { Ok::<(), HandlerError>(()) });
        assert!(result.is_err());
    }
}
