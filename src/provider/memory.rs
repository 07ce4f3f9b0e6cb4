//! In-memory provider.
//!
//! Serves descriptors held in process memory. Used for services declared
//! inline in the configuration file and by embedders that drive discovery
//! themselves.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};

use crate::provider::{Provider, ProviderError, ProviderEvent, RawServiceDescriptor, EVENT_BUFFER};

/// Provider whose state is replaced programmatically.
pub struct MemoryProvider {
    id: String,
    store: ArcSwap<Vec<RawServiceDescriptor>>,
    events: Arc<Mutex<Option<mpsc::Sender<ProviderEvent>>>>,
    stream: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
}

impl MemoryProvider {
    pub fn new(id: impl Into<String>, descriptors: Vec<RawServiceDescriptor>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            id: id.into(),
            store: ArcSwap::from_pointee(descriptors),
            events: Arc::new(Mutex::new(Some(tx))),
            stream: Mutex::new(Some(rx)),
        }
    }

    /// Replace the whole state and signal the change.
    pub fn replace(&self, descriptors: Vec<RawServiceDescriptor>) {
        self.store.store(Arc::new(descriptors));
        self.signal();
    }

    /// Signal without changing anything (periodic resync).
    pub fn resync(&self) {
        self.signal();
    }

    /// Close the event stream; the provider is gone from then on.
    pub fn close(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn signal(&self) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            if tx.try_send(ProviderEvent::now(&self.id)).is_err() {
                tracing::trace!(provider = %self.id, "Event stream full or closed, signal dropped");
            }
        }
    }
}

impl Provider for MemoryProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self, mut stop: broadcast::Receiver<()>) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ProviderError::AlreadyStarted(self.id.clone()))?;

        // announce the initial state
        self.signal();

        let events = Arc::clone(&self.events);
        let id = self.id.clone();
        tokio::spawn(async move {
            let _ = stop.recv().await;
            events.lock().unwrap_or_else(PoisonError::into_inner).take();
            tracing::debug!(provider = %id, "Memory provider stopped");
        });

        tracing::info!(provider = %self.id, services = self.store.load().len(), "Memory provider started");
        Ok(stream)
    }

    fn current_state(&self) -> Vec<RawServiceDescriptor> {
        self.store.load_full().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> RawServiceDescriptor {
        RawServiceDescriptor {
            name: name.into(),
            rule: "PathPrefix:/".into(),
            endpoints: vec![],
            middlewares: vec![],
            priority: 0,
            affinity_cookie: None,
        }
    }

    #[tokio::test]
    async fn test_start_signals_and_replace_updates_state() {
        let provider = MemoryProvider::new("mem", vec![descriptor("a")]);
        let (stop_tx, _) = broadcast::channel(1);
        let mut events = provider.start(stop_tx.subscribe()).unwrap();

        assert_eq!(events.recv().await.unwrap().source, "mem");

        provider.replace(vec![descriptor("a"), descriptor("b")]);
        assert!(events.recv().await.is_some());
        assert_eq!(provider.current_state().len(), 2);
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let provider = MemoryProvider::new("mem", vec![]);
        let (stop_tx, _) = broadcast::channel(1);
        let _events = provider.start(stop_tx.subscribe()).unwrap();
        assert!(matches!(
            provider.start(stop_tx.subscribe()),
            Err(ProviderError::AlreadyStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_and_close_end_the_stream() {
        let provider = MemoryProvider::new("mem", vec![]);
        let (stop_tx, _) = broadcast::channel(1);
        let mut events = provider.start(stop_tx.subscribe()).unwrap();
        events.recv().await.unwrap();

        stop_tx.send(()).unwrap();
        assert!(events.recv().await.is_none());

        let other = MemoryProvider::new("other", vec![]);
        let mut events = other.start(stop_tx.subscribe()).unwrap();
        events.recv().await.unwrap();
        other.close();
        assert!(events.recv().await.is_none());
    }
}
