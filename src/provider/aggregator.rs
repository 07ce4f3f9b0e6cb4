//! Provider event aggregation.
//!
//! # Responsibilities
//! - Merge the event streams of every registered provider
//! - Debounce bursts into a single rebuild trigger
//! - Coalesce triggers while a rebuild is still pending
//! - Track which providers are alive
//!
//! # Design Decisions
//! - The debounce timer restarts on every event; a trigger fires only after
//!   a quiet window
//! - The trigger channel has capacity one: a full channel already guarantees
//!   a rebuild that will read the newest state, so nothing is lost by
//!   skipping the send
//! - A sink that is dropped marks its provider gone and schedules a rebuild
//!   so the provider's routes disappear

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::provider::{Provider, ProviderError, ProviderEvent};

/// Liveness of a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Active,
    Gone,
}

/// Registry entry for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub state: ProviderState,
    pub events: u64,
    pub last_event: Option<SystemTime>,
}

/// Shared view of every provider the aggregator has seen.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    inner: Arc<DashMap<String, ProviderStatus>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str) {
        self.inner.insert(
            id.to_string(),
            ProviderStatus {
                state: ProviderState::Active,
                events: 0,
                last_event: None,
            },
        );
    }

    pub fn record_event(&self, event: &ProviderEvent) {
        if let Some(mut status) = self.inner.get_mut(&event.source) {
            status.events += 1;
            status.last_event = Some(event.at);
        }
    }

    pub fn mark_gone(&self, id: &str) {
        if let Some(mut status) = self.inner.get_mut(id) {
            status.state = ProviderState::Gone;
        }
    }

    /// True while the provider is registered and its stream is open.
    pub fn is_live(&self, id: &str) -> bool {
        self.inner
            .get(id)
            .map(|s| s.state == ProviderState::Active)
            .unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<ProviderStatus> {
        self.inner.get(id).map(|s| s.value().clone())
    }

    /// All entries sorted by provider id.
    pub fn snapshot(&self) -> Vec<(String, ProviderStatus)> {
        let mut entries: Vec<_> = self
            .inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// "Rebuild now" signal emitted after a quiet window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildTrigger {
    /// Number of signals merged into this trigger.
    pub events: usize,
    /// Distinct providers that fired, sorted.
    pub sources: Vec<String>,
    pub at: SystemTime,
}

impl RebuildTrigger {
    /// A trigger not caused by any provider (e.g. SIGHUP).
    pub fn manual(source: impl Into<String>) -> Self {
        Self {
            events: 1,
            sources: vec![source.into()],
            at: SystemTime::now(),
        }
    }
}

#[derive(Debug)]
enum Signal {
    Event(ProviderEvent),
    Gone(String),
}

/// Write side handed to one provider. Dropping it marks the provider gone.
#[derive(Debug)]
pub struct EventSink {
    provider: String,
    tx: mpsc::UnboundedSender<Signal>,
}

impl EventSink {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Push a change signal. Returns false once the aggregator has stopped.
    pub fn push(&self, event: ProviderEvent) -> bool {
        self.tx.send(Signal::Event(event)).is_ok()
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Gone(self.provider.clone()));
    }
}

/// Merges provider signals into debounced rebuild triggers.
pub struct Aggregator {
    debounce: Duration,
    registry: ProviderRegistry,
    tx: mpsc::UnboundedSender<Signal>,
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl Aggregator {
    pub fn new(debounce: Duration) -> Self {
        Self::with_registry(debounce, ProviderRegistry::new())
    }

    pub fn with_registry(debounce: Duration, registry: ProviderRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            debounce,
            registry,
            tx,
            rx,
        }
    }

    pub fn registry(&self) -> ProviderRegistry {
        self.registry.clone()
    }

    /// Register a provider and return the sink it pushes events into.
    pub fn subscribe(&self, provider_id: &str) -> EventSink {
        self.registry.register(provider_id);
        EventSink {
            provider: provider_id.to_string(),
            tx: self.tx.clone(),
        }
    }

    /// Start `provider` and forward its stream into a fresh sink. When the
    /// stream closes the sink is dropped and the provider is marked gone.
    pub fn attach(&self, provider: &dyn Provider, stop: broadcast::Receiver<()>) -> Result<(), ProviderError> {
        let mut stream = provider.start(stop)?;
        let sink = self.subscribe(provider.id());

        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if !sink.push(event) {
                    return;
                }
            }
            tracing::warn!(provider = %sink.provider(), "Provider event stream closed, provider is gone");
        });
        Ok(())
    }

    /// Run until `stop` fires, every sink is gone, or the trigger receiver
    /// is dropped.
    pub async fn run(self, triggers: mpsc::Sender<RebuildTrigger>, mut stop: broadcast::Receiver<()>) {
        let Aggregator {
            debounce,
            registry,
            tx,
            mut rx,
        } = self;
        // only sinks keep the merged channel open from here on
        drop(tx);

        let mut open = true;
        while open {
            let first = tokio::select! {
                _ = stop.recv() => return,
                signal = rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let mut batch = Batch::default();
            batch.absorb(first, &registry);
            let mut deadline = Instant::now() + debounce;

            loop {
                tokio::select! {
                    _ = stop.recv() => return,
                    _ = sleep_until(deadline) => break,
                    signal = rx.recv(), if open => match signal {
                        Some(signal) => {
                            batch.absorb(signal, &registry);
                            deadline = Instant::now() + debounce;
                        }
                        None => open = false,
                    },
                }
            }

            let trigger = batch.into_trigger();
            match triggers.try_send(trigger) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(t)) => {
                    tracing::debug!(events = t.events, "Rebuild already pending, trigger coalesced");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Trigger receiver dropped, aggregator stopping");
                    return;
                }
            }
        }
        tracing::info!("All providers gone, aggregator stopping");
    }
}

#[derive(Debug, Default)]
struct Batch {
    events: usize,
    sources: BTreeSet<String>,
}

impl Batch {
    fn absorb(&mut self, signal: Signal, registry: &ProviderRegistry) {
        self.events += 1;
        match signal {
            Signal::Event(event) => {
                metrics::counter!("proxy_provider_events_total", "provider" => event.source.clone()).increment(1);
                registry.record_event(&event);
                self.sources.insert(event.source);
            }
            Signal::Gone(id) => {
                registry.mark_gone(&id);
                self.sources.insert(id);
            }
        }
    }

    fn into_trigger(self) -> RebuildTrigger {
        RebuildTrigger {
            events: self.events,
            sources: self.sources.into_iter().collect(),
            at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    const WINDOW: Duration = Duration::from_millis(200);

    fn channel() -> (mpsc::Sender<RebuildTrigger>, mpsc::Receiver<RebuildTrigger>) {
        mpsc::channel(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_produces_one_trigger() {
        let aggregator = Aggregator::new(WINDOW);
        let a = aggregator.subscribe("a");
        let b = aggregator.subscribe("b");
        let (stop_tx, _) = broadcast::channel(1);
        let (tx, mut rx) = channel();
        tokio::spawn(aggregator.run(tx, stop_tx.subscribe()));

        for _ in 0..3 {
            a.push(ProviderEvent::now("a"));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        b.push(ProviderEvent::now("b"));
        b.push(ProviderEvent::now("b"));

        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger.events, 5);
        assert_eq!(trigger.sources, vec!["a".to_string(), "b".to_string()]);

        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(second.is_err(), "no second trigger expected");
        drop((a, b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spread_events_produce_one_trigger_each() {
        let aggregator = Aggregator::new(WINDOW);
        let sink = aggregator.subscribe("a");
        let (stop_tx, _) = broadcast::channel(1);
        let (tx, mut rx) = channel();
        tokio::spawn(aggregator.run(tx, stop_tx.subscribe()));

        let mut received = 0;
        for _ in 0..4 {
            sink.push(ProviderEvent::now("a"));
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Ok(trigger) = rx.try_recv() {
                assert_eq!(trigger.events, 1);
                received += 1;
            }
        }
        assert_eq!(received, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_trigger_is_coalesced() {
        let aggregator = Aggregator::new(WINDOW);
        let sink = aggregator.subscribe("a");
        let (stop_tx, _) = broadcast::channel(1);
        let (tx, mut rx) = channel();
        tokio::spawn(aggregator.run(tx, stop_tx.subscribe()));

        // nobody reads while three windows elapse
        for _ in 0..3 {
            sink.push(ProviderEvent::now("a"));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sink_marks_provider_gone() {
        let aggregator = Aggregator::new(WINDOW);
        let registry = aggregator.registry();
        let sink = aggregator.subscribe("a");
        let (stop_tx, _) = broadcast::channel(1);
        let (tx, mut rx) = channel();
        let handle = tokio::spawn(aggregator.run(tx, stop_tx.subscribe()));

        assert!(registry.is_live("a"));
        drop(sink);

        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger.sources, vec!["a".to_string()]);
        assert!(!registry.is_live("a"));
        assert_eq!(registry.get("a").unwrap().state, ProviderState::Gone);

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_forwards_provider_events() {
        let aggregator = Aggregator::new(WINDOW);
        let registry = aggregator.registry();
        let provider = MemoryProvider::new("memory", vec![]);
        let (stop_tx, _) = broadcast::channel(1);
        aggregator.attach(&provider, stop_tx.subscribe()).unwrap();

        let (tx, mut rx) = channel();
        tokio::spawn(aggregator.run(tx, stop_tx.subscribe()));

        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.sources, vec!["memory".to_string()]);

        provider.resync();
        let resync = rx.recv().await.unwrap();
        assert_eq!(resync.events, 1);
        assert_eq!(registry.get("memory").unwrap().events, 2);
    }
}
