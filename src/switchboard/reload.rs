//! Rebuild loop.
//!
//! Consumes rebuild triggers one at a time: snapshot every live provider,
//! compile against the active table, publish. A trigger arriving while a
//! rebuild runs waits in the capacity-one channel, so rebuilds are serial
//! and bursts collapse into at most one pending rebuild.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::observability::metrics;
use crate::provider::{Provider, ProviderRegistry, ProviderSnapshot, RebuildTrigger};
use crate::routing::{compile, Compilation, FragmentError};
use crate::switchboard::{Switchboard, SwitchboardError};

/// Id of the first generation.
pub const INITIAL_GENERATION: u64 = 1;

/// What one rebuild did.
#[derive(Debug)]
pub enum RebuildOutcome {
    /// A new generation is active.
    Published { generation: u64, routes: usize, errors: Vec<FragmentError> },
    /// Provider state equals the state of the active generation.
    Unchanged,
    /// Every fragment failed; the active generation was kept.
    Rejected { errors: Vec<FragmentError> },
}

impl RebuildOutcome {
    fn label(&self) -> &'static str {
        match self {
            RebuildOutcome::Published { .. } => "published",
            RebuildOutcome::Unchanged => "unchanged",
            RebuildOutcome::Rejected { .. } => "rejected",
        }
    }
}

fn snapshot(providers: &[Arc<dyn Provider>], registry: &ProviderRegistry) -> Vec<ProviderSnapshot> {
    providers
        .iter()
        .filter(|p| registry.is_live(p.id()))
        .map(|p| ProviderSnapshot {
            provider: p.id().to_string(),
            descriptors: p.current_state(),
        })
        .collect()
}

/// Compile the first generation from the providers' current state.
pub fn initial_compilation(
    providers: &[Arc<dyn Provider>],
    registry: &ProviderRegistry,
) -> (Compilation, Vec<ProviderSnapshot>) {
    let snapshots = snapshot(providers, registry);
    let compilation = compile(&snapshots, None, INITIAL_GENERATION);
    (compilation, snapshots)
}

/// Serial rebuilder feeding the switchboard.
pub struct Reloader {
    switchboard: Arc<Switchboard>,
    providers: Vec<Arc<dyn Provider>>,
    registry: ProviderRegistry,
    applied: Vec<ProviderSnapshot>,
}

impl Reloader {
    /// `applied` is the snapshot the active generation was compiled from.
    pub fn new(
        switchboard: Arc<Switchboard>,
        providers: Vec<Arc<dyn Provider>>,
        registry: ProviderRegistry,
        applied: Vec<ProviderSnapshot>,
    ) -> Self {
        Self {
            switchboard,
            providers,
            registry,
            applied,
        }
    }

    /// Run one rebuild now.
    pub fn rebuild(&mut self) -> Result<RebuildOutcome, SwitchboardError> {
        let snapshots = snapshot(&self.providers, &self.registry);
        if snapshots == self.applied {
            metrics::record_rebuild("unchanged", 0);
            return Ok(RebuildOutcome::Unchanged);
        }

        let current = self.switchboard.current();
        let Compilation { table, errors } = compile(&snapshots, Some(current.table()), self.switchboard.next_generation_id());

        let outcome = if table.is_empty() && !errors.is_empty() {
            tracing::warn!(
                errors = errors.len(),
                generation = current.id(),
                "Every service failed to compile, keeping active generation"
            );
            RebuildOutcome::Rejected { errors }
        } else {
            let routes = table.len();
            let generation = self.switchboard.publish(table)?;
            self.applied = snapshots;
            RebuildOutcome::Published {
                generation,
                routes,
                errors,
            }
        };

        let error_count = match &outcome {
            RebuildOutcome::Published { errors, .. } | RebuildOutcome::Rejected { errors } => errors.len(),
            RebuildOutcome::Unchanged => 0,
        };
        metrics::record_rebuild(outcome.label(), error_count);
        Ok(outcome)
    }

    /// Rebuild on every trigger until `stop` fires, the trigger channel
    /// closes, or the switchboard closes.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<RebuildTrigger>, mut stop: broadcast::Receiver<()>) {
        loop {
            let trigger = tokio::select! {
                _ = stop.recv() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            tracing::debug!(events = trigger.events, sources = ?trigger.sources, "Rebuild triggered");
            match self.rebuild() {
                Ok(RebuildOutcome::Published { generation, routes, errors }) => {
                    tracing::info!(generation, routes, fragment_errors = errors.len(), "Rebuild published");
                }
                Ok(RebuildOutcome::Unchanged) => {
                    tracing::debug!("Provider state unchanged, rebuild skipped");
                }
                Ok(RebuildOutcome::Rejected { .. }) => {}
                Err(SwitchboardError::Closed) => break,
                Err(e) => tracing::error!(error = %e, "Failed to publish rebuild"),
            }
        }
        tracing::info!("Rebuild loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EndpointSpec, MemoryProvider, RawServiceDescriptor};
    use std::time::Duration;

    fn service(name: &str, rule: &str) -> RawServiceDescriptor {
        RawServiceDescriptor {
            name: name.to_string(),
            rule: rule.to_string(),
            endpoints: vec![EndpointSpec {
                address: "http://127.0.0.1:9000".to_string(),
                weight: 1,
            }],
            middlewares: vec![],
            priority: 0,
            affinity_cookie: None,
        }
    }

    fn setup(descriptors: Vec<RawServiceDescriptor>) -> (Arc<MemoryProvider>, Reloader, Arc<Switchboard>) {
        let provider = Arc::new(MemoryProvider::new("memory", descriptors));
        let registry = ProviderRegistry::new();
        registry.register("memory");
        let providers: Vec<Arc<dyn Provider>> = vec![provider.clone() as Arc<dyn Provider>];

        let (compilation, applied) = initial_compilation(&providers, &registry);
        let switchboard = Arc::new(Switchboard::new(compilation.table, Duration::from_secs(1)));
        let reloader = Reloader::new(Arc::clone(&switchboard), providers, registry, applied);
        (provider, reloader, switchboard)
    }

    #[tokio::test]
    async fn test_resync_is_a_no_op() {
        let (_provider, mut reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        assert_eq!(switchboard.current().id(), INITIAL_GENERATION);
        assert!(matches!(reloader.rebuild().unwrap(), RebuildOutcome::Unchanged));
        assert_eq!(switchboard.current().id(), INITIAL_GENERATION);
    }

    #[tokio::test]
    async fn test_change_publishes_new_generation() {
        let (provider, mut reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        provider.replace(vec![service("web", "PathPrefix:/"), service("api", "PathPrefix:/api")]);

        match reloader.rebuild().unwrap() {
            RebuildOutcome::Published { generation, routes, errors } => {
                assert_eq!(generation, 2);
                assert_eq!(routes, 2);
                assert!(errors.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(switchboard.current().table().len(), 2);
    }

    #[tokio::test]
    async fn test_all_invalid_keeps_active_generation() {
        let (provider, mut reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        provider.replace(vec![service("broken", "Nope:/")]);

        assert!(matches!(reloader.rebuild().unwrap(), RebuildOutcome::Rejected { .. }));
        assert_eq!(switchboard.current().id(), INITIAL_GENERATION);
        assert_eq!(switchboard.current().table().len(), 1);
    }

    #[tokio::test]
    async fn test_all_services_removed_publishes_empty_table() {
        let (provider, mut reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        provider.replace(vec![]);

        assert!(matches!(reloader.rebuild().unwrap(), RebuildOutcome::Published { routes: 0, .. }));
        assert!(switchboard.current().table().is_empty());
    }

    #[tokio::test]
    async fn test_gone_provider_routes_disappear() {
        let (_provider, mut reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        reloader.registry.mark_gone("memory");

        assert!(matches!(reloader.rebuild().unwrap(), RebuildOutcome::Published { routes: 0, .. }));
        assert!(switchboard.current().table().is_empty());
    }

    #[tokio::test]
    async fn test_run_processes_triggers() {
        let (provider, reloader, switchboard) = setup(vec![service("web", "PathPrefix:/")]);
        let (tx, rx) = mpsc::channel(1);
        let (stop_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(reloader.run(rx, stop_tx.subscribe()));

        provider.replace(vec![service("api", "PathPrefix:/api")]);
        tx.send(RebuildTrigger::manual("test")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(switchboard.current().id(), 2);
        assert!(switchboard.current().table().get("api@memory").is_some());
    }
}
