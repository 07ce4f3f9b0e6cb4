//! Startup orchestration.
//!
//! # Responsibilities
//! - Build and start providers
//! - Compile the first generation before any traffic is accepted
//! - Start background tasks (aggregator, rebuild loop, admin API)
//! - Bind listeners and begin accepting traffic
//! - Tear everything down in order on termination
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including an empty first table
//! - Listeners start last (traffic only when ready)
//! - Shutdown: stop providers, stop accepting, drain, close

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{ConfigError, ProvidersConfig, ProxyConfig};
use crate::http::HttpServer;
use crate::lifecycle::{shutdown::Shutdown, signals};
use crate::net::listener::{bind, ListenerError};
use crate::net::tls::{load_tls_config, TlsError};
use crate::observability::metrics;
use crate::provider::{
    Aggregator, FileProvider, MemoryProvider, Provider, ProviderError, ProviderRegistry, RebuildTrigger,
};
use crate::switchboard::{initial_compilation, Reloader, ShutdownReport, Switchboard};

/// Id of the provider serving `providers.static_services`.
pub const STATIC_PROVIDER: &str = "static";

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error("no routes compiled at startup ({errors} invalid services)")]
    NoRoutes { errors: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the providers declared in the configuration.
pub fn build_providers(config: &ProvidersConfig) -> Result<Vec<Arc<dyn Provider>>, StartupError> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    if !config.static_services.is_empty() {
        providers.push(Arc::new(MemoryProvider::new(STATIC_PROVIDER, config.static_services.clone())));
    }
    for file in &config.file {
        let provider = FileProvider::new(
            file.name.clone(),
            PathBuf::from(&file.path),
            Duration::from_secs(file.poll_interval_secs),
        )?;
        providers.push(Arc::new(provider));
    }
    Ok(providers)
}

/// A running proxy.
pub struct Proxy {
    switchboard: Arc<Switchboard>,
    registry: ProviderRegistry,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown: Shutdown,
    shutdown_grace: Duration,
    triggers: mpsc::Sender<RebuildTrigger>,
    server_handle: Handle,
    admin_handle: Option<Handle>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Proxy {
    /// Start with the providers declared in `config`.
    pub async fn start(config: ProxyConfig) -> Result<Self, StartupError> {
        Self::start_with_providers(config, Vec::new()).await
    }

    /// Start with the configured providers plus `extra` ones supplied by an
    /// embedder.
    pub async fn start_with_providers(
        config: ProxyConfig,
        extra: Vec<Arc<dyn Provider>>,
    ) -> Result<Self, StartupError> {
        let mut providers = build_providers(&config.providers)?;
        providers.extend(extra);

        let shutdown = Shutdown::new();
        let aggregator = Aggregator::new(config.providers.debounce());
        for provider in &providers {
            aggregator.attach(provider.as_ref(), shutdown.subscribe())?;
        }
        let registry = aggregator.registry();

        let (compilation, applied) = initial_compilation(&providers, &registry);
        if compilation.table.is_empty() {
            return Err(StartupError::NoRoutes {
                errors: compilation.errors.len(),
            });
        }
        tracing::info!(
            providers = providers.len(),
            routes = compilation.table.len(),
            fragment_errors = compilation.errors.len(),
            "Initial route table compiled"
        );
        metrics::record_rebuild("published", compilation.errors.len());

        let switchboard = Arc::new(Switchboard::new(compilation.table, config.lifecycle.drain_grace()));

        let (triggers, trigger_rx) = mpsc::channel(1);
        tokio::spawn(aggregator.run(triggers.clone(), shutdown.subscribe()));
        let reloader = Reloader::new(Arc::clone(&switchboard), providers, registry.clone(), applied);
        tokio::spawn(reloader.run(trigger_rx, shutdown.subscribe()));

        let admin_handle;
        let admin_addr;
        if config.admin.enabled {
            let listener = bind(&config.admin.bind_address)?;
            admin_addr = Some(listener.local_addr()?);
            let handle = Handle::new();
            let app = setup_admin_router(AdminState {
                switchboard: Arc::clone(&switchboard),
                registry: registry.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
            });
            let server = axum_server::from_tcp(listener).handle(handle.clone());
            tokio::spawn(async move {
                if let Err(e) = server.serve(app.into_make_service()).await {
                    tracing::error!(error = %e, "Admin server failed");
                }
            });
            tracing::info!(address = ?admin_addr, "Admin API listening");
            admin_handle = Some(handle);
        } else {
            admin_handle = None;
            admin_addr = None;
        }

        let listener = bind(&config.listener.bind_address)?;
        let local_addr = listener.local_addr()?;
        let tls = match &config.listener.tls {
            Some(tls) => Some(load_tls_config(tls).await?),
            None => None,
        };
        let server_handle = Handle::new();
        let server = HttpServer::new(Arc::clone(&switchboard), &config);
        let server = tokio::spawn(server.serve(listener, tls, server_handle.clone()));

        Ok(Self {
            switchboard,
            registry,
            local_addr,
            admin_addr,
            shutdown,
            shutdown_grace: config.lifecycle.shutdown_grace(),
            triggers,
            server_handle,
            admin_handle,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn switchboard(&self) -> &Arc<Switchboard> {
        &self.switchboard
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Queue a rebuild outside the debounce path. Returns false when a
    /// rebuild is already pending.
    pub fn trigger_rebuild(&self, source: &str) -> bool {
        self.triggers.try_send(RebuildTrigger::manual(source)).is_ok()
    }

    /// Stop providers, stop accepting, and drain within the shutdown grace.
    pub async fn shutdown(self) -> ShutdownReport {
        tracing::info!(grace = ?self.shutdown_grace, "Shutting down");
        self.shutdown.trigger();
        self.server_handle.graceful_shutdown(Some(self.shutdown_grace));
        if let Some(handle) = &self.admin_handle {
            handle.graceful_shutdown(Some(self.shutdown_grace));
        }

        let report = self.switchboard.shutdown(self.shutdown_grace).await;
        match self.server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server exited with error"),
            Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        }
        report
    }
}

/// Run the proxy until SIGINT/SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let proxy = Proxy::start(config).await?;
    tracing::info!(address = %proxy.local_addr(), "Proxy ready");

    let waited = signals::wait_for_termination(|| {
        if !proxy.trigger_rebuild("sighup") {
            tracing::debug!("Rebuild already pending");
        }
    })
    .await;

    let report = proxy.shutdown().await;
    if !report.forced.is_empty() {
        tracing::warn!(generations = ?report.forced, "Requests were cut off at shutdown");
    }
    waited?;
    tracing::info!("Shutdown complete");
    Ok(())
}
