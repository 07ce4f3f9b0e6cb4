//! File provider with hot reload.
//!
//! Watches a TOML file of `[[services]]` descriptors. The parent directory is
//! watched so that editors replacing the file atomically are still noticed.
//! A file that fails to parse keeps the previous state in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

use crate::provider::{Provider, ProviderError, ProviderEvent, RawServiceDescriptor, EVENT_BUFFER};

#[derive(Debug, Default, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<RawServiceDescriptor>,
}

/// Load the descriptors declared in `path`.
pub fn load_services(path: &Path) -> Result<Vec<RawServiceDescriptor>, ProviderError> {
    let content = fs::read_to_string(path).map_err(|source| ProviderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ServicesFile = toml::from_str(&content).map_err(|source| ProviderError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.services)
}

/// Provider backed by a watched TOML file.
pub struct FileProvider {
    id: String,
    path: PathBuf,
    poll_interval: Duration,
    store: Arc<ArcSwap<Vec<RawServiceDescriptor>>>,
    started: AtomicBool,
}

impl FileProvider {
    /// Create the provider and load the file once.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, ProviderError> {
        let path = path.into();
        let services = load_services(&path)?;
        Ok(Self {
            id: id.into(),
            path,
            poll_interval,
            store: Arc::new(ArcSwap::from_pointee(services)),
            started: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn watch_target(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Provider for FileProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self, mut stop: broadcast::Receiver<()>) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProviderError::AlreadyStarted(self.id.clone()));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = self.id.clone();
        let path = self.path.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let store = Arc::clone(&self.store);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.paths.iter().any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !relevant || !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    match load_services(&path) {
                        Ok(services) => {
                            tracing::info!(provider = %id, services = services.len(), "Services file reloaded");
                            store.store(Arc::new(services));
                            let _ = tx.try_send(ProviderEvent::now(&id));
                        }
                        Err(e) => {
                            tracing::error!(provider = %id, error = %e, "Failed to reload services file, keeping current state");
                        }
                    }
                }
                Err(e) => tracing::error!(provider = %id, error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )
        .map_err(|source| ProviderError::Watch {
            path: self.path.clone(),
            source,
        })?;

        watcher
            .watch(&self.watch_target(), RecursiveMode::NonRecursive)
            .map_err(|source| ProviderError::Watch {
                path: self.path.clone(),
                source,
            })?;

        let id = self.id.clone();
        tokio::spawn(async move {
            let _ = stop.recv().await;
            // dropping the watcher drops its sender and closes the stream
            drop(watcher);
            tracing::debug!(provider = %id, "File provider stopped");
        });

        tracing::info!(provider = %self.id, path = ?self.path, "File provider started");
        Ok(rx)
    }

    fn current_state(&self) -> Vec<RawServiceDescriptor> {
        self.store.load_full().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE_SERVICE: &str = r#"
        [[services]]
        name = "web"
        rule = "PathPrefix:/"

        [[services.endpoints]]
        address = "http://127.0.0.1:3000"
    "#;

    const TWO_SERVICES: &str = r#"
        [[services]]
        name = "web"
        rule = "PathPrefix:/"

        [[services]]
        name = "api"
        rule = "PathPrefix:/api"
    "#;

    #[test]
    fn test_load_services() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ONE_SERVICE.as_bytes()).unwrap();
        let services = load_services(file.path()).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].endpoints[0].address, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_construction_fails_on_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[services]]\nname = 42").unwrap();
        assert!(matches!(
            FileProvider::new("file", file.path(), Duration::from_millis(50)),
            Err(ProviderError::Parse { .. })
        ));
        assert!(matches!(
            FileProvider::new("file", "/definitely/not/here.toml", Duration::from_millis(50)),
            Err(ProviderError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_modification_reloads_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.toml");
        fs::write(&path, ONE_SERVICE).unwrap();

        let provider = FileProvider::new("file", &path, Duration::from_millis(50)).unwrap();
        let (stop_tx, _) = broadcast::channel(1);
        let mut events = provider.start(stop_tx.subscribe()).unwrap();
        assert_eq!(provider.current_state().len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, TWO_SERVICES).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("reload event")
            .expect("stream open");
        assert_eq!(event.source, "file");
        assert_eq!(provider.current_state().len(), 2);

        stop_tx.send(()).unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "stream should close after stop");
    }
}
