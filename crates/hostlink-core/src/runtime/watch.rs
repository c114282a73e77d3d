use super::AgentRuntime;
use crate::config::ConfigLoader;
use crate::error::{AgentError, AgentResult};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Reloads the runtime when the configuration file changes
///
/// Dropping the watcher stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn spawn(
        path: PathBuf,
        loader: ConfigLoader,
        runtime: Arc<AgentRuntime>,
        token: CancellationToken,
    ) -> AgentResult<Self> {
        Self::spawn_with_debounce(path, loader, runtime, token, DEFAULT_DEBOUNCE)
    }

    pub fn spawn_with_debounce(
        path: PathBuf,
        loader: ConfigLoader,
        runtime: Arc<AgentRuntime>,
        token: CancellationToken,
        debounce: Duration,
    ) -> AgentResult<Self> {
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| AgentError::service(format!("Not a file: {}", path.display())))?;

        let (tx, mut rx) = mpsc::channel::<()>(10);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        // A full channel already has a reload pending
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "Config watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(|e| AgentError::service(format!("Failed to create config watcher: {e}")))?;

        // Watch the directory to catch editors that replace the file
        let watch_path = path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                AgentError::service(format!("Failed to watch {}: {e}", watch_path.display()))
            })?;

        let mut last_hash = content_hash(&path);
        let task_path = path.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }

                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                let hash = content_hash(&task_path);
                if hash.is_none() || hash == last_hash {
                    debug!("Configuration file unchanged");
                    continue;
                }

                match loader.load_path(&task_path) {
                    Ok(config) => {
                        info!(path = %task_path.display(), "Configuration changed, reloading");
                        runtime.reload(config).await;
                        last_hash = hash;
                    }
                    Err(e) => {
                        error!(
                            path = %task_path.display(),
                            error = %e,
                            "Failed to load updated configuration, keeping current configuration"
                        );
                    }
                }
            }
        });

        info!(path = %path.display(), "Watching configuration for changes");
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn content_hash(path: &Path) -> Option<[u8; 32]> {
    std::fs::read(path)
        .ok()
        .map(|content| Sha256::digest(&content).into())
}
