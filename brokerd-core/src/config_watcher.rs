//! Watches the configuration file and requests a broker restart on change.
//!
//! File-system events arrive on the watcher's own thread and are forwarded
//! into a tokio task, which debounces rapid bursts (editors typically emit
//! several events per save) before poking the lifecycle coordinator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BrokerError, BrokerResult};
use crate::shell::ShellHandle;

const EVENT_QUEUE_DEPTH: usize = 100;
const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration file watcher feeding restart requests to the coordinator.
pub struct ConfigWatcher {
    /// Kept alive for the lifetime of the watcher; dropping it unregisters
    /// the file-system watches.
    _watcher: RecommendedWatcher,

    shutdown_tx: mpsc::Sender<()>,
    task_handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching `config_path`. The parent directory is watched too,
    /// to catch file moves and renames, and so a config file created after
    /// startup is still noticed.
    pub fn new<P: AsRef<Path>>(config_path: P, shell: ShellHandle) -> BrokerResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let mut watcher =
            notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
                if let Ok(event) = event {
                    let _ = event_tx.blocking_send(event);
                }
            })
            .map_err(|err| BrokerError::Config(format!("Failed to create file watcher: {err}")))?;

        let parent = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| {
                BrokerError::Config(format!(
                    "Configuration path \"{}\" has no parent directory to watch",
                    config_path.display()
                ))
            })?;
        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .map_err(|err| {
                BrokerError::Config(format!("Failed to watch configuration directory: {err}"))
            })?;

        // Best effort: the file itself may not exist yet.
        let _ = watcher.watch(&config_path, RecursiveMode::NonRecursive);

        let task_handle = tokio::spawn(dispatch_events(config_path, event_rx, shutdown_rx, shell));

        Ok(Self {
            _watcher: watcher,
            shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    /// Stop watching. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn dispatch_events(
    config_path: PathBuf,
    mut event_rx: mpsc::Receiver<Event>,
    mut shutdown_rx: mpsc::Receiver<()>,
    shell: ShellHandle,
) {
    let mut debounce = tokio::time::interval(DEBOUNCE_INTERVAL);
    let mut pending = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("Configuration watcher shutting down");
                break;
            }
            Some(event) = event_rx.recv() => {
                if is_config_change_event(&event, &config_path) {
                    pending = true;
                }
            }
            _ = debounce.tick() => {
                if pending {
                    pending = false;
                    tracing::info!(
                        "The broker configuration file has changed - requesting broker restart."
                    );
                    shell.notify_config_change();
                }
            }
        }
    }
}

fn is_config_change_event(event: &Event, config_path: &Path) -> bool {
    match event.kind {
        EventKind::Modify(_) | EventKind::Create(_) => {
            event.paths.iter().any(|path| path == config_path)
        }
        _ => false,
    }
}
