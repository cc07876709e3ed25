//! Managed proxy file watcher.
//!
//! Re-reads the proxy configuration whenever it changes on disk and sends
//! the re-parsed table to the consumer. Never writes.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::controller::cycle::read_table_from;
use crate::controller::storage::FsStorage;
use crate::observability::metrics;
use crate::table::{ListenerPolicy, RouteTable};

/// A watcher that monitors the managed proxy file for changes.
pub struct TableWatcher {
    path: PathBuf,
    policy: ListenerPolicy,
    update_tx: mpsc::UnboundedSender<RouteTable>,
}

impl TableWatcher {
    /// Create a new TableWatcher.
    ///
    /// Returns the watcher and a receiver for re-parsed tables.
    pub fn new(path: &Path, policy: ListenerPolicy) -> (Self, mpsc::UnboundedReceiver<RouteTable>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                policy,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// (write to temp, rename) and deletions are both observed.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let file_name = self.path.file_name().map(|name| name.to_os_string());
        let policy = self.policy.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove();
                    // Only the parent directory is watched; match by file name.
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|name| name.to_os_string()) == file_name);
                    if !relevant || !ours {
                        return;
                    }
                    tracing::info!(path = ?path, "Proxy file change detected, re-reading");
                    match read_table_from(&FsStorage, &path, &policy) {
                        Ok(table) => {
                            metrics::record_reload(true);
                            let _ = tx.send(table);
                        }
                        Err(e) => {
                            metrics::record_reload(false);
                            tracing::error!("Failed to re-read proxy file: {}. Keeping previous table.", e);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Proxy file watcher started");
        Ok(watcher)
    }
}
