//! File watching for manifest changes.
//!
//! Watches the directory holding the manifest rather than the file itself,
//! so editors that save by renaming a temp file over it are still seen.
//! Events are debounced to collapse a burst of writes into one reload.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::warn;

/// Debounce window for manifest edits.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Emits `()` each time the watched manifest changes.
pub struct ManifestWatcher {
    // Dropping the debouncer stops the watch.
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: mpsc::Receiver<()>,
}

impl ManifestWatcher {
    /// Start watching `manifest`.
    ///
    /// # Errors
    ///
    /// Returns error if the path has no file name or the watch cannot be
    /// set up.
    pub fn new(manifest: &Path, debounce: Duration) -> Result<Self> {
        let file_name = manifest
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("{} is not a file path", manifest.display()))?;
        let dir = manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let (tx, rx) = mpsc::channel(16);

        let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                if events
                    .iter()
                    .any(|e| e.path.file_name() == Some(file_name.as_os_str()))
                {
                    let _ = tx.blocking_send(());
                }
            }
            Err(e) => warn!(error = %e, "File watch error"),
        })
        .context("Failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Wait for the next change. `None` once the watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
