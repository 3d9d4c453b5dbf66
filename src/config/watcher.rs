//! File watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

/// Calls back whenever a single file is created or modified.
///
/// The parent directory is watched rather than the file itself, so
/// editors that save by renaming a temp file over the target are seen.
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start watching. The watcher stops when the returned handle is dropped.
    pub fn run<F>(self, on_change: F) -> Result<RecommendedWatcher, notify::Error>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let target = self.path.clone();
        let file_name = target.file_name().map(|n| n.to_os_string());
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let touches_target = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_target {
                        tracing::info!(path = ?target, "File change detected");
                        on_change(&target);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "File watcher started");
        Ok(watcher)
    }
}
