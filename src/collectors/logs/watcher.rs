// SPDX-License-Identifier: Apache-2.0

//! Filesystem-change subscription for tracked log directories.
//!
//! OS-level notifications (inotify / FSEvents / ReadDirectoryChangesW via the
//! `notify` crate) cover create, remove, and rename promptly; the periodic
//! scan ticker covers growth, which notification APIs miss on several
//! platforms. Both run at all times.

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use super::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Remove,
    Rename,
    Other,
}

#[derive(Debug)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub paths: Vec<PathBuf>,
}

/// Watches the parent directories of tracked files and yields classified
/// events on an async channel.
pub struct LogWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<FileEvent>,
    watched_dirs: Vec<PathBuf>,
}

impl LogWatcher {
    pub fn new() -> Result<Self, Error> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let kind = classify(&event.kind);
                if kind != FileEventKind::Other {
                    let _ = tx.send(FileEvent {
                        kind,
                        paths: event.paths,
                    });
                }
            }
        })
        .map_err(|e| Error::Watcher(e.to_string()))?;

        Ok(Self {
            watcher,
            rx,
            watched_dirs: Vec::new(),
        })
    }

    /// Watch the parent directory of a tracked file. Idempotent per directory.
    pub fn watch_parent(&mut self, file: &Path) {
        let Some(dir) = file.parent() else { return };
        if self.watched_dirs.iter().any(|d| d == dir) {
            return;
        }

        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                tracing::debug!(dir = %dir.display(), "Watching directory");
                self.watched_dirs.push(dir.to_path_buf());
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch directory");
            }
        }
    }

    pub async fn next(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

fn classify(kind: &EventKind) -> FileEventKind {
    match kind {
        EventKind::Create(_) => FileEventKind::Create,
        EventKind::Remove(_) => FileEventKind::Remove,
        EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Rename,
        _ => FileEventKind::Other,
    }
}
