// SPDX-License-Identifier: Apache-2.0

//! Log file tailing.
//!
//! A single long-lived task owns the tracked-file table. Discovery combines a
//! startup glob expansion, a periodic re-scan, and filesystem notifications
//! for create/remove/rename; growth is read on the scan ticker. File reads
//! run on the blocking pool so chunked I/O and pacing never stall the
//! runtime. Records from one file reach the bus in file order.

pub mod finder;
pub mod parser;
pub mod patterns;
pub mod position;
pub mod reader;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedSender, SendError};
use crate::collectors::{Collector, HealthHandle, TaskResult};
use crate::config::LogCollectorConfig;
use crate::record::{now_rfc3339, Record};

use finder::FileFinder;
use parser::Parser;
use patterns::PatternSet;
use position::PositionStore;
use reader::TailedFile;
use watcher::{FileEvent, FileEventKind, LogWatcher};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

/// Lines consumed from one file per scan pass.
pub const MAX_LINES_PER_BATCH: usize = 1_000;

/// First-sight files larger than this skip their historical backlog.
const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// A file that fails this many consecutive scans is detached.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

const BACKPRESSURE_WAIT: Duration = Duration::from_millis(100);
const BACKPRESSURE_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct LogTailer {
    config: LogCollectorConfig,
    data_dir: PathBuf,
    health: HealthHandle,
}

impl LogTailer {
    pub fn new(config: LogCollectorConfig, data_dir: PathBuf) -> Self {
        Self {
            config,
            data_dir,
            health: HealthHandle::new(),
        }
    }
}

impl Collector for LogTailer {
    fn name(&self) -> &'static str {
        "log-collector"
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    fn start(
        self: Box<Self>,
        bus: BoundedSender<Record>,
        tasks: &mut JoinSet<TaskResult>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let patterns = PatternSet::compile(&self.config.patterns);

        let mut parsers: HashMap<String, Arc<dyn Parser>> = HashMap::new();
        for (name, cfg) in &self.config.parsers {
            match parser::build_parser(name, cfg) {
                Ok(Some(p)) => {
                    parsers.insert(name.clone(), Arc::from(p));
                }
                Ok(None) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let positions = match PositionStore::new(&self.data_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    data_dir = %self.data_dir.display(),
                    error = %e,
                    "Cannot open position store, offsets will not survive restarts"
                );
                None
            }
        };

        let finder = FileFinder::new(self.config.paths.clone(), &self.config.excludes);

        info!(
            paths = self.config.paths.len(),
            patterns = patterns.len(),
            "Starting log collector"
        );

        let task = TailerTask {
            config: self.config,
            finder,
            patterns,
            parsers,
            positions,
            files: HashMap::new(),
            pending: Vec::new(),
            bus,
            health: self.health,
            dropped: 0,
        };

        let cancel = cancel.clone();
        tasks.spawn(async move {
            task.run(cancel).await;
            Ok(())
        });

        Ok(())
    }
}

struct PendingFile {
    path: PathBuf,
    ready_at: Instant,
}

struct TailerTask {
    config: LogCollectorConfig,
    finder: FileFinder,
    patterns: PatternSet,
    parsers: HashMap<String, Arc<dyn Parser>>,
    positions: Option<PositionStore>,
    files: HashMap<PathBuf, TailedFile>,
    /// Newly created paths waiting out `rotate_wait` before registration.
    pending: Vec<PendingFile>,
    bus: BoundedSender<Record>,
    health: HealthHandle,
    dropped: u64,
}

impl TailerTask {
    async fn run(mut self, cancel: CancellationToken) {
        let mut watcher = match LogWatcher::new() {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "Filesystem watcher unavailable, relying on periodic scans");
                None
            }
        };

        // Startup discovery registers immediately; later arrivals go through
        // the rotate_wait queue.
        match self.finder.find_files() {
            Ok(found) => {
                for (path, idx) in found {
                    self.register(&path, idx, &mut watcher);
                }
            }
            Err(e) => {
                error!(error = %e, "Initial log file discovery failed");
                self.health.set_error(format!("discovery failed: {}", e));
            }
        }

        info!(files = self.files.len(), "Log collector started");

        let mut scan_timer = tokio::time::interval(self.config.scan_frequency);

        loop {
            let next_ready = self.pending.iter().map(|p| p.ready_at).min();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Log collector received shutdown signal");
                    break;
                }

                _ = scan_timer.tick() => {
                    self.discover();
                    self.scan_all().await;
                }

                _ = conditional_sleep(next_ready), if next_ready.is_some() => {
                    self.register_due(&mut watcher);
                }

                Some(event) = conditional_event(&mut watcher) => {
                    self.handle_event(event);
                }
            }
        }

        self.persist_all();
        info!("Log collector stopped");
    }

    /// Re-expand the globs; unknown matches go through the rotate_wait queue
    /// so a rotator that is still writing the new file gets to finish.
    fn discover(&mut self) {
        let found = match self.finder.find_files() {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "Log file discovery failed");
                return;
            }
        };

        for (path, _idx) in found {
            if !self.files.contains_key(&path) {
                self.queue_pending(path);
            }
        }
    }

    fn handle_event(&mut self, event: FileEvent) {
        for path in event.paths {
            match event.kind {
                FileEventKind::Remove | FileEventKind::Rename => {
                    if self.files.contains_key(&path) && !path.exists() {
                        debug!(path = %path.display(), "Tracked file removed");
                        self.detach(&path, true);
                    } else if path.exists() && self.finder.match_spec(&path).is_some() {
                        // Rename target landed on a watched name.
                        self.queue_pending(path);
                    }
                }
                FileEventKind::Create => {
                    if self.finder.match_spec(&path).is_some() && !self.files.contains_key(&path) {
                        self.queue_pending(path);
                    }
                }
                FileEventKind::Other => {}
            }
        }
    }

    fn queue_pending(&mut self, path: PathBuf) {
        if self.files.contains_key(&path) || self.pending.iter().any(|p| p.path == path) {
            return;
        }
        debug!(path = %path.display(), wait = ?self.config.rotate_wait, "Queueing file for registration");
        self.pending.push(PendingFile {
            ready_at: Instant::now() + self.config.rotate_wait,
            path,
        });
    }

    fn register_due(&mut self, watcher: &mut Option<LogWatcher>) {
        let now = Instant::now();
        let due: Vec<PathBuf> = {
            let (ready, waiting): (Vec<_>, Vec<_>) =
                self.pending.drain(..).partition(|p| p.ready_at <= now);
            self.pending = waiting;
            ready.into_iter().map(|p| p.path).collect()
        };

        for path in due {
            if let Some(idx) = self.finder.match_spec(&path) {
                self.register(&path, idx, watcher);
            }
        }
    }

    /// Open and track a file, applying the initial offset policy: stored
    /// position, else seek-to-end for files over 100 MiB, else start.
    fn register(&mut self, path: &Path, spec_idx: usize, watcher: &mut Option<LogWatcher>) {
        if self.files.contains_key(path) {
            return;
        }

        let stored = self.positions.as_ref().and_then(|s| s.get(path));

        let offset = match stored {
            Some(offset) => {
                info!(path = %path.display(), offset, "Resuming from saved position");
                offset
            }
            None => match std::fs::metadata(path) {
                Ok(meta) if meta.len() > LARGE_FILE_BYTES => {
                    info!(
                        path = %path.display(),
                        size_mb = meta.len() / (1024 * 1024),
                        "Large file detected, skipping historical data"
                    );
                    meta.len()
                }
                Ok(_) => 0,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat file, seeking to end");
                    u64::MAX // clamped to size below
                }
            },
        };

        match TailedFile::open(path, offset, spec_idx) {
            Ok(mut tf) => {
                // A stored offset past the current size means the seek target
                // is gone; fall back to end and warn.
                if let Ok(size) = tf.file_size() {
                    if tf.offset() > size {
                        warn!(
                            path = %path.display(),
                            offset = tf.offset(),
                            size,
                            "Saved position beyond end of file, starting from end"
                        );
                        tf = match TailedFile::open(path, size, spec_idx) {
                            Ok(tf) => tf,
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "Failed to reopen file");
                                return;
                            }
                        };
                    }
                }

                if let Some(w) = watcher {
                    w.watch_parent(path);
                }
                debug!(path = %path.display(), offset = tf.offset(), "Tracking log file");
                self.files.insert(path.to_path_buf(), tf);
                self.health.set_detail("files_watched", self.files.len());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open log file");
            }
        }
    }

    fn detach(&mut self, path: &Path, purge_position: bool) {
        if self.files.remove(path).is_some() {
            if purge_position {
                if let Some(store) = &self.positions {
                    store.remove(path);
                }
            }
            debug!(path = %path.display(), "Detached log file");
            self.health.set_detail("files_watched", self.files.len());
        }
    }

    async fn scan_all(&mut self) {
        let paths: Vec<PathBuf> = self.files.keys().cloned().collect();

        for path in paths {
            if !path.exists() {
                debug!(path = %path.display(), "File no longer exists");
                self.detach(&path, true);
                continue;
            }

            self.scan_file(&path).await;
        }
    }

    async fn scan_file(&mut self, path: &Path) {
        let Some(mut tf) = self.files.remove(path) else {
            return;
        };

        // Chunked reads and pacing belong on the blocking pool.
        let scan = tokio::task::spawn_blocking(move || {
            let outcome = tf.read_lines(MAX_LINES_PER_BATCH);
            (tf, outcome)
        })
        .await;

        let (mut tf, outcome) = match scan {
            Ok(pair) => pair,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Scan task failed");
                return;
            }
        };

        match outcome {
            Ok(outcome) => {
                tf.clear_failures();
                let offset = tf.offset();
                let spec_idx = tf.spec_idx();
                self.files.insert(path.to_path_buf(), tf);

                if !outcome.lines.is_empty() {
                    self.emit_lines(path, spec_idx, outcome.lines).await;
                    self.persist(path, offset);
                }
            }
            Err(e) => {
                let failures = tf.record_failure();
                error!(path = %path.display(), error = %e, failures, "Error reading file");
                self.health.set_error(format!("read {}: {}", path.display(), e));

                if failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!(path = %path.display(), "File unreadable, detaching");
                    // Keep its position so a recovered file resumes in place.
                    self.health.set_detail("files_watched", self.files.len());
                } else {
                    self.files.insert(path.to_path_buf(), tf);
                }
            }
        }
    }

    async fn emit_lines(&mut self, path: &Path, spec_idx: usize, lines: Vec<String>) {
        let source = path.display().to_string();
        let spec = self.finder.spec(spec_idx);

        // Static fields and tags, flattened once per scan.
        let mut base_fields = Map::new();
        for (k, v) in &spec.fields {
            base_fields.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in &spec.tags {
            base_fields.insert(k.clone(), Value::String(v.clone()));
        }

        let line_parser = spec
            .parser
            .as_ref()
            .and_then(|name| self.parsers.get(name))
            .cloned();

        for line in lines {
            let mut fields = base_fields.clone();
            if let Some(p) = &line_parser {
                fields.extend(p.parse(&line));
            }

            let issues = self.patterns.scan(&line, &source, &fields);

            let log = Record::Log {
                source: source.clone(),
                message: line,
                timestamp: now_rfc3339(),
                level: "info".to_string(),
                fields,
            };

            self.emit(log, path).await;
            for issue in issues {
                self.emit(issue, path).await;
            }
        }
    }

    /// Two-stage backpressure protocol: try, wait briefly on the async send,
    /// then retry once after a pause. A record that still does not fit is
    /// dropped so the collector never stalls.
    async fn emit(&mut self, record: Record, path: &Path) {
        let record = match self.bus.try_send(record) {
            Ok(()) => return,
            Err((SendError::Disconnected, _)) => return,
            Err((SendError::Full, record)) => record,
        };

        let send = self.bus.send_async(record.clone());
        if tokio::time::timeout(BACKPRESSURE_WAIT, send).await.is_ok() {
            return;
        }

        debug!(file = %path.display(), "Backpressure detected, pausing log collection");
        tokio::time::sleep(BACKPRESSURE_RETRY_DELAY).await;

        if let Err((kind, _)) = self.bus.try_send(record) {
            if kind == SendError::Full {
                self.dropped += 1;
                self.health.set_detail("records_dropped", self.dropped);
                warn!(file = %path.display(), "Skipping log line due to persistent backpressure");
            }
        }
    }

    fn persist(&self, path: &Path, offset: u64) {
        if let Some(store) = &self.positions {
            if let Err(e) = store.put(path, offset) {
                warn!(path = %path.display(), offset, error = %e, "Failed to save position");
            }
        }
    }

    fn persist_all(&self) {
        for (path, tf) in &self.files {
            self.persist(path, tf.offset());
        }
    }
}

async fn conditional_event(watcher: &mut Option<LogWatcher>) -> Option<FileEvent> {
    match watcher {
        None => std::future::pending().await,
        Some(w) => w.next().await,
    }
}

async fn conditional_sleep(deadline: Option<Instant>) {
    match deadline {
        None => std::future::pending().await,
        Some(at) => tokio::time::sleep_until(at).await,
    }
}
