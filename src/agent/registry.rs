//! Watch registry
//!
//! Owns every OS filesystem watch the agent holds: at most one active watch
//! per absolute path, started and stopped on demand. Each watch runs a
//! dedicated event thread that filters and coalesces raw notify events and
//! hands the survivors to an async relay task, which POSTs them to the
//! callback URL registered with the watch.
//!
//! Delivery is at-most-once: a failed or timed-out callback POST is logged
//! and dropped, never retried. A watcher that errors after being established
//! stays registered until an explicit stop.

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::patterns;
use crate::agent::protocol::{ChangeKind, ChangeNotification};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to create watcher for {path}: {source}")]
    CreateWatcher {
        path: String,
        #[source]
        source: notify::Error,
    },
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}

/// One established watch. Dropping the notify handle tears the whole
/// pipeline down: the raw channel disconnects, the event thread flushes and
/// exits, and the relay task ends when its channel closes.
struct ActiveWatch {
    _watcher: RecommendedWatcher,
    callback_url: String,
    ignore_patterns: Vec<String>,
}

/// Registry of active watches, keyed by absolute watched path.
///
/// Internally synchronized; the lock is only held for map lookups and
/// inserts, never across I/O.
pub struct WatchRegistry {
    watches: Mutex<HashMap<PathBuf, ActiveWatch>>,
    http: reqwest::Client,
    debounce: Duration,
    max_depth: usize,
}

impl WatchRegistry {
    pub fn new(debounce: Duration, max_depth: usize, callback_timeout: Duration) -> Self {
        // Relay client is shared by every watch; the timeout bounds each
        // notification POST so a hung receiver cannot pile up tasks.
        let http = reqwest::Client::builder()
            .timeout(callback_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            watches: Mutex::new(HashMap::new()),
            http,
            debounce,
            max_depth,
        }
    }

    /// Start watching `path` recursively, POSTing change notifications to
    /// `callback_url`.
    ///
    /// Idempotent: if a watch for `path` already exists this is a no-op and
    /// the existing watch keeps its original callback URL and patterns.
    ///
    /// Must be called from within a tokio runtime (the relay task is
    /// spawned on it).
    pub fn start_watching(
        &self,
        path: &Path,
        callback_url: &str,
        ignore_patterns: Vec<String>,
    ) -> Result<(), RegistryError> {
        {
            let watches = self.watches.lock().expect("watch registry lock poisoned");
            if let Some(existing) = watches.get(path) {
                info!(
                    "Already watching {:?} (callback {}), ignoring start request",
                    path, existing.callback_url
                );
                return Ok(());
            }
        }

        info!(
            "Starting watch: path={:?}, callback={}, patterns={:?}",
            path, callback_url, ignore_patterns
        );

        // Raw notify events flow: watcher callback → std channel → event
        // thread (filter + coalesce) → tokio channel → relay task (POST).
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let (relay_tx, relay_rx) = mpsc::channel::<ChangeNotification>(256);

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = raw_tx.send(res);
            })
            .map_err(|e| RegistryError::CreateWatcher {
                path: path.display().to_string(),
                source: e,
            })?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| RegistryError::Watch {
                path: path.display().to_string(),
                source: e,
            })?;

        let root = path.to_path_buf();
        let patterns = ignore_patterns.clone();
        let debounce = self.debounce;
        let max_depth = self.max_depth;
        std::thread::spawn(move || {
            event_loop(raw_rx, relay_tx, &root, &patterns, debounce, max_depth);
        });

        let http = self.http.clone();
        let url = callback_url.to_string();
        let watched = path.to_path_buf();
        tokio::spawn(async move {
            relay_loop(relay_rx, http, url, watched).await;
        });

        let mut watches = self.watches.lock().expect("watch registry lock poisoned");
        // A concurrent start for the same path may have won the race while
        // the watcher was being built; first registration wins.
        watches.entry(path.to_path_buf()).or_insert(ActiveWatch {
            _watcher: watcher,
            callback_url: callback_url.to_string(),
            ignore_patterns,
        });

        Ok(())
    }

    /// Stop watching `path`. A stop for a path with no active watch logs a
    /// warning and is a no-op, never an error.
    pub fn stop_watching(&self, path: &Path) {
        let removed = {
            let mut watches = self.watches.lock().expect("watch registry lock poisoned");
            watches.remove(path)
        };

        match removed {
            Some(watch) => {
                info!(
                    "Stopped watch: path={:?}, callback={}",
                    path, watch.callback_url
                );
            }
            None => {
                warn!("Stop requested for unwatched path {:?}, ignoring", path);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.watches
            .lock()
            .expect("watch registry lock poisoned")
            .len()
    }

    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.watches
            .lock()
            .expect("watch registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Ignore patterns an active watch was started with, if any.
    pub fn watch_patterns(&self, path: &Path) -> Option<Vec<String>> {
        self.watches
            .lock()
            .expect("watch registry lock poisoned")
            .get(path)
            .map(|w| w.ignore_patterns.clone())
    }
}

/// Filter + coalesce loop, one OS thread per watch.
///
/// Events accumulate while more keep arriving within the debounce window;
/// the pending batch is flushed once the window goes quiet. Coalescing
/// deduplicates identical (kind, path) pairs but never reorders.
fn event_loop(
    raw_rx: std::sync::mpsc::Receiver<notify::Result<Event>>,
    relay_tx: mpsc::Sender<ChangeNotification>,
    root: &Path,
    ignore_patterns: &[String],
    debounce: Duration,
    max_depth: usize,
) {
    let mut pending: Vec<ChangeNotification> = Vec::new();

    loop {
        let received = if pending.is_empty() {
            raw_rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            raw_rx.recv_timeout(debounce)
        };

        match received {
            Ok(Ok(event)) => {
                collect_changes(&event, root, ignore_patterns, max_depth, &mut pending);
            }
            Ok(Err(e)) => {
                // Keep the registration; an errored watch is cleared only
                // by an explicit stop.
                warn!("Watcher error on {:?}: {}", root, e);
            }
            Err(RecvTimeoutError::Timeout) => {
                flush(&mut pending, &relay_tx);
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush(&mut pending, &relay_tx);
                debug!("Watch channel for {:?} closed, exiting event loop", root);
                break;
            }
        }
    }
}

/// Map a raw notify event onto the add/unlink notification vocabulary,
/// applying the hidden-entry, pattern and depth filters.
fn collect_changes(
    event: &Event,
    root: &Path,
    ignore_patterns: &[String],
    max_depth: usize,
    pending: &mut Vec<ChangeNotification>,
) {
    let kind = match classify(event) {
        Some(k) => k,
        None => return,
    };

    for path in &event.paths {
        let rel_path = match relative_slash_path(root, path) {
            Some(p) => p,
            None => continue,
        };

        let segments: Vec<&str> = rel_path.split('/').collect();
        if segments.len() > max_depth {
            continue;
        }
        // Dotfiles and dot-directories are never reported.
        if segments.iter().any(|s| s.starts_with('.')) {
            continue;
        }
        if patterns::matches_with_ancestors(&rel_path, ignore_patterns) {
            continue;
        }

        // Removal events cannot stat the path anymore; everything else can
        // be disambiguated against the filesystem when the event kind does
        // not already say whether it is a directory.
        let kind = match kind {
            PathKind::Add => {
                if path.is_dir() {
                    ChangeKind::AddDir
                } else {
                    ChangeKind::Add
                }
            }
            PathKind::AddDir => ChangeKind::AddDir,
            PathKind::Unlink => ChangeKind::Unlink,
            PathKind::UnlinkDir => ChangeKind::UnlinkDir,
            PathKind::Rename => {
                if path.is_dir() {
                    ChangeKind::AddDir
                } else if path.exists() {
                    ChangeKind::Add
                } else {
                    ChangeKind::Unlink
                }
            }
        };

        let note = ChangeNotification {
            kind,
            path: rel_path,
        };
        // Coalesce: identical pending notifications collapse into one.
        if !pending.contains(&note) {
            pending.push(note);
        }
    }
}

#[derive(Clone, Copy)]
enum PathKind {
    Add,
    AddDir,
    Unlink,
    UnlinkDir,
    Rename,
}

/// Only creation, removal and rename events carry protocol meaning;
/// content modifications are dropped here.
fn classify(event: &Event) -> Option<PathKind> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Some(PathKind::AddDir),
        EventKind::Create(_) => Some(PathKind::Add),
        EventKind::Remove(RemoveKind::Folder) => Some(PathKind::UnlinkDir),
        EventKind::Remove(_) => Some(PathKind::Unlink),
        // Renames surface as Modify(Name) on most platforms; whether the
        // path still exists decides add vs unlink.
        EventKind::Modify(ModifyKind::Name(_)) => Some(PathKind::Rename),
        _ => None,
    }
}

fn flush(pending: &mut Vec<ChangeNotification>, relay_tx: &mpsc::Sender<ChangeNotification>) {
    for note in pending.drain(..) {
        if relay_tx.blocking_send(note).is_err() {
            // Relay task gone; the watch is being torn down.
            return;
        }
    }
}

/// Fire-and-forget notification relay, one tokio task per watch.
async fn relay_loop(
    mut relay_rx: mpsc::Receiver<ChangeNotification>,
    http: reqwest::Client,
    callback_url: String,
    watched: PathBuf,
) {
    while let Some(note) = relay_rx.recv().await {
        debug!(
            "Notifying {}: {:?} {}",
            callback_url, note.kind, note.path
        );
        match http.post(&callback_url).json(&note).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "Callback {} rejected notification for '{}': {}",
                    callback_url,
                    note.path,
                    response.status()
                );
            }
            Err(e) => {
                warn!(
                    "Failed to deliver notification for '{}' to {}: {}",
                    note.path, callback_url, e
                );
            }
            Ok(_) => {}
        }
    }
    debug!("Notification relay for {:?} finished", watched);
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
