//! File watcher for the book directory.
//!
//! Changes made outside the editor (another tool rewriting a stylesheet,
//! a `git checkout`) should show up in the preview like edits do. The
//! watcher turns filesystem events into document names and hands them to
//! the session loop. The loop arms the refresh timer when a change can
//! affect the document on screen; the timer doubles as the debounce.

use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Events sent from the watcher to the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Documents changed on disk, by name.
    FilesChanged(Vec<String>),
}

/// How many changed names [`DiskActivity`] remembers.
const RECENT_CHANGES: usize = 16;

/// What the watcher has seen of the book on disk, for `/api/status`.
#[derive(Debug, Default)]
pub struct DiskActivity {
    log: Mutex<ActivityLog>,
}

#[derive(Debug, Default)]
struct ActivityLog {
    watching: bool,
    failure: Option<String>,
    batches: u64,
    last_change: Option<SystemTime>,
    /// Most recent first, without duplicates.
    recent: VecDeque<String>,
}

/// Serializable view of [`DiskActivity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskActivityReport {
    pub watching: bool,
    pub failure: Option<String>,
    /// Change notifications received, each covering one or more names.
    pub batches: u64,
    /// Millis since UNIX epoch of the last change.
    pub last_change_ms: Option<u64>,
    pub recent: Vec<String>,
}

impl DiskActivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn log(&self) -> MutexGuard<'_, ActivityLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watching_started(&self) {
        let mut log = self.log();
        log.watching = true;
        log.failure = None;
    }

    pub fn watching_failed(&self, error: String) {
        let mut log = self.log();
        log.watching = false;
        log.failure = Some(error);
    }

    /// Remember a batch of changed document names.
    pub fn record(&self, names: &[String]) {
        let mut log = self.log();
        log.batches += 1;
        log.last_change = Some(SystemTime::now());
        for name in names {
            log.recent.retain(|seen| seen != name);
            log.recent.push_front(name.clone());
        }
        log.recent.truncate(RECENT_CHANGES);
    }

    pub fn report(&self) -> DiskActivityReport {
        let log = self.log();
        DiskActivityReport {
            watching: log.watching,
            failure: log.failure.clone(),
            batches: log.batches,
            last_change_ms: log.last_change.map(|at| {
                at.duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64
            }),
            recent: log.recent.iter().cloned().collect(),
        }
    }
}

// ============================================================================
// Watching
// ============================================================================

/// Map a changed path to a document name, skipping hidden paths
/// (including folio's own `.folio` directory).
pub fn changed_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        let part = part.to_string_lossy();
        if part.starts_with('.') {
            return None;
        }
        parts.push(part.into_owned());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Watch `root` recursively. Events are delivered until the returned
/// watcher is dropped.
pub fn watch(
    root: &Path,
    activity: Arc<DiskActivity>,
    tx: UnboundedSender<WatcherEvent>,
) -> Result<RecommendedWatcher> {
    let root: PathBuf = root
        .canonicalize()
        .wrap_err_with(|| format!("Failed to resolve {}", root.display()))?;
    let handler_root = root.clone();
    let handler_activity = Arc::clone(&activity);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let mut names: Vec<String> = event
                .paths
                .iter()
                .filter_map(|p| changed_name(&handler_root, p))
                .collect();
            if names.is_empty() {
                return;
            }
            names.sort();
            names.dedup();
            handler_activity.record(&names);
            debug!(?names, "Files changed on disk");
            if tx.send(WatcherEvent::FilesChanged(names)).is_err() {
                debug!("Session loop gone, dropping watcher event");
            }
        }
        Err(e) => {
            warn!("File watcher error: {}", e);
            handler_activity.watching_failed(e.to_string());
        }
    })
    .wrap_err("Failed to create file watcher")?;

    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        activity.watching_failed(e.to_string());
        return Err(e).wrap_err_with(|| format!("Failed to watch {}", root.display()));
    }

    activity.watching_started();
    info!("Watching {} for changes", root.display());
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_name() {
        let root = Path::new("/book");
        assert_eq!(
            changed_name(root, Path::new("/book/text/ch1.xhtml")),
            Some("text/ch1.xhtml".to_string())
        );
        assert_eq!(changed_name(root, Path::new("/book")), None);
        assert_eq!(changed_name(root, Path::new("/elsewhere/x.css")), None);
        assert_eq!(changed_name(root, Path::new("/book/.folio/config.toml")), None);
        assert_eq!(changed_name(root, Path::new("/book/text/.ch1.xhtml.swp")), None);
    }

    #[test]
    fn test_activity_keeps_recent_names() {
        let activity = DiskActivity::new();
        assert!(!activity.report().watching);
        assert_eq!(activity.report().last_change_ms, None);

        activity.watching_started();
        activity.record(&["text/ch1.xhtml".into(), "styles/main.css".into()]);
        activity.record(&["text/ch1.xhtml".into()]);

        let report = activity.report();
        assert!(report.watching);
        assert_eq!(report.batches, 2);
        assert!(report.last_change_ms.is_some());
        assert_eq!(report.recent, vec!["text/ch1.xhtml", "styles/main.css"]);
    }

    #[test]
    fn test_activity_forgets_old_names() {
        let activity = DiskActivity::new();
        let names: Vec<String> = (0..20).map(|i| format!("text/ch{i}.xhtml")).collect();
        activity.record(&names);

        let report = activity.report();
        assert_eq!(report.recent.len(), RECENT_CHANGES);
        assert_eq!(report.recent[0], "text/ch19.xhtml");
    }

    #[test]
    fn test_activity_reports_failure() {
        let activity = DiskActivity::new();
        activity.watching_started();
        activity.watching_failed("inotify limit".into());

        let report = activity.report();
        assert!(!report.watching);
        assert_eq!(report.failure.as_deref(), Some("inotify limit"));
    }
}
