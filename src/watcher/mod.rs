//! File system watcher feeding module changes to the HMR engine.
//!
//! Debounced notify events are mapped to module ids (`/`-rooted paths relative
//! to the served root), deduplicated per batch and handed to a dispatch thread
//! through a bounded queue.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, TrySendError};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::server::{ModuleChangeCallback, ModuleEventSource};

const QUEUE_CAPACITY: usize = 10_000;
const BACKLOG_WARN_THRESHOLD: usize = 8_000;

pub struct FsWatcher {
    root: PathBuf,
    debounce: Duration,
    ignored: Vec<String>,
}

impl FsWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = ServerConfig::default();
        Self {
            root: root.into(),
            debounce: Duration::from_millis(defaults.debounce_ms),
            ignored: defaults.ignored,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            root: config.root.clone(),
            debounce: Duration::from_millis(config.debounce_ms),
            ignored: config.ignored.clone(),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Keeps the debouncer and its dispatch thread alive.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl ModuleEventSource for FsWatcher {
    type Guard = WatcherHandle;

    fn register(self, emit: ModuleChangeCallback) -> Result<WatcherHandle> {
        static BACKLOG_WARNED: AtomicBool = AtomicBool::new(false);

        let root = self.root.canonicalize()?;
        let (tx, rx) = bounded::<String>(QUEUE_CAPACITY);

        let batch_root = root.clone();
        let ignored = self.ignored;
        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher error");
                    }
                    return;
                }
            };

            let mut ids: Vec<String> = Vec::new();
            for event in events {
                let event = &event.event;
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    continue;
                }
                for path in &event.paths {
                    let relative = path.strip_prefix(&batch_root).unwrap_or(path);
                    if should_ignore(relative, &ignored) {
                        continue;
                    }
                    if let Some(id) = module_id(&batch_root, path) {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }

            for id in ids {
                let backlog = tx.len();
                if backlog > BACKLOG_WARN_THRESHOLD && !BACKLOG_WARNED.swap(true, Ordering::Relaxed) {
                    warn!(backlog, capacity = QUEUE_CAPACITY, "watcher backlog");
                } else if backlog < BACKLOG_WARN_THRESHOLD / 2 {
                    BACKLOG_WARNED.store(false, Ordering::Relaxed);
                }

                match tx.try_send(id) {
                    Ok(()) => {}
                    Err(TrySendError::Full(id)) => warn!(module = %id, "dropped change, queue full"),
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        })?;

        debouncer.watch(&root, RecursiveMode::Recursive)?;

        thread::Builder::new()
            .name("hmr-watcher".into())
            .spawn(move || {
                while let Ok(id) = rx.recv() {
                    debug!(module = %id, "dispatching change");
                    emit(id);
                }
            })?;

        info!(root = %root.display(), debounce_ms = self.debounce.as_millis() as u64, "file watcher started");

        Ok(WatcherHandle {
            _debouncer: debouncer,
        })
    }
}

/// Map a changed file to its module id, e.g. `<root>/src/a.js` -> `/src/a.js`.
pub fn module_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut id = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                id.push('/');
                id.push_str(&part.to_string_lossy());
            }
            _ => return None,
        }
    }
    (!id.is_empty()).then_some(id)
}

fn should_ignore(path: &Path, ignored: &[String]) -> bool {
    if let Some(name) = path.file_name() {
        let name = name.to_string_lossy();
        if name.contains('~') || name.ends_with(".tmp") || name.ends_with(".swp") {
            return true;
        }
    }
    path.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            ignored.iter().any(|dir| dir.as_str() == name)
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_module_id() {
        let root = Path::new("/srv/app");
        assert_eq!(
            module_id(root, Path::new("/srv/app/src/main.js")).as_deref(),
            Some("/src/main.js")
        );
        assert_eq!(module_id(root, Path::new("/srv/app/a.js")).as_deref(), Some("/a.js"));
        assert_eq!(module_id(root, Path::new("/elsewhere/a.js")), None);
        assert_eq!(module_id(root, root), None);
    }

    #[test]
    fn test_should_ignore() {
        let ignored = ServerConfig::default().ignored;
        assert!(should_ignore(Path::new("/srv/app/node_modules/x/index.js"), &ignored));
        assert!(should_ignore(Path::new("/srv/app/.git/HEAD"), &ignored));
        assert!(should_ignore(Path::new("/srv/app/a.js~"), &ignored));
        assert!(should_ignore(Path::new("/srv/app/.a.js.swp"), &ignored));
        assert!(!should_ignore(Path::new("/srv/app/src/a.js"), &ignored));
    }

    #[test]
    fn test_watcher_reports_module_ids() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();

        let watcher = FsWatcher::new(dir.path()).with_debounce(Duration::from_millis(20));
        let _handle = watcher
            .register(Box::new(move |id| {
                let _ = tx.send(id);
            }))
            .unwrap();

        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        std::fs::write(dir.path().join("node_modules").join("x.js"), "export {};").unwrap();
        std::fs::write(dir.path().join("src").join("app.js"), "export default 1;").unwrap();

        let mut ids = Vec::new();
        while !ids.iter().any(|id: &String| id == "/src/app.js") {
            let id = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("watcher reported no module id");
            ids.push(id);
        }

        // anything still in flight from the same batches
        while let Ok(id) = rx.recv_timeout(Duration::from_millis(300)) {
            ids.push(id);
        }
        assert!(ids.iter().all(|id| id.starts_with('/')));
        assert!(
            !ids.iter().any(|id| id.starts_with("/node_modules")),
            "ignored directory reported: {ids:?}"
        );
    }
}
