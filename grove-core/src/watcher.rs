//! Per-route registry of filesystem watchers
//!
//! Each watched route owns one OS-level watcher per [`WatchTarget`]. All of
//! a route's watchers feed a single capacity-1 signal channel: while a
//! signal is pending, further events are dropped, so any number of rapid
//! changes collapse into one rescan request.

use crate::item::WatchTarget;
use crate::route::Route;
use crate::GroveError;
use crossbeam_channel::{bounded, Receiver, Sender};
use notify::event::{AccessKind, AccessMode, MetadataKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct ActiveWatcher {
    target: WatchTarget,
    active: Arc<AtomicBool>,
    // Dropping the watcher stops it and releases its OS handles.
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for ActiveWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveWatcher")
            .field("target", &self.target)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<Route, Vec<ActiveWatcher>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one watcher per target for `route` and return the route's
    /// signal channel. Fails if the route is already being watched, or if
    /// none of the targets could be watched.
    pub fn start(&self, route: &Route, targets: &[WatchTarget]) -> crate::Result<Receiver<()>> {
        let mut watchers = self.watchers.lock();
        if watchers.contains_key(route) {
            return Err(GroveError::WatcherRunning(route.value().to_string()));
        }

        let (signal, receiver) = bounded(1);
        let mut started = Vec::with_capacity(targets.len());
        let mut last_error = None;

        for target in targets {
            match spawn_watcher(target, signal.clone()) {
                Ok(watcher) => started.push(watcher),
                Err(e) => {
                    warn!(path = %target.path.display(), error = %e, "cannot watch path");
                    last_error = Some(e);
                }
            }
        }

        if started.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                GroveError::InvalidPath(format!("nothing to watch for route '{}'", route.value()))
            }));
        }

        debug!(route = %route, watchers = started.len(), "started watching");
        watchers.insert(route.clone(), started);
        Ok(receiver)
    }

    /// Tear down every watcher for `route`; a no-op if none are registered
    pub fn stop(&self, route: &Route) {
        if self.watchers.lock().remove(route).is_some() {
            debug!(route = %route, "stopped watching");
        }
    }

    /// Tear down every watcher for every route
    pub fn stop_all(&self) {
        let drained: Vec<Route> = self.watchers.lock().drain().map(|(route, _)| route).collect();
        if !drained.is_empty() {
            debug!(routes = drained.len(), "stopped all watchers");
        }
    }

    pub fn is_running(&self, route: &Route) -> bool {
        self.watchers.lock().contains_key(route)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.watchers.lock().keys().cloned().collect()
    }

    /// Targets registered for `route`, if it is being watched
    pub fn targets(&self, route: &Route) -> Option<Vec<WatchTarget>> {
        self.watchers
            .lock()
            .get(route)
            .map(|list| list.iter().map(|w| w.target.clone()).collect())
    }

    /// Whether any of the route's watchers has stopped (its path moved,
    /// vanished, or reported an error)
    pub fn has_inactive(&self, route: &Route) -> bool {
        self.watchers
            .lock()
            .get(route)
            .is_some_and(|list| list.iter().any(|w| !w.active.load(Ordering::Relaxed)))
    }
}

fn spawn_watcher(target: &WatchTarget, signal: Sender<()>) -> crate::Result<ActiveWatcher> {
    let active = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&active);
    let watched = target.path.clone();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => handle_event(&watched, &event, &flag, &signal),
            Err(e) => {
                warn!(path = %watched.display(), error = %e, "watcher failed");
                flag.store(false, Ordering::Relaxed);
            }
        }
    })?;

    let mode = if target.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(&target.path, mode)?;

    Ok(ActiveWatcher {
        target: target.clone(),
        active,
        _watcher: watcher,
    })
}

fn handle_event(watched: &Path, event: &Event, active: &AtomicBool, signal: &Sender<()>) {
    if !active.load(Ordering::Relaxed) || !is_change(&event.kind) {
        return;
    }

    if touches_self(watched, event) {
        // The watched path itself was moved or removed; this watcher is done
        // after reporting the change.
        active.store(false, Ordering::Relaxed);
    }

    // A full channel means a signal is already pending and will cover
    // this change as well.
    let _ = signal.try_send(());
}

fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => false,
    }
}

fn touches_self(watched: &Path, event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    ) && event.paths.iter().any(|p| p == watched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn test_change_kinds() {
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(is_change(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_change(&EventKind::Remove(RemoveKind::File)));
        assert!(is_change(&EventKind::Access(AccessKind::Close(AccessMode::Write))));
        assert!(!is_change(&EventKind::Access(AccessKind::Read)));
        assert!(!is_change(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::AccessTime
        ))));
    }

    #[test]
    fn test_events_coalesce_into_one_signal() {
        let (tx, rx) = bounded(1);
        let active = AtomicBool::new(true);
        let watched = Path::new("/repo/doc.md");

        for _ in 0..5 {
            handle_event(
                watched,
                &event(EventKind::Modify(ModifyKind::Any), watched),
                &active,
                &tx,
            );
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_removing_watched_path_deactivates() {
        let (tx, rx) = bounded(1);
        let active = AtomicBool::new(true);
        let watched = Path::new("/repo/doc.md");

        handle_event(watched, &event(EventKind::Remove(RemoveKind::File), watched), &active, &tx);
        assert!(!active.load(Ordering::Relaxed));
        assert!(rx.try_recv().is_ok());

        // inactive watchers stay quiet
        handle_event(watched, &event(EventKind::Create(CreateKind::File), watched), &active, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_removing_child_keeps_directory_watcher_active() {
        let (tx, rx) = bounded(1);
        let active = AtomicBool::new(true);
        let watched = Path::new("/repo/sub");

        handle_event(
            watched,
            &event(EventKind::Remove(RemoveKind::File), &watched.join("doc.md")),
            &active,
            &tx,
        );
        assert!(active.load(Ordering::Relaxed));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_start_twice_fails_and_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = WatcherRegistry::new();
        let route = Route::new("docs");
        let targets = vec![WatchTarget::flat(dir.path().to_path_buf())];

        let _rx = registry.start(&route, &targets).unwrap();
        assert!(registry.is_running(&route));
        assert!(matches!(
            registry.start(&route, &targets),
            Err(GroveError::WatcherRunning(_))
        ));
        assert_eq!(registry.targets(&route), Some(targets.clone()));

        registry.stop(&route);
        assert!(!registry.is_running(&route));
        registry.stop(&route);
        assert!(registry.start(&route, &targets).is_ok());

        registry.stop_all();
        assert!(registry.routes().is_empty());
    }

    #[test]
    fn test_missing_path_cannot_be_watched() {
        let dir = TempDir::new().unwrap();
        let registry = WatcherRegistry::new();
        let route = Route::new("ghost");
        let targets = vec![WatchTarget::flat(dir.path().join("missing"))];

        assert!(registry.start(&route, &targets).is_err());
        assert!(!registry.is_running(&route));
    }

    #[test]
    fn test_file_change_raises_signal() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("doc.md");
        fs::write(&doc, "# v1\n").unwrap();

        let registry = WatcherRegistry::new();
        let route = Route::root();
        let rx = registry
            .start(&route, &[WatchTarget::flat(dir.path().to_path_buf())])
            .unwrap();

        fs::write(&doc, "# v2\n").unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());

        registry.stop(&route);
    }

    #[test]
    fn test_stop_disconnects_signal_channel() {
        let dir = TempDir::new().unwrap();
        let registry = WatcherRegistry::new();
        let route = Route::new("x");
        let rx = registry
            .start(&route, &[WatchTarget::recursive(dir.path().to_path_buf())])
            .unwrap();

        registry.stop(&route);
        // every sender lives in a watcher callback; once they are gone the
        // channel reports disconnection instead of blocking forever
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                _ if std::time::Instant::now() > deadline => panic!("channel never disconnected"),
                _ => {}
            }
        }
    }
}
