//! Repository: owns the current index and keeps it in sync with disk
//!
//! Every cycle scans into a private index, diffs it against the published
//! one, swaps the shared pointer and publishes the delta. Readers take a
//! snapshot (`Arc<Index>`) and never observe a half-built index.
//!
//! Full reindexes are strictly sequential. Scoped rescans (watcher
//! signals, `rescan`) may run alongside them; all of them serialize on
//! the short commit step that merges and swaps.

use crate::config::Config;
use crate::generation::{Generation, RepositoryState};
use crate::hub::UpdateHub;
use crate::index::Index;
use crate::item::Item;
use crate::provider::FilesystemProvider;
use crate::route::Route;
use crate::update::Update;
use crate::watcher::WatcherRegistry;
use crate::GroveError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type UpdateCallback = Box<dyn Fn(&Update) + Send + Sync>;

/// A directory tree of documents, indexed and kept up to date
pub struct Repository {
    shared: Arc<Shared>,
    timer: Mutex<Option<Timer>>,
}

struct Timer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    root: PathBuf,
    config: Config,
    provider: FilesystemProvider,
    index: RwLock<Arc<Index>>,
    hub: UpdateHub,
    watchers: WatcherRegistry,
    callbacks: Mutex<Vec<UpdateCallback>>,
    // Held for a whole full reindex so cycles never overlap
    cycle: Mutex<()>,
    // Held while diffing against and swapping the published index
    commit: Mutex<()>,
    state: AtomicU8,
    // Number of cycles in flight; `state` only returns to idle at zero
    in_flight: Mutex<usize>,
    generation: AtomicU64,
    closed: AtomicBool,
}

/// Marks one scan cycle as in flight until dropped
struct CycleGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.shared.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            RepositoryState::Idle.store(&self.shared.state);
        }
    }
}

impl Repository {
    /// Open the repository rooted at `root` and build its initial index.
    ///
    /// Fails if `root` is not a readable directory or cannot itself be
    /// classified as an item.
    pub fn open(root: impl AsRef<Path>, config: Config) -> crate::Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(GroveError::InvalidRoot {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let root = root.canonicalize().map_err(|e| GroveError::InvalidRoot {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let provider = FilesystemProvider::new(root.clone(), config.scan.clone());
        let shared = Arc::new(Shared {
            root,
            config,
            provider,
            index: RwLock::new(Arc::new(Index::new())),
            hub: UpdateHub::new(),
            watchers: WatcherRegistry::new(),
            callbacks: Mutex::new(Vec::new()),
            cycle: Mutex::new(()),
            commit: Mutex::new(()),
            state: AtomicU8::new(RepositoryState::Idle as u8),
            in_flight: Mutex::new(0),
            generation: AtomicU64::new(Generation::new().value()),
            closed: AtomicBool::new(false),
        });

        {
            let _cycle = shared.cycle.lock();
            let _guard = shared.begin_cycle();
            let started = Instant::now();
            let initial = shared.provider.build_index(&shared.root, None)?;
            shared.commit_full(initial);
            info!(
                root = %shared.root.display(),
                items = shared.snapshot().len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "opened repository"
            );
        }

        let repository = Self {
            shared,
            timer: Mutex::new(None),
        };
        repository.set_reindex_interval(repository.shared.config.reindex_interval())?;
        Ok(repository)
    }

    /// Canonical repository root
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Current index snapshot. It stays valid (and unchanged) however many
    /// cycles run after it was taken.
    pub fn index(&self) -> Arc<Index> {
        self.shared.snapshot()
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.index().items().to_vec()
    }

    pub fn item(&self, route: &Route) -> Option<Arc<Item>> {
        self.index().get(route).cloned()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.index().routes()
    }

    /// Register a channel that receives every non-empty update. The
    /// channel must be unbounded or drained promptly; sends block.
    pub fn subscribe(&self, sender: Sender<Update>) {
        self.shared.hub.subscribe(sender);
    }

    /// Register a callback run after every non-empty update is published.
    /// Callbacks must not register further callbacks.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push(Box::new(callback));
    }

    /// Watch the filesystem locations behind `route` and rescan it when
    /// they change. Watching an already watched route is a no-op.
    pub fn start_watching(&self, route: &Route) -> crate::Result<()> {
        Shared::watch(&self.shared, route)
    }

    /// Stop watching `route`; a no-op if it is not watched
    pub fn stop_watching(&self, route: &Route) {
        self.shared.watchers.stop(route);
    }

    pub fn is_watching(&self, route: &Route) -> bool {
        self.shared.watchers.is_running(route)
    }

    /// Rescan the whole repository and publish what changed
    pub fn reindex(&self) -> Update {
        self.shared.reindex()
    }

    /// Rescan the subtree at `route`, down to the configured rescan depth,
    /// and publish what changed
    pub fn rescan(&self, route: &Route) -> Update {
        self.shared.rescan(route)
    }

    pub fn state(&self) -> RepositoryState {
        RepositoryState::load(&self.shared.state)
    }

    pub fn generation(&self) -> Generation {
        Generation::from_value(self.shared.generation.load(Ordering::Acquire))
    }

    /// Replace the periodic reindex timer. `None` disables it.
    pub fn set_reindex_interval(&self, interval: Option<Duration>) -> crate::Result<()> {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.shutdown();
        }
        if let Some(interval) = interval {
            *timer = Some(Timer::spawn(Arc::downgrade(&self.shared), interval)?);
            debug!(interval_ms = interval.as_millis() as u64, "periodic reindex enabled");
        }
        Ok(())
    }

    /// Stop the periodic timer and every watcher. Safe to call repeatedly.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(timer) = self.timer.lock().take() {
            timer.shutdown();
        }
        self.shared.watchers.stop_all();
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.shared.root)
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish()
    }
}

impl Timer {
    fn spawn(shared: Weak<Shared>, interval: Duration) -> crate::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("grove-reindex".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        shared.reindex();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn shutdown(self) {
        let _ = self.stop.try_send(());
        // The timer thread may itself drop the last repository handle
        if self.handle.thread().id() != thread::current().id() {
            let _ = self.handle.join();
        }
    }
}

impl Shared {
    fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read())
    }

    /// Enter the scanning phase. Concurrent rescans each hold a guard, and
    /// the state reads idle only once every guard is dropped.
    fn begin_cycle(&self) -> CycleGuard<'_> {
        let mut in_flight = self.in_flight.lock();
        *in_flight += 1;
        RepositoryState::Scanning.store(&self.state);
        CycleGuard { shared: self }
    }

    // Only called while a cycle guard is held
    fn set_state(&self, state: RepositoryState) {
        let _in_flight = self.in_flight.lock();
        state.store(&self.state);
    }

    fn reindex(self: &Arc<Self>) -> Update {
        let _cycle = self.cycle.lock();
        let _guard = self.begin_cycle();
        let started = Instant::now();

        let next = match self.provider.build_index(&self.root, None) {
            Ok(index) => index,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "root no longer indexable");
                Index::new()
            }
        };

        let update = self.commit_full(next);
        debug!(
            changes = update.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "full reindex finished"
        );
        update
    }

    /// Diff `next` against the published index, swap it in and publish
    fn commit_full(self: &Arc<Self>, next: Index) -> Update {
        self.set_state(RepositoryState::Diffing);
        prime_hashes(&next);

        let update = {
            let _commit = self.commit.lock();
            let current = self.snapshot();
            let update = Update::diff(&current, &next);
            self.swap(next);
            update
        };

        self.finish(&update);
        update
    }

    fn rescan(self: &Arc<Self>, route: &Route) -> Update {
        let started = Instant::now();
        let depth = self.config.watch.rescan_depth;
        let _guard = self.begin_cycle();

        let directory = self.directory_of(route);

        let (scanned, whole_subtree) = match self.provider.scan(&directory, Some(depth)) {
            Ok(items) => (Index::from_items(items), false),
            Err(e) => {
                // Unclassifiable or vanished: the route and everything below it is gone
                debug!(route = %route, error = %e, "rescan found no item");
                (Ok(Index::new()), true)
            }
        };
        let scanned = match scanned {
            Ok(index) => index,
            Err(e) => {
                warn!(route = %route, error = %e, "discarding rescan result");
                return Update::default();
            }
        };

        self.set_state(RepositoryState::Diffing);
        prime_hashes(&scanned);

        let update = {
            let _commit = self.commit.lock();
            let current = self.snapshot();
            let old = current.sub_index(route, if whole_subtree { None } else { Some(depth) });
            let update = Update::diff(&old, &scanned);

            let mut merged = (*current).clone();
            for stale in old.items() {
                merged.remove(stale.route());
            }
            for item in scanned.items() {
                if let Err(e) = merged.add(Arc::clone(item)) {
                    warn!(route = %item.route(), error = %e, "dropping rescanned item");
                }
            }
            self.swap(merged);
            update
        };

        self.finish(&update);
        debug!(
            route = %route,
            changes = update.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rescan finished"
        );
        update
    }

    // Callers hold the commit lock.
    fn swap(&self, next: Index) {
        *self.index.write() = Arc::new(next);
        let generation = Generation::from_value(self.generation.load(Ordering::Acquire)).next();
        self.generation.store(generation.value(), Ordering::Release);
    }

    fn finish(self: &Arc<Self>, update: &Update) {
        if !update.is_empty() {
            self.set_state(RepositoryState::Publishing);
            let reached = self.hub.publish(update);
            for callback in self.callbacks.lock().iter() {
                callback(update);
            }
            info!(
                new = update.new.len(),
                modified = update.modified.len(),
                deleted = update.deleted.len(),
                subscribers = reached,
                "published update"
            );
        }
        self.maintain_watchers();
    }

    /// Directory backing `route`. Routes not yet indexed are resolved from
    /// the nearest indexed ancestor by matching entry names, since a route
    /// component does not always spell the on-disk name.
    fn directory_of(&self, route: &Route) -> PathBuf {
        let index = self.snapshot();
        let mut ancestor = route.clone();
        let mut directory = loop {
            if let Some(item) = index.get(&ancestor) {
                break item.directory().to_path_buf();
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break self.root.clone(),
            }
        };

        for component in route.components().into_iter().skip(ancestor.level()) {
            directory = match find_entry(&directory, component) {
                Some(entry) => entry,
                None => directory.join(component),
            };
        }
        directory
    }

    /// Drop watchers of routes that left the index and restart those whose
    /// targets changed or went stale
    fn maintain_watchers(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let index = self.snapshot();
        for route in self.watchers.routes() {
            let Some(item) = index.get(&route) else {
                self.watchers.stop(&route);
                info!(route = %route, "stopped watching deleted route");
                continue;
            };

            let changed = self
                .watchers
                .targets(&route)
                .is_some_and(|targets| targets.as_slice() != item.watch_targets());
            if changed || self.watchers.has_inactive(&route) {
                self.watchers.stop(&route);
                match Shared::watch(self, &route) {
                    Ok(()) => debug!(route = %route, "restarted watchers"),
                    Err(e) => warn!(route = %route, error = %e, "cannot restart watchers"),
                }
            }
        }
    }

    fn watch(shared: &Arc<Shared>, route: &Route) -> crate::Result<()> {
        if shared.watchers.is_running(route) {
            return Ok(());
        }
        let item = shared
            .snapshot()
            .get(route)
            .cloned()
            .ok_or_else(|| GroveError::RouteNotFound(route.value().to_string()))?;

        let signals = match shared.watchers.start(route, item.watch_targets()) {
            Ok(signals) => signals,
            Err(GroveError::WatcherRunning(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let weak = Arc::downgrade(shared);
        let debounce = shared.config.debounce();
        let watched = route.clone();
        let spawned = thread::Builder::new()
            .name(format!("grove-watch{watched}"))
            .spawn(move || signal_loop(weak, watched, signals, debounce));
        if let Err(e) = spawned {
            shared.watchers.stop(route);
            return Err(e.into());
        }

        info!(route = %route, targets = item.watch_targets().len(), "watching route");
        Ok(())
    }
}

/// Wait for change signals on one route and rescan it after each quiet
/// period. Exits once the route's watchers are torn down.
fn signal_loop(shared: Weak<Shared>, route: Route, signals: Receiver<()>, debounce: Duration) {
    while signals.recv().is_ok() {
        thread::sleep(debounce);
        // Anything signalled during the quiet period is covered by this rescan
        while signals.try_recv().is_ok() {}

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.rescan(&route);
    }
    debug!(route = %route, "watch loop exited");
}

/// Entry of `dir` whose normalized name is `component`
fn find_entry(dir: &Path, component: &str) -> Option<PathBuf> {
    let exact = dir.join(component);
    if exact.exists() {
        return Some(exact);
    }
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| Route::new(&entry.file_name().to_string_lossy()).value() == component)
        .map(|entry| entry.path())
}

/// Compute and cache every item's hash so later diffs compare against
/// scan-time content
fn prime_hashes(index: &Index) {
    index.items().par_iter().for_each(|item| {
        item.hash();
    });
}
