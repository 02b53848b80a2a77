//! Hot reload controller.
//!
//! Watches the entry script with the OS file-watching primitive and
//! collapses change notifications into a single pending flag the main
//! thread samples at the start of a tick:
//!
//! ```text
//! Idle → Watching → ReloadPending → Reloading → Watching
//! ```
//!
//! The watcher thread only ever touches the flag — teardown and module
//! re-loading happen on the main thread, which owns everything else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{recommended_watcher, EventKind, RecursiveMode, Watcher};

use crate::error::HostError;

/// Controller states. Transitions are driven by [`HotReload::poll`],
/// [`HotReload::begin`] and [`HotReload::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    /// No watch installed.
    Idle,
    /// Watching the entry script.
    Watching,
    /// A change notification arrived; reload at the next tick boundary.
    ReloadPending,
    /// Teardown and re-execution in progress.
    Reloading,
}

/// A watch tied to the currently loaded script. Replaced wholesale on
/// reload, never partially updated.
struct WatchSubscription {
    path: PathBuf,
    /// Kept alive to keep receiving events.
    _watcher: notify::RecommendedWatcher,
}

/// Watches one entry script and reports when a reload is due.
pub struct HotReload {
    state: ReloadState,
    subscription: Option<WatchSubscription>,
    pending: Arc<AtomicBool>,
}

impl HotReload {
    /// Create an idle controller.
    pub fn new() -> Self {
        Self {
            state: ReloadState::Idle,
            subscription: None,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state.
    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// The watched entry path, if watching.
    pub fn watched_path(&self) -> Option<&Path> {
        self.subscription.as_ref().map(|s| s.path.as_path())
    }

    /// Install a watch on `path`, replacing any existing subscription.
    ///
    /// The parent directory is watched non-recursively and events are
    /// filtered to the entry path, because editors that save through a
    /// rename would otherwise kill a direct file watch.
    pub fn watch(&mut self, path: &Path) -> Result<(), HostError> {
        self.subscription = None;
        self.pending.store(false, Ordering::Release);
        self.state = ReloadState::Idle;

        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let watch_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| canonical.clone());

        let pending = Arc::clone(&self.pending);
        let entry = canonical.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let relevant_kind = matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            );
            if relevant_kind && event.paths.iter().any(|p| *p == entry) {
                // Repeated notifications before the next tick collapse
                // into one pending reload.
                pending.store(true, Ordering::Release);
            }
        })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        self.subscription = Some(WatchSubscription {
            path: canonical,
            _watcher: watcher,
        });
        self.state = ReloadState::Watching;
        Ok(())
    }

    /// Drop the watch and return to Idle.
    pub fn clear(&mut self) {
        self.subscription = None;
        self.pending.store(false, Ordering::Release);
        self.state = ReloadState::Idle;
    }

    /// Sample the pending flag. Moves Watching → ReloadPending when a
    /// notification arrived; returns whether a reload is due.
    pub fn poll(&mut self) -> bool {
        if self.state == ReloadState::Watching && self.pending.swap(false, Ordering::AcqRel) {
            self.state = ReloadState::ReloadPending;
        }
        self.state == ReloadState::ReloadPending
    }

    /// ReloadPending → Reloading.
    pub fn begin(&mut self) {
        if self.state == ReloadState::ReloadPending {
            self.state = ReloadState::Reloading;
        }
    }

    /// Reloading → Watching, on success and on failure alike: a failed
    /// reload keeps watching so the next save retries, with no rollback.
    pub fn finish(&mut self) {
        if self.state == ReloadState::Reloading {
            self.state = ReloadState::Watching;
        }
    }
}

impl Default for HotReload {
    fn default() -> Self {
        Self::new()
    }
}
