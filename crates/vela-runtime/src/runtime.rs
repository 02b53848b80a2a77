//! The runtime: one engine, one host, one VFS, one loaded application.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vela_bundle::Vfs;
use vela_host::{
    CompletionKind, Host, HostConfig, HostContext, HostError, HotReload, Protected, ReloadState,
    TimerId,
};
use vela_sdk::{Payload, RawValue, ScriptEngine};

use crate::error::RuntimeError;

/// Upper bound on inter-tick sleep in [`Runtime::run`].
const MAX_TICK_WAIT: Duration = Duration::from_millis(1);

/// Embedder-facing configuration. A plain struct: the manifest, the CLI,
/// or the embedder fills it in.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Background worker pool size; 0 sizes from the CPU count.
    pub worker_threads: usize,

    /// Watch the entry script and reload on change. Only effective for
    /// disk-backed entries — bundled scripts cannot change underfoot.
    pub hot_reload: bool,

    /// Install the fatal-signal guard at startup.
    pub install_crash_guard: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            hot_reload: false,
            install_crash_guard: true,
        }
    }
}

/// A running application: owns the [`Host`], the [`Vfs`], the module
/// cache, and the hot-reload controller.
pub struct Runtime<E: ScriptEngine> {
    host: Host<E>,
    vfs: Arc<Vfs>,
    hot_reload: HotReload,
    options: RuntimeOptions,
    modules: HashMap<String, Protected>,
    entry: Option<String>,
}

impl<E: ScriptEngine> Runtime<E> {
    /// Start the host around `engine`. Failure here is fatal at startup:
    /// nothing is left running and the error goes to the embedder.
    pub fn new(engine: E, vfs: Vfs, options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let host = Host::new(
            engine,
            HostConfig {
                worker_threads: options.worker_threads,
                install_crash_guard: options.install_crash_guard,
            },
        )?;
        Ok(Self {
            host,
            vfs: Arc::new(vfs),
            hot_reload: HotReload::new(),
            options,
            modules: HashMap::new(),
            entry: None,
        })
    }

    /// The underlying host.
    pub fn host(&self) -> &Host<E> {
        &self.host
    }

    /// Mutable access to the host (event source attachment, manual ticks).
    pub fn host_mut(&mut self) -> &mut Host<E> {
        &mut self.host
    }

    /// The engine, for embedder-side marshaling.
    pub fn engine(&self) -> &E {
        self.host.engine()
    }

    /// The virtual filesystem.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// A reentrant handle for native bindings.
    pub fn context(&self) -> HostContext {
        self.host.context()
    }

    /// Current hot-reload state.
    pub fn reload_state(&self) -> ReloadState {
        self.hot_reload.state()
    }

    /// The loaded entry path, if any.
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Number of cached modules.
    pub fn loaded_modules(&self) -> usize {
        self.modules.len()
    }

    /// Load and evaluate the entry script from the VFS, then install the
    /// change watch when hot reload is enabled and the entry lives on
    /// disk rather than in the bundle.
    pub fn load_script(&mut self, path: &str) -> Result<(), RuntimeError> {
        let source = self.vfs.read_text(path)?;
        let module = self.host.eval(&source, path)?;
        if let Some(old) = self.modules.insert(path.to_string(), module) {
            self.host.release(old);
        }
        self.entry = Some(path.to_string());

        if self.options.hot_reload {
            if self.vfs.is_disk_backed(path) {
                self.hot_reload.watch(&self.vfs.disk_path(path))?;
            } else {
                log::debug!("hot reload: {} is bundled, not watching", path);
            }
        }
        Ok(())
    }

    /// Evaluate a script from source under a diagnostic name. The module
    /// namespace stays cached until reload or shutdown.
    pub fn eval_script(&mut self, source: &str, name: &str) -> Result<(), RuntimeError> {
        let module = self.host.eval(source, name)?;
        if let Some(old) = self.modules.insert(name.to_string(), module) {
            self.host.release(old);
        }
        Ok(())
    }

    /// Tear down everything bound to the current script context (every
    /// timer, animation registration, pending callback, and cached
    /// module) and re-run module loading from the entry path. Previously
    /// issued timer ids become unknown.
    pub fn reload_script(&mut self) -> Result<(), RuntimeError> {
        let entry = self.entry.clone().ok_or(RuntimeError::NoEntryLoaded)?;

        self.host.teardown_registrations();
        self.clear_module_cache();

        let source = self.vfs.read_text(&entry)?;
        let module = self.host.eval(&source, &entry)?;
        self.modules.insert(entry, module);
        Ok(())
    }

    /// Register a timer; see the host's timer API. Consumes one owned
    /// reference to `callback`.
    pub fn set_timer(&self, callback: RawValue, delay_ms: u64, repeating: bool) -> TimerId {
        self.host.set_timer(callback, delay_ms, repeating)
    }

    /// Cancel a timer; the id is invalid immediately.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.host.cancel_timer(id)
    }

    /// Read a file asynchronously through the VFS (bundle first, disk on
    /// miss). `callback` receives `(bytes, error)` no earlier than the
    /// next tick.
    pub fn read_file_async(&self, path: &str, callback: RawValue) -> Result<(), HostError> {
        let vfs = Arc::clone(&self.vfs);
        let path = path.to_string();
        self.host.submit(CompletionKind::File, callback, move || {
            vfs.read(&path)
                .map(Payload::Bytes)
                .map_err(|e| e.to_string())
        })
    }

    /// Offload a compute job; `callback` receives `(result, error)` no
    /// earlier than the next tick.
    pub fn submit_compute(
        &self,
        callback: RawValue,
        work: impl FnOnce() -> Result<Payload, String> + Send + 'static,
    ) -> Result<(), HostError> {
        self.host.submit(CompletionKind::Compute, callback, work)
    }

    /// Sample the reload controller and, when a change notification is
    /// pending, run the reload at this tick boundary. Returns whether a
    /// reload ran. A failed reload is logged and the controller keeps
    /// watching — the next save retries; there is no rollback.
    pub fn poll_reload(&mut self) -> bool {
        if !self.hot_reload.poll() {
            return false;
        }
        self.hot_reload.begin();
        match self.reload_script() {
            Ok(()) => {
                if let Some(entry) = &self.entry {
                    log::info!("reloaded {}", entry);
                }
            }
            Err(e) => log::error!("reload failed: {}", e),
        }
        self.hot_reload.finish();
        true
    }

    /// One tick: pending reload first, then the host's fixed tick order.
    pub fn tick(&mut self) -> bool {
        self.poll_reload();
        self.host.tick()
    }

    /// Drive [`tick`](Runtime::tick) until the loop stops: quit
    /// requested, or headless idle-drain.
    pub fn run(&mut self) {
        while self.tick() {
            let wait = self
                .host
                .next_timer_deadline()
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(MAX_TICK_WAIT)
                .min(MAX_TICK_WAIT);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    /// Orderly shutdown: clear the watch, release cached modules, then
    /// shut the host down (which stops intake, cancels timers, drains
    /// the background pool, and runs two collection passes). Idempotent.
    pub fn shutdown(&mut self) {
        self.hot_reload.clear();
        self.clear_module_cache();
        self.host.shutdown();
    }

    fn clear_module_cache(&mut self) {
        for (_, module) in self.modules.drain() {
            module.release(self.host.engine());
        }
    }
}

impl<E: ScriptEngine> Drop for Runtime<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
