//! Application
//!
//! Composition root of the host: owns the object registry, the thread pool,
//! the interface manager with its watchdog, and the loaded components.
//! Components are loaded and initialised strictly in configured order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::Dispatch;
use tracing::subscriber::NoSubscriber;

use crate::config::ConfigReader;
use crate::error::{CoreError, ErrorCollector, ErrorList};
use crate::interface_manager::InterfaceManager;
use crate::loader::{ComponentLoader, DynamicLibraryOpener, LibraryOpener};
use crate::registry::ObjectRegistry;
use crate::thread_pool::{SimpleThreadPool, ThreadPool};
use crate::watchdog::Watchdog;

/// Ordered list of component paths to load
pub const COMPONENTS_PATH: &str = "SAS/COMPONENTS";
/// How long interfaces get to stop before they are abandoned
pub const SHUTDOWN_TIMEOUT_PATH: &str = "SAS/SHUTDOWN_TIMEOUT_MS";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

// ─────────────────────────────────────────────────────────────────────────────
// Enabled gate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GateState {
    enabled: bool,
    in_flight: usize,
}

/// Counts calls running under the gate so that closing it can wait for them.
/// Nested calls only bump the counter, so they never deadlock.
#[derive(Default)]
struct EnabledGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl EnabledGate {
    fn open(&self) {
        self.state.lock().enabled = true;
    }

    fn is_open(&self) -> bool {
        self.state.lock().enabled
    }

    fn enter(&self) -> bool {
        let mut state = self.state.lock();
        if !state.enabled {
            return false;
        }
        state.in_flight += 1;
        true
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }

    /// Wait for in-flight calls, then refuse new ones
    fn close(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.drained.wait(&mut state);
        }
        state.enabled = false;
    }
}

struct GateTicket<'a>(&'a EnabledGate);

impl Drop for GateTicket<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application
// ─────────────────────────────────────────────────────────────────────────────

/// The running host
pub struct Application {
    version: String,
    args: Vec<String>,
    config: Arc<dyn ConfigReader>,
    opener: Box<dyn LibraryOpener>,
    pool: Arc<SimpleThreadPool>,
    registry: ObjectRegistry,
    interfaces: InterfaceManager,
    loaders: Mutex<Vec<ComponentLoader>>,
    gate: EnabledGate,
    shutdown_timeout: Duration,
    dispatch: Option<Dispatch>,
}

impl Application {
    /// Build an application that opens components as shared libraries
    pub fn new(config: Arc<dyn ConfigReader>, args: Vec<String>) -> Arc<Self> {
        Self::with_opener(config, args, DynamicLibraryOpener)
    }

    /// Build an application that resolves component paths with `opener`
    pub fn with_opener(
        config: Arc<dyn ConfigReader>,
        args: Vec<String>,
        opener: impl LibraryOpener + 'static,
    ) -> Arc<Self> {
        let pool = SimpleThreadPool::new("sas");
        let watchdog = Watchdog::new();
        let interfaces = InterfaceManager::new(Arc::clone(&pool) as Arc<dyn ThreadPool>, watchdog);
        let shutdown_timeout = config
            .number_entry_or(SHUTDOWN_TIMEOUT_PATH, DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as i64)
            .max(0) as u64;
        let dispatch = tracing::dispatcher::get_default(|current| {
            (!current.is::<NoSubscriber>()).then(|| current.clone())
        });

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            args,
            config,
            opener: Box::new(opener),
            pool,
            registry: ObjectRegistry::new(),
            interfaces,
            loaders: Mutex::new(Vec::new()),
            gate: EnabledGate::default(),
            shutdown_timeout: Duration::from_millis(shutdown_timeout),
            dispatch,
        })
    }

    /// Host version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Raw process arguments
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Configuration shared with every component
    pub fn config(&self) -> &dyn ConfigReader {
        self.config.as_ref()
    }

    /// Registry of connectors, modules and connector factories
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Pool that backs managed and timer threads
    pub fn thread_pool(&self) -> Arc<dyn ThreadPool> {
        Arc::clone(&self.pool) as Arc<dyn ThreadPool>
    }

    /// Manager of the registered network interfaces
    pub fn interface_manager(&self) -> &InterfaceManager {
        &self.interfaces
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        self.interfaces.watchdog()
    }

    /// Log dispatcher that was current when the application was built;
    /// handed to every component before its `init`
    pub fn dispatch(&self) -> Option<&Dispatch> {
        self.dispatch.as_ref()
    }

    /// True between `init` and `deinit`
    pub fn is_enabled(&self) -> bool {
        self.gate.is_open()
    }

    /// Run `func` only while the application is enabled; `None` otherwise.
    ///
    /// Calling [`deinit`](Self::deinit) from inside `func` deadlocks.
    pub fn call_if_enabled<R>(&self, func: impl FnOnce() -> R) -> Option<R> {
        if !self.gate.enter() {
            tracing::debug!("Application is disabled, call skipped");
            return None;
        }
        let _ticket = GateTicket(&self.gate);
        Some(func())
    }

    /// Load and initialise the configured components
    pub fn init(self: &Arc<Self>, ec: &mut dyn ErrorCollector) -> bool {
        self.gate.open();

        let Some(paths) = self.config.entry(COMPONENTS_PATH) else {
            tracing::warn!("No components are set");
            return true;
        };
        if paths.is_empty() {
            tracing::error!("Components are not set");
            ec.add_error(&CoreError::NoComponents);
            return false;
        }

        let mut loaded = Vec::with_capacity(paths.len());
        let mut failed = false;
        for path in paths {
            let mut loader = ComponentLoader::new(path);
            if loader.load(self.opener.as_ref(), ec) {
                loaded.push(loader);
            } else {
                failed = true;
            }
        }
        *self.loaders.lock() = loaded;
        if failed {
            self.deinit();
            return false;
        }

        let rejected = {
            let loaders = self.loaders.lock();
            let mut rejected = None;
            for loader in loaders.iter() {
                let Some(component) = loader.component() else {
                    continue;
                };
                tracing::info!(
                    component = %component.name(),
                    version = %component.version(),
                    description = %component.description(),
                    path = %loader.path(),
                    "Initializing component"
                );
                if let Some(dispatch) = &self.dispatch {
                    component.adopt_dispatch(dispatch);
                }
                if !component.init(self, ec) {
                    rejected = Some(component.name().to_string());
                    break;
                }
            }
            rejected
        };

        if let Some(name) = rejected {
            tracing::error!(component = %name, "Component could not be initialized");
            ec.add_error(&CoreError::ComponentInit(name));
            self.deinit();
            return false;
        }
        true
    }

    /// Stop everything in reverse order of construction
    pub fn deinit(&self) {
        self.gate.close();

        let mut errors = ErrorList::new();
        if !self.interfaces.stop_or_terminate(self.shutdown_timeout, &mut errors) {
            tracing::warn!(errors = %errors.join("; "), "Interfaces did not stop cleanly");
        }
        self.watchdog().flush();

        self.registry.clear();

        let mut loaders = std::mem::take(&mut *self.loaders.lock());
        while let Some(mut loader) = loaders.pop() {
            loader.unload();
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.deinit();
    }
}
