//! Server
//!
//! Wraps an [`Application`] with the watchdog consumer thread and the
//! start/stop sequence used by the binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sas_core::error::CoreError;
use sas_core::{Application, ConfigReader, ErrorCollector, LibraryOpener};

/// Host process lifecycle around one [`Application`]
pub struct Server {
    app: Arc<Application>,
    running: AtomicBool,
}

impl Server {
    /// Create a stopped server
    pub fn new(
        config: Arc<dyn ConfigReader>,
        args: Vec<String>,
        opener: impl LibraryOpener + 'static,
    ) -> Self {
        Self {
            app: Application::with_opener(config, args, opener),
            running: AtomicBool::new(false),
        }
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.app
    }

    /// True between a successful `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the watchdog, load the components, then start their interfaces.
    /// Nothing is left running on failure.
    pub fn start(&self, ec: &mut dyn ErrorCollector) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return true;
        }
        tracing::info!(version = %self.app.version(), "Starting SAS server");

        let watchdog = self.app.watchdog();
        if !watchdog.start(self.app.thread_pool()) {
            ec.add_error(&CoreError::ThreadUnavailable("watchdog".to_string()));
            self.running.store(false, Ordering::SeqCst);
            return false;
        }

        if !self.app.init(ec) {
            tracing::error!("Application could not be initialized");
            watchdog.shutdown();
            self.running.store(false, Ordering::SeqCst);
            return false;
        }

        if !self.app.interface_manager().start(ec) {
            tracing::error!("Interfaces could not be started");
            self.stop();
            return false;
        }

        tracing::info!(
            objects = self.app.registry().len(),
            interfaces = self.app.interface_manager().len(),
            "SAS server started"
        );
        true
    }

    /// Tear the application down, then stop the watchdog once every
    /// lifecycle event has been delivered
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping SAS server");
        self.app.deinit();
        self.app.watchdog().shutdown();
        tracing::info!("SAS server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
