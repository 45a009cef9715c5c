// BypassComponent - registers loopback transports and bypass modules

use std::sync::Arc;

use sas_core::{Application, Component, ErrorCollector, Object};

use crate::loopback::{LoopbackConnector, LoopbackConnectorFactory};
use crate::module::BypassModule;

pub const BYPASS_PATH: &str = "SAS/BYPASS";
pub const LOOPBACK_CONNECTORS_PATH: &str = "SAS/BYPASS/LOOPBACK_CONNECTORS";
pub const LOOPBACK_CONNECTOR_FACTORIES_PATH: &str = "SAS/BYPASS/LOOPBACK_CONNECTOR_FACTORIES";
pub const MODULES_PATH: &str = "SAS/BYPASS/MODULES";

#[derive(Debug, Default)]
pub struct BypassComponent;

impl BypassComponent {
    pub fn new() -> Self {
        Self
    }

    fn names(app: &Application, path: &str, what: &str) -> Vec<String> {
        match app.config().entry(path) {
            Some(names) => names,
            None => {
                tracing::info!(path = %path, "No {} configured", what);
                Vec::new()
            }
        }
    }
}

impl Component for BypassComponent {
    fn name(&self) -> &str {
        "SAS Bypass"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Loopback connectors and forwarding modules"
    }

    /// Transports are registered before modules are built so that a bypass
    /// module can forward through a loopback connector of this component.
    fn init(&self, app: &Arc<Application>, ec: &mut dyn ErrorCollector) -> bool {
        let mut transports: Vec<Arc<dyn Object>> = Vec::new();
        for name in Self::names(app, LOOPBACK_CONNECTORS_PATH, "loopback connectors") {
            transports.push(Arc::new(LoopbackConnector::new(app, name)));
        }
        for name in Self::names(app, LOOPBACK_CONNECTOR_FACTORIES_PATH, "loopback connector factories") {
            transports.push(Arc::new(LoopbackConnectorFactory::new(app, name)));
        }
        if !transports.is_empty() && !app.registry().register_objects(transports, ec) {
            return false;
        }

        let mut modules: Vec<Arc<dyn Object>> = Vec::new();
        for name in Self::names(app, MODULES_PATH, "bypass modules") {
            let base = format!("{}/{}", BYPASS_PATH, name);
            match BypassModule::from_config(app, &name, &base, ec) {
                Some(module) => modules.push(module),
                None => {
                    tracing::error!(module = %name, "Could not initialize bypass module");
                    for module in &modules {
                        module.deinit();
                    }
                    return false;
                }
            }
        }
        if modules.is_empty() {
            return true;
        }
        app.registry().register_objects(modules, ec)
    }
}

impl Drop for BypassComponent {
    fn drop(&mut self) {
        tracing::debug!(component = %self.name(), "Detaching component");
    }
}
