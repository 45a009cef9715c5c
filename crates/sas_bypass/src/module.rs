//! Bypass module
//!
//! A module that forwards every call to a module reachable through a
//! connector. Each local session keeps one outgoing connection per invoker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sas_core::config::config_path;
use sas_core::error::CoreError;
use sas_core::object::MODULE_TYPE;
use sas_core::session::{DEFAULT_SWEEP_INTERVAL, MAX_SESSIONS_PATH, SWEEP_INTERVAL_PATH};
use sas_core::{
    Application, Connection, Connector, ErrorCollector, InvokeStatus, Invoker, Module, ModuleInfo,
    Object, Session, SessionFactory, SessionGuard, SessionId, SessionManager,
};

/// Connector the module forwards through
pub const CONNECTOR_KEY: &str = "CONNECTOR";
/// Target module name; defaults to the bypass module name
pub const MODULE_KEY: &str = "MODULE";
pub const SESSION_LIFETIME_KEY: &str = "DEFAULT_SESSION_LIFETIME";
pub const MAX_SESSIONS_KEY: &str = "MAX_SESSIONS";

/// Seconds
pub const DEFAULT_SESSION_LIFETIME: i64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

struct BypassInvoker(Box<dyn Connection>);

impl Invoker for BypassInvoker {
    fn invoke(&mut self, input: &[u8], output: &mut Vec<u8>, ec: &mut dyn ErrorCollector) -> InvokeStatus {
        self.0.invoke(input, output, ec)
    }
}

pub struct BypassSession {
    id: SessionId,
    connector: Arc<dyn Connector>,
    module: String,
    invokers: BTreeMap<String, BypassInvoker>,
}

impl Session for BypassSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn invoker(&mut self, name: &str, ec: &mut dyn ErrorCollector) -> Option<&mut dyn Invoker> {
        if !self.invokers.contains_key(name) {
            let connection = self.connector.create_connection(&self.module, name, ec)?;
            self.invokers.insert(name.to_string(), BypassInvoker(connection));
        }
        self.invokers
            .get_mut(name)
            .map(|invoker| invoker as &mut dyn Invoker)
    }
}

pub struct BypassSessions {
    connector: Arc<dyn Connector>,
    module: String,
}

impl SessionFactory for BypassSessions {
    fn create_session(&self, id: SessionId, _ec: &mut dyn ErrorCollector) -> Option<Box<dyn Session>> {
        Some(Box::new(BypassSession {
            id,
            connector: Arc::clone(&self.connector),
            module: self.module.clone(),
            invokers: BTreeMap::new(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module
// ─────────────────────────────────────────────────────────────────────────────

/// Module that forwards every call to another module
pub struct BypassModule {
    name: String,
    info: ModuleInfo,
    sessions: SessionManager<BypassSessions>,
}

impl BypassModule {
    /// Build the module from the entries under `base`.
    ///
    /// The connector must already be registered; it is connected and asked
    /// for the target module's description before the module is returned.
    pub fn from_config(
        app: &Arc<Application>,
        name: &str,
        base: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Arc<Self>> {
        let config = app.config();

        let connector_path = config_path(base, CONNECTOR_KEY);
        let Some(connector_name) = config.entry(&connector_path).and_then(|v| v.into_iter().next())
        else {
            tracing::error!(module = %name, path = %connector_path, "Connector is not specified for bypass module");
            ec.add_error(&CoreError::MissingConfigEntry(connector_path));
            return None;
        };

        let connector = app.registry().get_connector(&connector_name, ec)?;
        if !connector.connect(ec) {
            tracing::error!(module = %name, connector = %connector_name, "Could not connect");
            return None;
        }

        let target = config.string_entry_or(&config_path(base, MODULE_KEY), name);
        let lifetime = config
            .number_entry_or(&config_path(base, SESSION_LIFETIME_KEY), DEFAULT_SESSION_LIFETIME)
            .max(0) as u64;
        let max_sessions = config.number_entry_or(
            &config_path(base, MAX_SESSIONS_KEY),
            config.number_entry_or(MAX_SESSIONS_PATH, 0),
        );
        let sweep_interval = config
            .number_entry_or(SWEEP_INTERVAL_PATH, DEFAULT_SWEEP_INTERVAL.as_millis() as i64)
            .max(1) as u64;

        let factory = BypassSessions {
            connector: Arc::clone(&connector),
            module: target.clone(),
        };
        let sessions = if max_sessions > 0 {
            SessionManager::with_capacity(name, factory, max_sessions as usize)
        } else {
            SessionManager::new(name, factory)
        }
        .with_sweep_interval(Duration::from_millis(sweep_interval));
        if !sessions.init(Duration::from_secs(lifetime), app.thread_pool(), ec) {
            return None;
        }

        let info = connector.get_module_info(&target, ec)?;
        tracing::info!(
            module = %name,
            connector = %connector_name,
            target = %target,
            lifetime_secs = lifetime,
            "Bypass module ready"
        );

        Some(Arc::new(Self {
            name: name.to_string(),
            info,
            sessions,
        }))
    }
}

impl Object for BypassModule {
    fn object_type(&self) -> &str {
        MODULE_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn deinit(&self) {
        self.sessions.deinit();
    }

    fn into_module(self: Arc<Self>) -> Option<Arc<dyn Module>> {
        Some(self)
    }
}

impl Module for BypassModule {
    fn description(&self) -> String {
        self.info.description.clone()
    }

    fn version(&self) -> String {
        self.info.version.clone()
    }

    fn get_session(&self, id: SessionId, ec: &mut dyn ErrorCollector) -> Option<SessionGuard> {
        self.sessions.get_session(id, ec)
    }

    fn end_session(&self, id: SessionId) -> bool {
        self.sessions.end_session(id)
    }
}
