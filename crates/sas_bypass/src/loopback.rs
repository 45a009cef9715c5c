//! Loopback transport
//!
//! A connector that reaches modules registered in the same process. Calls go
//! through the application's enabled gate so they stop once shutdown starts.

use std::sync::{Arc, Weak};

use sas_core::error::CoreError;
use sas_core::object::{CONNECTOR_FACTORY_TYPE, CONNECTOR_TYPE};
use sas_core::{
    Application, Connection, Connector, ConnectorFactory, ErrorCollector, InvokeStatus, Invoker,
    ModuleInfo, Object, SessionId,
};

fn upgrade(app: &Weak<Application>, ec: &mut dyn ErrorCollector) -> Option<Arc<Application>> {
    let app = app.upgrade();
    if app.is_none() {
        ec.add_error(&CoreError::Disabled);
    }
    app
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Connector to modules registered in this process
pub struct LoopbackConnector {
    name: String,
    app: Weak<Application>,
}

impl LoopbackConnector {
    pub fn new(app: &Arc<Application>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app: Arc::downgrade(app),
        }
    }
}

impl Object for LoopbackConnector {
    fn object_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn into_connector(self: Arc<Self>) -> Option<Arc<dyn Connector>> {
        Some(self)
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, _ec: &mut dyn ErrorCollector) -> bool {
        true
    }

    fn get_module_info(&self, module_name: &str, ec: &mut dyn ErrorCollector) -> Option<ModuleInfo> {
        let app = upgrade(&self.app, ec)?;
        let info = app.call_if_enabled(|| {
            app.registry()
                .get_module(module_name, ec)
                .map(|module| module.info())
        });
        match info {
            Some(info) => info,
            None => {
                ec.add_error(&CoreError::Disabled);
                None
            }
        }
    }

    fn create_connection(
        &self,
        module_name: &str,
        invoker_name: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Box<dyn Connection>> {
        let app = upgrade(&self.app, ec)?;
        let exists = app
            .call_if_enabled(|| app.registry().get_module(module_name, ec).is_some())
            .unwrap_or(false);
        if !exists {
            return None;
        }
        Some(Box::new(LoopbackConnection {
            app: self.app.clone(),
            module: module_name.to_string(),
            invoker: invoker_name.to_string(),
            session: SessionId::UNSET,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Connection
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves its module by name on every call
pub struct LoopbackConnection {
    app: Weak<Application>,
    module: String,
    invoker: String,
    session: SessionId,
}

impl Invoker for LoopbackConnection {
    fn invoke(&mut self, input: &[u8], output: &mut Vec<u8>, ec: &mut dyn ErrorCollector) -> InvokeStatus {
        let Some(app) = upgrade(&self.app, ec) else {
            return InvokeStatus::Error;
        };
        let Self {
            module,
            invoker,
            session,
            ..
        } = self;

        let status = app.call_if_enabled(|| {
            let Some(module) = app.registry().get_module(module, ec) else {
                return InvokeStatus::Error;
            };
            let Some(mut guard) = module.get_session(*session, ec) else {
                return InvokeStatus::Error;
            };
            *session = guard.id();
            guard.invoke(invoker, input, output, ec)
        });
        status.unwrap_or_else(|| {
            ec.add_error(&CoreError::Disabled);
            InvokeStatus::Error
        })
    }
}

impl Connection for LoopbackConnection {
    fn get_session(&mut self, ec: &mut dyn ErrorCollector) -> bool {
        let Some(app) = upgrade(&self.app, ec) else {
            return false;
        };
        let (module, session) = (&self.module, &mut self.session);

        app.call_if_enabled(|| {
            let Some(module) = app.registry().get_module(module, ec) else {
                return false;
            };
            match module.get_session(*session, ec) {
                Some(guard) => {
                    *session = guard.id();
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Connector Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Makes loopback connectors
pub struct LoopbackConnectorFactory {
    name: String,
    app: Weak<Application>,
}

impl LoopbackConnectorFactory {
    pub fn new(app: &Arc<Application>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app: Arc::downgrade(app),
        }
    }
}

impl Object for LoopbackConnectorFactory {
    fn object_type(&self) -> &str {
        CONNECTOR_FACTORY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn into_connector_factory(self: Arc<Self>) -> Option<Arc<dyn ConnectorFactory>> {
        Some(self)
    }
}

impl ConnectorFactory for LoopbackConnectorFactory {
    /// The connection string is ignored; an empty name takes the factory's
    fn make(
        &self,
        name: &str,
        _connection_string: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Arc<dyn Connector>> {
        let app = upgrade(&self.app, ec)?;
        let name = if name.is_empty() { &self.name } else { name };
        Some(Arc::new(LoopbackConnector::new(&app, name)))
    }
}
