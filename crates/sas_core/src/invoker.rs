//! Call dispatch contracts
//!
//! An [`Invoker`] is the minimal call contract. A [`Connector`] is a shared
//! transport handle that hands out session-scoped [`Connection`]s, and a
//! [`Module`] is a local session source.

use std::fmt;
use std::sync::Arc;

use crate::error::ErrorCollector;
use crate::object::Object;
use crate::session::{SessionGuard, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeStatus {
    Ok,
    Error,
    FatalError,
    NotImplemented,
}

impl InvokeStatus {
    pub fn is_ok(self) -> bool {
        self == InvokeStatus::Ok
    }
}

impl fmt::Display for InvokeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvokeStatus::Ok => "ok",
            InvokeStatus::Error => "error",
            InvokeStatus::FatalError => "fatal error",
            InvokeStatus::NotImplemented => "not implemented",
        };
        f.write_str(s)
    }
}

/// Executes one call on raw bytes
pub trait Invoker: Send {
    fn invoke(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        ec: &mut dyn ErrorCollector,
    ) -> InvokeStatus;
}

/// An invoker bound to one remote `(module, invoker)` pair and one session
pub trait Connection: Invoker {
    /// Make sure the remote session exists
    fn get_session(&mut self, ec: &mut dyn ErrorCollector) -> bool;

    fn session_id(&self) -> SessionId;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub description: String,
    pub version: String,
}

/// Reaches modules through some transport
pub trait Connector: Object {
    /// Establish the transport handle; a no-op while connected
    fn connect(&self, ec: &mut dyn ErrorCollector) -> bool;

    fn get_module_info(&self, module_name: &str, ec: &mut dyn ErrorCollector)
    -> Option<ModuleInfo>;

    fn create_connection(
        &self,
        module_name: &str,
        invoker_name: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Box<dyn Connection>>;
}

/// A callable service with its own sessions
pub trait Module: Object {
    fn description(&self) -> String {
        String::new()
    }

    fn version(&self) -> String {
        String::new()
    }

    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            description: self.description(),
            version: self.version(),
        }
    }

    /// Fetch or create a session; it stays locked until the guard is dropped
    fn get_session(&self, id: SessionId, ec: &mut dyn ErrorCollector) -> Option<SessionGuard>;

    fn end_session(&self, id: SessionId) -> bool;
}

/// Builds connectors on demand
pub trait ConnectorFactory: Object {
    fn make(
        &self,
        name: &str,
        connection_string: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Arc<dyn Connector>>;
}
