// Object - long-lived, registry-owned service objects

use std::sync::Arc;

use crate::invoker::{Connector, ConnectorFactory, Module};

pub const CONNECTOR_TYPE: &str = "connector";
pub const MODULE_TYPE: &str = "module";
pub const CONNECTOR_FACTORY_TYPE: &str = "connector_factory";

/// A named object of a given type, keyed in the registry by `(type, name)`
pub trait Object: Send + Sync + 'static {
    fn object_type(&self) -> &str;

    fn name(&self) -> &str;

    /// Called exactly once by the registry before the object is dropped
    fn deinit(&self) {}

    fn into_connector(self: Arc<Self>) -> Option<Arc<dyn Connector>> {
        None
    }

    fn into_module(self: Arc<Self>) -> Option<Arc<dyn Module>> {
        None
    }

    fn into_connector_factory(self: Arc<Self>) -> Option<Arc<dyn ConnectorFactory>> {
        None
    }
}

/// Identity of two objects, ignoring vtables
pub fn same_object(a: &Arc<dyn Object>, b: &Arc<dyn Object>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Display form `type/name`
pub fn object_key(object: &dyn Object) -> String {
    format!("{}/{}", object.object_type(), object.name())
}
