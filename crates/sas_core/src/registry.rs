//! Object Registry
//!
//! Owns every long-lived object, keyed by `(type, name)`. Each type has its
//! own bucket lock so registrations under different types never contend.
//! Registration order is remembered and drives teardown.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{CoreError, ErrorCollector};
use crate::invoker::{Connector, ConnectorFactory, Module};
use crate::object::{
    CONNECTOR_FACTORY_TYPE, CONNECTOR_TYPE, MODULE_TYPE, Object, object_key, same_object,
};

type Bucket = Arc<Mutex<BTreeMap<String, Arc<dyn Object>>>>;

#[derive(Default)]
pub struct ObjectRegistry {
    /// Type name -> name-keyed bucket
    buckets: DashMap<String, Bucket>,

    /// `(type, name)` in registration order
    order: Mutex<Vec<(String, String)>>,
}

enum Inserted {
    New,
    Same,
    Conflict,
}

impl ObjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn find_bucket(&self, object_type: &str) -> Option<Bucket> {
        self.buckets.get(object_type).map(|b| Arc::clone(b.value()))
    }

    fn bucket(&self, object_type: &str) -> Bucket {
        if let Some(bucket) = self.find_bucket(object_type) {
            return bucket;
        }
        Arc::clone(
            self.buckets
                .entry(object_type.to_string())
                .or_default()
                .value(),
        )
    }

    fn insert(bucket: &mut BTreeMap<String, Arc<dyn Object>>, object: &Arc<dyn Object>) -> Inserted {
        match bucket.get(object.name()) {
            Some(existing) if same_object(existing, object) => Inserted::Same,
            Some(_) => Inserted::Conflict,
            None => {
                bucket.insert(object.name().to_string(), Arc::clone(object));
                Inserted::New
            }
        }
    }

    fn report(&self, outcome: Inserted, object: &Arc<dyn Object>, ec: &mut dyn ErrorCollector) -> bool {
        match outcome {
            Inserted::New => {
                self.order
                    .lock()
                    .push((object.object_type().to_string(), object.name().to_string()));
                tracing::debug!(object = %object_key(object.as_ref()), "Registered object");
                true
            }
            Inserted::Same => {
                tracing::info!(object = %object_key(object.as_ref()), "Object is already registered");
                true
            }
            Inserted::Conflict => {
                let error = CoreError::AlreadyRegistered {
                    object_type: object.object_type().to_string(),
                    name: object.name().to_string(),
                };
                tracing::error!(object = %object_key(object.as_ref()), "{}", error);
                ec.add_error(&error);
                false
            }
        }
    }

    /// Register one object; fails if another instance holds its key
    pub fn register_object(&self, object: Arc<dyn Object>, ec: &mut dyn ErrorCollector) -> bool {
        let bucket = self.bucket(object.object_type());
        let outcome = Self::insert(&mut bucket.lock(), &object);
        self.report(outcome, &object, ec)
    }

    /// Register many objects, one bucket lock per type. Every object is
    /// attempted; the result is true only if all of them succeeded.
    pub fn register_objects(&self, objects: Vec<Arc<dyn Object>>, ec: &mut dyn ErrorCollector) -> bool {
        let mut by_type: Vec<(String, Vec<Arc<dyn Object>>)> = Vec::new();
        for object in objects {
            match by_type.iter_mut().find(|(t, _)| t == object.object_type()) {
                Some((_, group)) => group.push(object),
                None => by_type.push((object.object_type().to_string(), vec![object])),
            }
        }

        let mut ok = true;
        for (object_type, group) in by_type {
            let bucket = self.bucket(&object_type);
            let outcomes: Vec<Inserted> = {
                let mut names = bucket.lock();
                group.iter().map(|o| Self::insert(&mut names, o)).collect()
            };
            for (outcome, object) in outcomes.into_iter().zip(&group) {
                ok &= self.report(outcome, object, ec);
            }
        }
        ok
    }

    /// Look up one object by type and name
    pub fn get_object(
        &self,
        object_type: &str,
        name: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Arc<dyn Object>> {
        let Some(bucket) = self.find_bucket(object_type) else {
            ec.add_error(&CoreError::TypeNotFound(object_type.to_string()));
            return None;
        };
        let found = bucket.lock().get(name).cloned();
        if found.is_none() {
            ec.add_error(&CoreError::ObjectNotFound {
                object_type: object_type.to_string(),
                name: name.to_string(),
            });
        }
        found
    }

    /// All objects of a type, ordered by name
    pub fn get_objects(&self, object_type: &str, ec: &mut dyn ErrorCollector) -> Vec<Arc<dyn Object>> {
        let objects: Vec<Arc<dyn Object>> = self
            .find_bucket(object_type)
            .map(|bucket| bucket.lock().values().cloned().collect())
            .unwrap_or_default();
        if objects.is_empty() {
            ec.add_error(&CoreError::NoObjectsOfType(object_type.to_string()));
        }
        objects
    }

    /// Whether an object of this type and name is registered
    pub fn contains(&self, object_type: &str, name: &str) -> bool {
        self.find_bucket(object_type)
            .is_some_and(|bucket| bucket.lock().contains_key(name))
    }

    /// Number of registered objects across all types
    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deinit and remove one object outside the bulk teardown. The object is
    /// dropped once the last outside reference goes away.
    pub fn destroy_object(&self, object_type: &str, name: &str) -> bool {
        let removed = self
            .find_bucket(object_type)
            .and_then(|bucket| bucket.lock().remove(name));

        let Some(object) = removed else {
            tracing::warn!(object_type = %object_type, name = %name, "Object to destroy is not found");
            return false;
        };
        self.order
            .lock()
            .retain(|(t, n)| !(t == object_type && n == name));
        object.deinit();
        true
    }

    /// Two-phase teardown in registration order: every `deinit` first, then
    /// every object is dropped from the registry.
    pub fn clear(&self) {
        let order = std::mem::take(&mut *self.order.lock());

        let mut ec = crate::error::NullErrors;
        for (object_type, name) in &order {
            if let Some(object) = self.get_object(object_type, name, &mut ec) {
                object.deinit();
            }
        }

        for (object_type, name) in &order {
            let removed = self
                .find_bucket(object_type)
                .and_then(|bucket| bucket.lock().remove(name));
            drop(removed);
        }
        self.buckets.clear();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Typed lookups
    // ─────────────────────────────────────────────────────────────────────

    /// Registered connector by name
    pub fn get_connector(&self, name: &str, ec: &mut dyn ErrorCollector) -> Option<Arc<dyn Connector>> {
        let object = self.get_object(CONNECTOR_TYPE, name, ec)?;
        capability(object, "connector", ec, |o| o.into_connector())
    }

    /// Registered module by name
    pub fn get_module(&self, name: &str, ec: &mut dyn ErrorCollector) -> Option<Arc<dyn Module>> {
        let object = self.get_object(MODULE_TYPE, name, ec)?;
        capability(object, "module", ec, |o| o.into_module())
    }

    /// Registered connector factory by name
    pub fn get_connector_factory(
        &self,
        name: &str,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Arc<dyn ConnectorFactory>> {
        let object = self.get_object(CONNECTOR_FACTORY_TYPE, name, ec)?;
        capability(object, "connector factory", ec, |o| o.into_connector_factory())
    }
}

fn capability<T: ?Sized>(
    object: Arc<dyn Object>,
    expected: &'static str,
    ec: &mut dyn ErrorCollector,
    cast: impl FnOnce(Arc<dyn Object>) -> Option<Arc<T>>,
) -> Option<Arc<T>> {
    let object_type = object.object_type().to_string();
    let name = object.name().to_string();
    let cast = cast(object);
    if cast.is_none() {
        ec.add_error(&CoreError::CapabilityMismatch {
            object_type,
            name,
            expected,
        });
    }
    cast
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorList, codes};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Probe {
        object_type: &'static str,
        name: String,
        log: Log,
    }

    impl Probe {
        fn new(object_type: &'static str, name: &str, log: &Log) -> Arc<dyn Object> {
            Arc::new(Probe {
                object_type,
                name: name.to_string(),
                log: Arc::clone(log),
            })
        }
    }

    impl Object for Probe {
        fn object_type(&self) -> &str {
            self.object_type
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn deinit(&self) {
            self.log.lock().push(format!("deinit:{}", self.name));
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.log.lock().push(format!("drop:{}", self.name));
        }
    }

    #[test]
    fn test_same_instance_registers_twice() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        let a = Probe::new("connector", "x", &log);
        assert!(registry.register_object(Arc::clone(&a), &mut ec));
        assert!(registry.register_object(Arc::clone(&a), &mut ec));
        assert!(ec.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_instance_same_key_fails() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        let a = Probe::new("connector", "x", &log);
        let b = Probe::new("connector", "x", &log);
        assert!(registry.register_object(Arc::clone(&a), &mut ec));
        assert!(!registry.register_object(b, &mut ec));
        assert!(ec.contains_code(codes::ALREADY_REGISTERED));

        let found = registry.get_object("connector", "x", &mut ec).unwrap();
        assert!(same_object(&found, &a));
    }

    #[test]
    fn test_register_objects_attempts_every_item() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        registry.register_object(Probe::new("module", "m", &log), &mut ec);

        let ok = registry.register_objects(
            vec![
                Probe::new("connector", "a", &log),
                Probe::new("module", "m", &log),
                Probe::new("module", "n", &log),
            ],
            &mut ec,
        );
        assert!(!ok);
        assert_eq!(ec.len(), 1);
        assert!(registry.contains("connector", "a"));
        assert!(registry.contains("module", "n"));
    }

    #[test]
    fn test_lookup_errors() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        assert!(registry.get_object("connector", "x", &mut ec).is_none());
        assert!(ec.contains_code(codes::TYPE_NOT_FOUND));

        registry.register_object(Probe::new("connector", "y", &log), &mut ec);
        ec.clear();
        assert!(registry.get_object("connector", "x", &mut ec).is_none());
        assert!(ec.contains_code(codes::OBJECT_NOT_FOUND));

        ec.clear();
        assert!(registry.get_objects("module", &mut ec).is_empty());
        assert_eq!(ec.len(), 1);
    }

    #[test]
    fn test_get_objects_sorted_by_name() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        for name in ["c", "a", "b"] {
            registry.register_object(Probe::new("module", name, &log), &mut ec);
        }
        let names: Vec<String> = registry
            .get_objects("module", &mut ec)
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_typed_lookup_rejects_wrong_capability() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        registry.register_object(Probe::new("connector", "x", &log), &mut ec);
        assert!(registry.get_connector("x", &mut ec).is_none());
        assert!(ec.contains_code(codes::CAPABILITY_MISMATCH));
    }

    #[test]
    fn test_clear_deinits_all_before_dropping_any() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        for name in ["o1", "o2", "o3"] {
            registry.register_object(Probe::new("module", name, &log), &mut ec);
        }

        registry.clear();

        assert_eq!(
            *log.lock(),
            [
                "deinit:o1", "deinit:o2", "deinit:o3", "drop:o1", "drop:o2", "drop:o3"
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_destroy_object() {
        let log = Log::default();
        let registry = ObjectRegistry::new();
        let mut ec = ErrorList::new();
        registry.register_object(Probe::new("module", "m", &log), &mut ec);
        assert!(registry.destroy_object("module", "m"));
        assert!(!registry.destroy_object("module", "m"));
        assert!(!registry.contains("module", "m"));
        assert_eq!(*log.lock(), ["deinit:m", "drop:m"]);
        assert!(registry.is_empty());
    }
}
