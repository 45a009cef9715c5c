//! Unique-ID keyed resources
//!
//! A [`ResourceManager`] lazily creates resources on first use and keeps them
//! in a [`Depot`] keyed by [`UniqueId`]. Ids are minted from the microsecond
//! clock and re-sampled until they are free in the depot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{CoreError, ErrorCollector};

/// 64-bit time derived key; zero means "not assigned yet"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UniqueId(pub u64);

impl UniqueId {
    /// Placeholder for "no id yet"
    pub const UNSET: UniqueId = UniqueId(0);

    /// True for [`UniqueId::UNSET`]
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Current time in microseconds since the epoch
    pub fn now() -> Self {
        let micros = chrono::Utc::now().timestamp_micros();
        UniqueId(u64::try_from(micros).unwrap_or(1).max(1))
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UniqueId {
    fn from(value: u64) -> Self {
        UniqueId(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Depot
// ─────────────────────────────────────────────────────────────────────────────

/// A stored resource with its last-use time
pub struct DepotEntry<T> {
    pub resource: Arc<T>,
    pub last_touched: Instant,
}

impl<T> DepotEntry<T> {
    /// Time since the entry was last handed out
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }
}

/// The locked map backing a resource manager
pub struct Depot<T> {
    entries: Mutex<BTreeMap<UniqueId, DepotEntry<T>>>,
}

impl<T> Default for Depot<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> Depot<T> {
    /// Lock the entry map
    pub fn lock(&self) -> MutexGuard<'_, BTreeMap<UniqueId, DepotEntry<T>>> {
        self.entries.lock()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Creates and destroys the resources of a [`ResourceManager`].
///
/// Both hooks run while the depot is locked and must not call back into the
/// manager.
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    fn create(&self, id: UniqueId, ec: &mut dyn ErrorCollector) -> Option<Self::Resource>;

    fn destroy(&self, id: UniqueId, resource: Arc<Self::Resource>) {
        let _ = id;
        drop(resource);
    }
}

/// Keeps resources by [`UniqueId`], creating them on first use
pub struct ResourceManager<F: ResourceFactory> {
    name: String,
    factory: F,
    depot: Depot<F::Resource>,
    capacity: Option<usize>,
}

impl<F: ResourceFactory> ResourceManager<F> {
    /// Create an unbounded manager
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            depot: Depot::default(),
            capacity: None,
        }
    }

    /// Refuse to create more than `capacity` entries
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Name used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factory that builds new resources
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Underlying storage
    pub fn depot(&self) -> &Depot<F::Resource> {
        &self.depot
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.depot.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a resource exists for `id`
    pub fn contains(&self, id: UniqueId) -> bool {
        self.depot.lock().contains_key(&id)
    }

    /// Fetch the resource for `id`, creating it when absent.
    ///
    /// An unset id gets a fresh one. Returns the id actually used.
    pub fn get_object(
        &self,
        id: UniqueId,
        ec: &mut dyn ErrorCollector,
    ) -> Option<(UniqueId, Arc<F::Resource>)> {
        let mut entries = self.depot.lock();
        let now = Instant::now();

        if !id.is_unset() {
            if let Some(entry) = entries.get_mut(&id) {
                entry.last_touched = now;
                return Some((id, Arc::clone(&entry.resource)));
            }
        }

        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity {
                tracing::warn!(manager = %self.name, capacity, "Resource capacity exhausted");
                ec.add_error(&CoreError::CapacityExhausted {
                    manager: self.name.clone(),
                    capacity,
                });
                return None;
            }
        }

        let id = if id.is_unset() {
            let mut fresh = UniqueId::now();
            while entries.contains_key(&fresh) {
                std::thread::sleep(Duration::from_millis(1));
                fresh = UniqueId::now();
            }
            fresh
        } else {
            id
        };

        let Some(resource) = self.factory.create(id, ec) else {
            ec.add_error(&CoreError::CreateFailed {
                manager: self.name.clone(),
                id: id.0,
            });
            return None;
        };
        let resource = Arc::new(resource);
        entries.insert(
            id,
            DepotEntry {
                resource: Arc::clone(&resource),
                last_touched: now,
            },
        );
        tracing::trace!(manager = %self.name, id = %id, "Created object");
        Some((id, resource))
    }

    /// Mint a fresh id with its resource; `None` on failure
    pub fn unique_id(&self, ec: &mut dyn ErrorCollector) -> Option<UniqueId> {
        self.get_object(UniqueId::UNSET, ec).map(|(id, _)| id)
    }

    /// Remove and destroy the entry for `id`
    pub fn unuse(&self, id: UniqueId) -> bool {
        let mut entries = self.depot.lock();
        match entries.remove(&id) {
            Some(entry) => {
                self.factory.destroy(id, entry.resource);
                true
            }
            None => false,
        }
    }

    /// Destroy every entry
    pub fn clear(&self) {
        let mut entries = self.depot.lock();
        for (id, entry) in std::mem::take(&mut *entries) {
            self.factory.destroy(id, entry.resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorList, codes};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        fail: bool,
    }

    impl ResourceFactory for Arc<Counting> {
        type Resource = UniqueId;

        fn create(&self, id: UniqueId, _ec: &mut dyn ErrorCollector) -> Option<UniqueId> {
            if self.fail {
                return None;
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(id)
        }

        fn destroy(&self, _id: UniqueId, _resource: Arc<UniqueId>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager() -> (Arc<Counting>, ResourceManager<Arc<Counting>>) {
        let counting = Arc::new(Counting::default());
        (Arc::clone(&counting), ResourceManager::new("test", counting))
    }

    #[test]
    fn test_unset_id_mints_fresh_entry() {
        let (counting, manager) = manager();
        let mut ec = ErrorList::new();
        let (id, resource) = manager.get_object(UniqueId::UNSET, &mut ec).unwrap();
        assert!(!id.is_unset());
        assert_eq!(*resource, id);
        assert!(manager.contains(id));
        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_existing_id_is_reused() {
        let (counting, manager) = manager();
        let mut ec = ErrorList::new();
        let (id, first) = manager.get_object(UniqueId::UNSET, &mut ec).unwrap();
        let (same, second) = manager.get_object(id, &mut ec).unwrap();
        assert_eq!(id, same);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_supplied_id_is_created() {
        let (_, manager) = manager();
        let mut ec = ErrorList::new();
        let (id, _) = manager.get_object(UniqueId(77), &mut ec).unwrap();
        assert_eq!(id, UniqueId(77));
        assert!(manager.contains(UniqueId(77)));
    }

    #[test]
    fn test_unuse_and_clear_destroy() {
        let (counting, manager) = manager();
        let mut ec = ErrorList::new();
        let a = manager.unique_id(&mut ec).unwrap();
        manager.unique_id(&mut ec).unwrap();
        manager.unique_id(&mut ec).unwrap();

        assert!(manager.unuse(a));
        assert!(!manager.unuse(a));
        assert_eq!(counting.destroyed.load(Ordering::SeqCst), 1);

        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(counting.destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_create_failure_is_reported() {
        let counting = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let manager = ResourceManager::new("test", counting);
        let mut ec = ErrorList::new();
        assert!(manager.get_object(UniqueId::UNSET, &mut ec).is_none());
        assert!(ec.contains_code(codes::CREATE_FAILED));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_capacity_limits_new_entries() {
        let counting = Arc::new(Counting::default());
        let manager = ResourceManager::new("test", counting).with_capacity(2);
        let mut ec = ErrorList::new();
        let a = manager.unique_id(&mut ec).unwrap();
        manager.unique_id(&mut ec).unwrap();
        assert!(manager.unique_id(&mut ec).is_none());
        assert!(ec.contains_code(codes::CAPACITY_EXHAUSTED));

        // existing entries stay reachable
        assert!(manager.get_object(a, &mut ec).is_some());
    }

    #[test]
    fn test_concurrent_ids_are_distinct() {
        let (_, manager) = manager();
        let manager = Arc::new(manager);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let mut ec = ErrorList::new();
                    (0..5)
                        .map(|_| manager.unique_id(&mut ec).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: Vec<UniqueId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let distinct: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 40);
        assert_eq!(manager.len(), 40);
    }
}
