//! Session Manager
//!
//! Stateful sessions kept in a unique-id depot. A session is locked while a
//! caller holds its [`SessionGuard`]; a background sweep evicts sessions that
//! are unlocked and idle for longer than their max idle time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;

use crate::error::{CoreError, ErrorCollector};
use crate::invoker::{InvokeStatus, Invoker};
use crate::thread::TimerThread;
use crate::thread_pool::ThreadPool;
use crate::unique::{ResourceFactory, ResourceManager, UniqueId};

/// Identifies a session across calls
pub type SessionId = UniqueId;

/// How often the idle sweep runs unless configured otherwise
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(5000);

/// Optional override of the sweep interval, in milliseconds
pub const SWEEP_INTERVAL_PATH: &str = "SAS/SESSION_SWEEP_INTERVAL_MS";

/// Optional host-wide cap on outstanding sessions per module
pub const MAX_SESSIONS_PATH: &str = "SAS/MAX_SESSIONS";

/// A session held by the caller; dropping it unlocks the session
pub type SessionGuard = ArcMutexGuard<RawMutex, Box<dyn Session>>;

/// Per-client state of a service module
pub trait Session: Send {
    fn id(&self) -> SessionId;

    /// Resolve the invoker registered under `name`
    fn invoker(&mut self, name: &str, ec: &mut dyn ErrorCollector) -> Option<&mut dyn Invoker>;

    fn invoke(
        &mut self,
        invoker_name: &str,
        input: &[u8],
        output: &mut Vec<u8>,
        ec: &mut dyn ErrorCollector,
    ) -> InvokeStatus {
        match self.invoker(invoker_name, ec) {
            Some(invoker) => invoker.invoke(input, output, ec),
            None => {
                ec.add_error(&CoreError::InvokerNotFound(invoker_name.to_string()));
                InvokeStatus::FatalError
            }
        }
    }
}

/// Builds the sessions of one module
pub trait SessionFactory: Send + Sync + 'static {
    fn create_session(&self, id: SessionId, ec: &mut dyn ErrorCollector)
    -> Option<Box<dyn Session>>;
}

impl<F> SessionFactory for F
where
    F: Fn(SessionId, &mut dyn ErrorCollector) -> Option<Box<dyn Session>> + Send + Sync + 'static,
{
    fn create_session(
        &self,
        id: SessionId,
        ec: &mut dyn ErrorCollector,
    ) -> Option<Box<dyn Session>> {
        self(id, ec)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Slots
// ─────────────────────────────────────────────────────────────────────────────

/// Stored form of a session, locked while a caller holds it
pub struct SessionSlot {
    session: Arc<Mutex<Box<dyn Session>>>,
    max_idle: Duration,
}

impl SessionSlot {
    /// Idle time after which the sweep ends the session
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

struct SlotFactory<F> {
    sessions: F,
    default_max_idle: Mutex<Duration>,
}

impl<F: SessionFactory> ResourceFactory for SlotFactory<F> {
    type Resource = SessionSlot;

    fn create(&self, id: UniqueId, ec: &mut dyn ErrorCollector) -> Option<SessionSlot> {
        let session = self.sessions.create_session(id, ec)?;
        Some(SessionSlot {
            session: Arc::new(Mutex::new(session)),
            max_idle: *self.default_max_idle.lock(),
        })
    }

    fn destroy(&self, id: UniqueId, slot: Arc<SessionSlot>) {
        // wait for an in-flight call before dropping
        drop(slot.session.lock());
        tracing::debug!(session = %id, "Deleted session");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out sessions by id and ends idle ones
pub struct SessionManager<F: SessionFactory> {
    inner: Arc<ResourceManager<SlotFactory<F>>>,
    cleaner: Mutex<Option<TimerThread>>,
    sweep_interval: Duration,
}

impl<F: SessionFactory> SessionManager<F> {
    /// Create a manager with the default lifetime and no cap
    pub fn new(name: impl Into<String>, sessions: F) -> Self {
        Self::build(ResourceManager::new(
            name,
            SlotFactory {
                sessions,
                default_max_idle: Mutex::new(Duration::from_secs(120)),
            },
        ))
    }

    /// Cap the number of outstanding sessions
    pub fn with_capacity(name: impl Into<String>, sessions: F, capacity: usize) -> Self {
        Self::build(
            ResourceManager::new(
                name,
                SlotFactory {
                    sessions,
                    default_max_idle: Mutex::new(Duration::from_secs(120)),
                },
            )
            .with_capacity(capacity),
        )
    }

    fn build(inner: ResourceManager<SlotFactory<F>>) -> Self {
        Self {
            inner: Arc::new(inner),
            cleaner: Mutex::new(None),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// How often idle sessions are looked for
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Name of the owning module
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Factory that builds new sessions
    pub fn session_factory(&self) -> &F {
        &self.inner.factory().sessions
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether session `id` is open
    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.contains(id)
    }

    /// Start the idle sweep. New sessions get `default_max_idle`.
    pub fn init(
        &self,
        default_max_idle: Duration,
        pool: Arc<dyn ThreadPool>,
        ec: &mut dyn ErrorCollector,
    ) -> bool {
        *self.inner.factory().default_max_idle.lock() = default_max_idle;

        let mut cleaner = self.cleaner.lock();
        if cleaner.is_some() {
            return true;
        }
        let timer = TimerThread::new(format!("{}::cleaner", self.name()), pool);
        let inner = Arc::clone(&self.inner);
        if !timer.start(self.sweep_interval, move || {
            sweep(&inner);
        }) {
            ec.add_error(&CoreError::ThreadUnavailable(self.name().to_string()));
            return false;
        }
        *cleaner = Some(timer);
        true
    }

    /// Stop the sweep and destroy every session
    pub fn deinit(&self) {
        if let Some(cleaner) = self.cleaner.lock().take() {
            cleaner.stop();
            cleaner.wait();
        }
        self.inner.clear();
    }

    /// Fetch or create a session and return it locked
    pub fn get_session(&self, id: SessionId, ec: &mut dyn ErrorCollector) -> Option<SessionGuard> {
        let (_, slot) = self.inner.get_object(id, ec)?;
        Some(slot.session.lock_arc())
    }

    /// Destroy a session explicitly
    pub fn end_session(&self, id: SessionId) -> bool {
        self.inner.unuse(id)
    }

    /// Run one idle sweep now; returns the evicted ids
    pub fn sweep_idle(&self) -> Vec<SessionId> {
        sweep(&self.inner)
    }
}

impl<F: SessionFactory> Drop for SessionManager<F> {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn sweep<F: SessionFactory>(manager: &ResourceManager<SlotFactory<F>>) -> Vec<SessionId> {
    let now = Instant::now();
    let evicted: Vec<(SessionId, Arc<SessionSlot>)> = {
        let mut entries = manager.depot().lock();
        let expired: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| {
                // a locked session is in use
                let Some(_held) = entry.resource.session.try_lock() else {
                    return false;
                };
                entry.idle_for(now) >= entry.resource.max_idle
            })
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|entry| (id, entry.resource)))
            .collect()
    };

    evicted
        .into_iter()
        .map(|(id, slot)| {
            drop(slot);
            tracing::info!(manager = %manager.name(), session = %id, "Delete old session");
            id
        })
        .collect()
}
