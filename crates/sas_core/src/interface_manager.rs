//! Interface Manager
//!
//! Runs every registered [`Interface`] on its own pooled thread and reports
//! lifecycle transitions to the [`Watchdog`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{CoreError, ErrorCollector, ErrorList};
use crate::interface::{Interface, InterfaceStatus};
use crate::thread::ManagedThread;
use crate::thread_pool::ThreadPool;
use crate::watchdog::Watchdog;

// ─────────────────────────────────────────────────────────────────────────────
// Interface Thread
// ─────────────────────────────────────────────────────────────────────────────

struct InterfaceThread {
    interface: Arc<dyn Interface>,
    thread: ManagedThread,
}

impl InterfaceThread {
    fn start(&self, watchdog: &Arc<Watchdog>) -> bool {
        let interface = Arc::clone(&self.interface);
        let watchdog = Arc::clone(watchdog);
        self.thread.start(move || {
            let name = interface.name().to_string();
            watchdog.add_interface_event(InterfaceStatus::Started, &name, "start interface");

            let mut errors = ErrorList::new();
            let status = interface.run(&mut errors);
            let message = if errors.is_empty() {
                "interface has ended".to_string()
            } else {
                errors.join("; ")
            };
            watchdog.add_interface_event(status, &name, message);
        })
    }

    fn stop(&self, watchdog: &Watchdog, ec: &mut dyn ErrorCollector) -> bool {
        self.thread.stop();
        let status = self.interface.shutdown(ec);
        let stopped = status == InterfaceStatus::Stopped;
        let message = if stopped {
            "stop interface"
        } else {
            "could not stop interface"
        };
        watchdog.add_interface_event(status, self.interface.name(), message);
        stopped
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interface Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Runs every registered interface on its own managed thread
pub struct InterfaceManager {
    pool: Arc<dyn ThreadPool>,
    watchdog: Arc<Watchdog>,
    threads: Mutex<BTreeMap<String, Arc<InterfaceThread>>>,
}

impl InterfaceManager {
    /// Create a manager reporting to `watchdog`
    pub fn new(pool: Arc<dyn ThreadPool>, watchdog: Arc<Watchdog>) -> Self {
        Self {
            pool,
            watchdog,
            threads: Mutex::new(BTreeMap::new()),
        }
    }

    /// Receiver of lifecycle events
    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    /// Number of registered interfaces
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an interface with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.threads.lock().contains_key(name)
    }

    fn snapshot(&self) -> Vec<Arc<InterfaceThread>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Add an interface; names must be unique
    pub fn register_interface(
        &self,
        interface: Arc<dyn Interface>,
        ec: &mut dyn ErrorCollector,
    ) -> bool {
        let name = interface.name().to_string();
        let mut threads = self.threads.lock();
        if threads.contains_key(&name) {
            tracing::error!(interface = %name, "Interface is already registered");
            ec.add_error(&CoreError::InterfaceAlreadyRegistered(name));
            return false;
        }
        let thread = ManagedThread::new(format!("interface:{name}"), Arc::clone(&self.pool));
        threads.insert(name, Arc::new(InterfaceThread { interface, thread }));
        true
    }

    /// Register all interfaces; every one is attempted
    pub fn register_interfaces(
        &self,
        interfaces: Vec<Arc<dyn Interface>>,
        ec: &mut dyn ErrorCollector,
    ) -> bool {
        interfaces
            .into_iter()
            .fold(true, |ok, i| self.register_interface(i, ec) && ok)
    }

    /// Start every interface on its own thread
    pub fn start(&self, ec: &mut dyn ErrorCollector) -> bool {
        let mut ok = true;
        for thread in self.snapshot() {
            if !thread.start(&self.watchdog) {
                let name = thread.interface.name();
                self.watchdog.add_interface_event(
                    InterfaceStatus::CannotStart,
                    name,
                    "could not start interface thread",
                );
                ec.add_error(&CoreError::InterfaceNotStarted(name.to_string()));
                ok = false;
            }
        }
        ok
    }

    /// Ask every interface to shut down
    pub fn stop(&self, ec: &mut dyn ErrorCollector) -> bool {
        let mut ok = true;
        for thread in self.snapshot() {
            ok &= thread.stop(&self.watchdog, ec);
        }
        if !ok {
            tracing::error!("One or more interface could not be stopped");
        }
        ok
    }

    /// Wait for every interface thread to exit; false if any is still running
    pub fn wait(&self, timeout: Option<Duration>, ec: &mut dyn ErrorCollector) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ok = true;
        for thread in self.snapshot() {
            let ended = match deadline {
                Some(deadline) => thread
                    .thread
                    .wait_timeout(deadline.saturating_duration_since(Instant::now())),
                None => {
                    thread.thread.wait();
                    true
                }
            };
            if !ended {
                let name = thread.interface.name();
                tracing::error!(interface = %name, "Interface could not be ended properly");
                ec.add_error(&CoreError::InterfaceNotEnded(name.to_string()));
                ok = false;
            }
        }
        ok
    }

    /// Graceful stop, bounded wait, then drop every thread handle
    pub fn stop_or_terminate(&self, timeout: Duration, ec: &mut dyn ErrorCollector) -> bool {
        let stopped = self.stop(ec);
        let ended = self.wait(Some(timeout), ec);
        self.terminate();
        stopped && ended
    }

    /// Drop every thread handle without waiting
    pub fn terminate(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads.values() {
            thread.thread.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use crate::thread_pool::SimpleThreadPool;
    use crate::error::codes;
    use crate::watchdog::InterfaceEvent;

    /// Runs until shut down
    struct Blocking {
        name: String,
        release: Notifier,
        refuse_stop: bool,
    }

    impl Blocking {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                release: Notifier::new(),
                refuse_stop: false,
            })
        }
    }

    impl Interface for Blocking {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, _ec: &mut dyn ErrorCollector) -> InterfaceStatus {
            self.release.wait();
            InterfaceStatus::Stopped
        }

        fn shutdown(&self, _ec: &mut dyn ErrorCollector) -> InterfaceStatus {
            if self.refuse_stop {
                return InterfaceStatus::CannotStop;
            }
            self.release.notify();
            InterfaceStatus::Stopped
        }
    }

    struct Failing;

    impl Interface for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, ec: &mut dyn ErrorCollector) -> InterfaceStatus {
            ec.add(1, "port in use");
            ec.add(2, "giving up");
            InterfaceStatus::Crashed
        }

        fn shutdown(&self, _ec: &mut dyn ErrorCollector) -> InterfaceStatus {
            InterfaceStatus::Stopped
        }
    }

    fn setup() -> (InterfaceManager, Arc<Mutex<Vec<InterfaceEvent>>>) {
        let watchdog = Watchdog::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        watchdog.add_observer(move |e| sink.lock().push(e.clone()));
        (
            InterfaceManager::new(SimpleThreadPool::new("test"), watchdog),
            events,
        )
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let (manager, _) = setup();
        let mut ec = ErrorList::new();
        assert!(manager.register_interface(Blocking::new("a"), &mut ec));
        assert!(!manager.register_interface(Blocking::new("a"), &mut ec));
        assert!(ec.contains_code(codes::INTERFACE_ALREADY_REGISTERED));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_start_then_stop_emits_events() {
        let (manager, events) = setup();
        let mut ec = ErrorList::new();
        manager.register_interface(Blocking::new("a"), &mut ec);
        assert!(manager.start(&mut ec));

        let mut started = false;
        for _ in 0..200 {
            manager.watchdog().flush();
            if events.lock().iter().any(|e| e.status == InterfaceStatus::Started) {
                started = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(started);

        assert!(manager.stop_or_terminate(Duration::from_secs(5), &mut ec));
        manager.watchdog().flush();
        let statuses: Vec<_> = events.lock().iter().map(|e| e.status).collect();
        assert_eq!(statuses[0], InterfaceStatus::Started);
        assert!(statuses[1..].contains(&InterfaceStatus::Stopped));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_crashed_run_joins_errors() {
        let (manager, events) = setup();
        let mut ec = ErrorList::new();
        manager.register_interface(Arc::new(Failing), &mut ec);
        manager.start(&mut ec);
        assert!(manager.wait(Some(Duration::from_secs(5)), &mut ec));
        manager.watchdog().flush();

        let events = events.lock();
        let last = events.last().unwrap();
        assert_eq!(last.status, InterfaceStatus::Crashed);
        assert_eq!(last.message, "[1] port in use; [2] giving up");
    }

    #[test]
    fn test_wait_times_out_when_interface_refuses_to_stop() {
        let (manager, _) = setup();
        let mut ec = ErrorList::new();
        let stubborn = Arc::new(Blocking {
            name: "stubborn".into(),
            release: Notifier::new(),
            refuse_stop: true,
        });
        manager.register_interface(Arc::clone(&stubborn) as Arc<dyn Interface>, &mut ec);
        manager.start(&mut ec);

        assert!(!manager.stop_or_terminate(Duration::from_millis(30), &mut ec));
        assert!(ec.contains_code(codes::INTERFACE_NOT_ENDED));
        assert!(manager.is_empty());

        // let the abandoned worker finish
        stubborn.release.notify();
    }
}
