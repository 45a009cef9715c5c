//! Watchdog
//!
//! Single-consumer queue of interface lifecycle events. Producers push and
//! signal; the consumer loop drains the queue, logs every event and hands it
//! to the registered observers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::interface::InterfaceStatus;
use crate::notifier::Notifier;
use crate::thread::ManagedThread;
use crate::thread_pool::ThreadPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEvent {
    pub status: InterfaceStatus,
    pub interface: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Callback run on the watchdog thread for every event
pub type Observer = Box<dyn Fn(&InterfaceEvent) + Send + Sync>;

#[derive(Default)]
pub struct Watchdog {
    queue: Mutex<VecDeque<InterfaceEvent>>,
    ready: Notifier,
    /// Held while events are being delivered so deliveries never interleave
    delivering: Mutex<()>,
    observers: Mutex<Vec<Observer>>,
    shutdown: AtomicBool,
    consumer: Mutex<Option<ManagedThread>>,
}

impl Watchdog {
    /// Create a stopped watchdog
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an event for the consumer
    pub fn add_interface_event(
        &self,
        status: InterfaceStatus,
        interface: &str,
        message: impl Into<String>,
    ) {
        self.queue.lock().push_back(InterfaceEvent {
            status,
            interface: interface.to_string(),
            message: message.into(),
            at: Utc::now(),
        });
        self.ready.notify();
    }

    /// Register a callback for lifecycle events
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&InterfaceEvent) + Send + Sync + 'static,
    {
        self.observers.lock().push(Box::new(observer));
    }

    /// Events queued but not yet delivered
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Deliver every queued event on the calling thread
    pub fn flush(&self) {
        let _delivering = self.delivering.lock();
        loop {
            let batch: Vec<InterfaceEvent> = self.queue.lock().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            let observers = self.observers.lock();
            for event in &batch {
                log_event(event);
                for observer in observers.iter() {
                    observer(event);
                }
            }
        }
    }

    /// Consumer loop; blocks until [`shutdown`](Self::shutdown)
    pub fn run(&self) {
        tracing::debug!("Watchdog started");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.ready.wait();
            self.flush();
        }
        self.flush();
        tracing::debug!("Watchdog ended");
    }

    /// Run the consumer loop on a pooled thread
    pub fn start(self: &Arc<Self>, pool: Arc<dyn ThreadPool>) -> bool {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return true;
        }
        self.shutdown.store(false, Ordering::SeqCst);
        let thread = ManagedThread::new("watchdog", pool);
        let watchdog = Arc::clone(self);
        if !thread.start(move || watchdog.run()) {
            tracing::error!("Could not start watchdog");
            return false;
        }
        *consumer = Some(thread);
        true
    }

    /// Stop the consumer loop and wait for it
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ready.notify();
        if let Some(thread) = self.consumer.lock().take() {
            thread.wait();
        }
    }
}

fn log_event(event: &InterfaceEvent) {
    let interface = event.interface.as_str();
    let message = event.message.as_str();
    match event.status {
        InterfaceStatus::CannotStart => {
            tracing::error!(interface, message, "Interface could not be started")
        }
        InterfaceStatus::Started => tracing::info!(interface, message, "Interface is started"),
        InterfaceStatus::Running => tracing::debug!(interface, message, "Interface is running"),
        InterfaceStatus::Stopped => tracing::warn!(interface, message, "Interface is stopped"),
        InterfaceStatus::Crashed => tracing::error!(interface, message, "Interface is crashed"),
        InterfaceStatus::CannotStop => {
            tracing::error!(interface, message, "Interface could not be stopped")
        }
        InterfaceStatus::Ended => tracing::info!(interface, message, "Interface has ended"),
        InterfaceStatus::NotRunning | InterfaceStatus::Unexpected => {
            tracing::warn!(interface, message, status = %event.status, "Unexpected interface event")
        }
    }
}
