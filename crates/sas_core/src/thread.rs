//! Managed threads
//!
//! [`ManagedThread`] runs one body at a time on a worker borrowed from a
//! [`ThreadPool`] and tracks its lifecycle. [`TimerThread`] builds a periodic
//! task on top of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::notifier::Notifier;
use crate::thread_pool::{PooledThread, ThreadPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    NotRunning,
    Started,
    Running,
    Stopped,
}

struct RunState {
    status: ThreadStatus,
    generation: u64,
}

struct Lifecycle {
    state: Mutex<RunState>,
    exited: Condvar,
}

impl Lifecycle {
    /// Update the status only if `generation` is still the current run
    fn set_if_current(&self, generation: u64, status: ThreadStatus) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        // stop() may have raced ahead of the worker
        if status == ThreadStatus::Running && state.status == ThreadStatus::Stopped {
            return;
        }
        state.status = status;
        if status == ThreadStatus::NotRunning {
            self.exited.notify_all();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Managed Thread
// ─────────────────────────────────────────────────────────────────────────────

/// A named body run on a pooled worker with a tracked lifecycle
pub struct ManagedThread {
    name: String,
    pool: Arc<dyn ThreadPool>,
    lifecycle: Arc<Lifecycle>,
    worker: Mutex<Option<Arc<PooledThread>>>,
}

impl ManagedThread {
    /// Create a thread that borrows workers from `pool`
    pub fn new(name: impl Into<String>, pool: Arc<dyn ThreadPool>) -> Self {
        Self {
            name: name.into(),
            pool,
            lifecycle: Arc::new(Lifecycle {
                state: Mutex::new(RunState {
                    status: ThreadStatus::NotRunning,
                    generation: 0,
                }),
                exited: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn status(&self) -> ThreadStatus {
        self.lifecycle.state.lock().status
    }

    /// True once [`stop`](Self::stop) has been requested for the current run
    pub fn is_stopping(&self) -> bool {
        self.status() == ThreadStatus::Stopped
    }

    /// Run `body` on a pooled worker. Fails unless the thread is `NotRunning`
    /// or no worker can be allocated.
    pub fn start<F>(&self, body: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut state = self.lifecycle.state.lock();
            if state.status != ThreadStatus::NotRunning {
                return false;
            }
            state.status = ThreadStatus::Started;
            state.generation += 1;
            state.generation
        };

        let Some(worker) = self.pool.allocate() else {
            tracing::error!(thread = %self.name, "No worker available");
            self.lifecycle
                .set_if_current(generation, ThreadStatus::NotRunning);
            return false;
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let run_body = Box::new(move || {
            lifecycle.set_if_current(generation, ThreadStatus::Running);
            body();
            lifecycle.set_if_current(generation, ThreadStatus::NotRunning);
        });

        let pool = Arc::downgrade(&self.pool);
        let released = Arc::clone(&worker);
        let on_finished = Box::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.release(&released);
            }
        });

        if !worker.run(run_body, Some(on_finished)) {
            self.pool.release(&worker);
            self.lifecycle
                .set_if_current(generation, ThreadStatus::NotRunning);
            return false;
        }
        *self.worker.lock() = Some(worker);
        true
    }

    /// Request a cooperative stop; the body observes it via `is_stopping`
    pub fn stop(&self) {
        let mut state = self.lifecycle.state.lock();
        if state.status != ThreadStatus::NotRunning {
            state.status = ThreadStatus::Stopped;
        }
    }

    /// Block until the current run has finished
    pub fn wait(&self) {
        let mut state = self.lifecycle.state.lock();
        while state.status != ThreadStatus::NotRunning {
            self.lifecycle.exited.wait(&mut state);
        }
    }

    /// Wait at most `timeout`; false if the body is still running
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lifecycle.state.lock();
        while state.status != ThreadStatus::NotRunning {
            if self
                .lifecycle
                .exited
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.status == ThreadStatus::NotRunning;
            }
        }
        true
    }

    /// Abandon the current run without interrupting it
    pub fn terminate(&self) {
        let worker = self.worker.lock().take();
        let mut state = self.lifecycle.state.lock();
        if state.status != ThreadStatus::NotRunning {
            if let Some(worker) = worker {
                tracing::debug!(thread = %self.name, worker = %worker.name(), "Abandoning worker");
            }
            state.generation += 1;
            state.status = ThreadStatus::NotRunning;
            self.lifecycle.exited.notify_all();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timer Thread
// ─────────────────────────────────────────────────────────────────────────────

/// Calls a task every `interval` until stopped
pub struct TimerThread {
    thread: ManagedThread,
    wakeup: Arc<Notifier>,
    stopped: Arc<AtomicBool>,
}

impl TimerThread {
    pub fn new(name: impl Into<String>, pool: Arc<dyn ThreadPool>) -> Self {
        Self {
            thread: ManagedThread::new(name, pool),
            wakeup: Arc::new(Notifier::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start<F>(&self, interval: Duration, shot: F) -> bool
    where
        F: Fn() + Send + 'static,
    {
        self.stopped.store(false, Ordering::SeqCst);
        while self.wakeup.try_wait() {}

        let wakeup = Arc::clone(&self.wakeup);
        let stopped = Arc::clone(&self.stopped);
        self.thread.start(move || {
            while !wakeup.wait_for(interval) && !stopped.load(Ordering::SeqCst) {
                shot();
            }
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.thread.stop();
        self.wakeup.notify();
    }

    pub fn wait(&self) {
        self.thread.wait();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.thread.wait_timeout(timeout)
    }

    pub fn status(&self) -> ThreadStatus {
        self.thread.status()
    }
}
