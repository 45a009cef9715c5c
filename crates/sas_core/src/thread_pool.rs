//! Thread Pool
//!
//! Reusable OS worker threads. A [`PooledThread`] parks on its own
//! [`Notifier`] between jobs; [`ThreadPool::release`] hands it back to the
//! free set without stopping it. Workers are only torn down when the pool is
//! dropped.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::notifier::Notifier;

/// Work executed on a pooled thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Source of worker threads
pub trait ThreadPool: Send + Sync {
    /// Reuse a released worker or spawn a new one; `None` when the OS refuses
    fn allocate(&self) -> Option<Arc<PooledThread>>;

    /// Return a worker to the free set
    fn release(&self, thread: &Arc<PooledThread>);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pooled Thread
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct WorkerState {
    stopping: bool,
    busy: bool,
    job: Option<(Job, Option<Job>)>,
}

#[derive(Default)]
struct WorkerShared {
    wakeup: Notifier,
    state: Mutex<WorkerState>,
    idle: Condvar,
}

/// One OS thread owned by a pool
pub struct PooledThread {
    name: String,
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PooledThread {
    fn spawn(name: String) -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(WorkerShared::default());
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&worker))?;

        Ok(Arc::new(Self {
            name,
            shared,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand `body` to the worker; `on_finished` runs after it on the same thread.
    ///
    /// Returns false if the worker is still busy with a previous job.
    pub fn run(&self, body: Job, on_finished: Option<Job>) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.busy || state.stopping {
                return false;
            }
            state.busy = true;
            state.job = Some((body, on_finished));
        }
        self.shared.wakeup.notify();
        true
    }

    /// True while no job is executing
    pub fn is_released(&self) -> bool {
        !self.shared.state.lock().busy
    }

    /// Block until the current job (if any) has finished
    pub fn join(&self) {
        let mut state = self.shared.state.lock();
        while state.busy {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Like [`join`](Self::join) but gives up after `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.busy {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.busy;
            }
        }
        true
    }

    fn shutdown(&self) {
        let busy = {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            state.busy
        };
        self.shared.wakeup.notify();

        let handle = self.handle.lock().take();
        let Some(handle) = handle else { return };
        // A busy worker is abandoned; it exits on its own once the job returns.
        if busy || handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::warn!(thread = %self.name, "Worker thread panicked");
        }
    }
}

fn worker_loop(shared: &WorkerShared) {
    loop {
        shared.wakeup.wait();

        let job = {
            let mut state = shared.state.lock();
            if state.stopping {
                return;
            }
            state.job.take()
        };
        let Some((body, on_finished)) = job else {
            continue;
        };

        body();

        let stopping = {
            let mut state = shared.state.lock();
            state.busy = false;
            shared.idle.notify_all();
            state.stopping
        };
        if let Some(on_finished) = on_finished {
            on_finished();
        }
        if stopping {
            return;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simple Thread Pool
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PoolState {
    threads: Vec<Arc<PooledThread>>,
    free: Vec<Arc<PooledThread>>,
}

/// Dynamically growing pool
pub struct SimpleThreadPool {
    name: String,
    state: Mutex<PoolState>,
    this: Weak<SimpleThreadPool>,
}

impl SimpleThreadPool {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            state: Mutex::new(PoolState::default()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of OS threads created so far
    pub fn thread_count(&self) -> usize {
        self.state.lock().threads.len()
    }

    /// Weak handle used by jobs that release their own worker
    pub fn downgrade(&self) -> Weak<dyn ThreadPool> {
        self.this.clone()
    }
}

impl ThreadPool for SimpleThreadPool {
    fn allocate(&self) -> Option<Arc<PooledThread>> {
        let mut state = self.state.lock();

        if let Some(pos) = state.free.iter().position(|t| t.is_released()) {
            return Some(state.free.swap_remove(pos));
        }

        let name = format!("thread#{}", state.threads.len() + 1);
        match PooledThread::spawn(name) {
            Ok(thread) => {
                tracing::debug!(pool = %self.name, thread = %thread.name(), "Created thread");
                state.threads.push(Arc::clone(&thread));
                Some(thread)
            }
            Err(e) => {
                tracing::error!(pool = %self.name, error = %e, "Could not create thread in thread pool");
                None
            }
        }
    }

    fn release(&self, thread: &Arc<PooledThread>) {
        let mut state = self.state.lock();
        if !state.free.iter().any(|t| Arc::ptr_eq(t, thread)) {
            state.free.push(Arc::clone(thread));
        }
    }
}

impl Drop for SimpleThreadPool {
    fn drop(&mut self) {
        let state = std::mem::take(&mut *self.state.lock());
        for thread in &state.threads {
            thread.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_executes_body_then_on_finished() {
        let pool = SimpleThreadPool::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        let thread = pool.allocate().unwrap();

        let body_order = Arc::clone(&order);
        let end_order = Arc::clone(&order);
        assert!(thread.run(
            Box::new(move || body_order.lock().push("body")),
            Some(Box::new(move || end_order.lock().push("end"))),
        ));
        thread.join();
        // on_finished runs right after the worker marks itself idle
        for _ in 0..100 {
            if order.lock().len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*order.lock(), vec!["body", "end"]);
    }

    #[test]
    fn test_released_thread_is_reused() {
        let pool = SimpleThreadPool::new("test");
        let first = pool.allocate().unwrap();
        assert_eq!(first.name(), "thread#1");
        pool.release(&first);

        let again = pool.allocate().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(pool.thread_count(), 1);

        let second = pool.allocate().unwrap();
        assert_eq!(second.name(), "thread#2");
        assert_eq!(pool.thread_count(), 2);
    }

    #[test]
    fn test_busy_thread_is_not_reused() {
        let pool = SimpleThreadPool::new("test");
        let gate = Arc::new(Notifier::new());
        let thread = pool.allocate().unwrap();
        let body_gate = Arc::clone(&gate);
        thread.run(Box::new(move || body_gate.wait()), None);
        pool.release(&thread);

        let other = pool.allocate().unwrap();
        assert!(!Arc::ptr_eq(&thread, &other));
        assert!(!thread.run(Box::new(|| {}), None));

        gate.notify();
        thread.join();
        assert!(thread.is_released());
    }

    #[test]
    fn test_join_timeout_expires_while_busy() {
        let pool = SimpleThreadPool::new("test");
        let gate = Arc::new(Notifier::new());
        let thread = pool.allocate().unwrap();
        let body_gate = Arc::clone(&gate);
        thread.run(Box::new(move || body_gate.wait()), None);

        assert!(!thread.join_timeout(Duration::from_millis(20)));
        gate.notify();
        assert!(thread.join_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_many_jobs_on_one_worker() {
        let pool = SimpleThreadPool::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        let thread = pool.allocate().unwrap();
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            assert!(thread.run(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                None
            ));
            thread.join();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
