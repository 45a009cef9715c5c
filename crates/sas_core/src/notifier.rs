//! Counting signal
//!
//! Every `notify` adds one pending signal; every successful wait consumes one.
//! Extra signals are harmless: a waiter that wakes up with nothing to do just
//! loops again.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Notifier {
    count: Mutex<u64>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one signal and wake one waiter
    pub fn notify(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Add one signal and wake every waiter
    pub fn notify_all(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_all();
    }

    /// Block until a signal is pending, then consume it
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Wait at most `timeout`; false on expiry
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                self.wait();
                true
            }
        }
    }

    /// Wait until `deadline`; false on expiry, nothing is consumed then
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                if *count == 0 {
                    return false;
                }
                break;
            }
        }
        *count -= 1;
        true
    }

    /// Consume a pending signal without blocking
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Number of signals not yet consumed
    pub fn pending(&self) -> u64 {
        *self.count.lock()
    }
}
