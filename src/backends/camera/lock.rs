// SPDX-License-Identifier: GPL-3.0-only

//! Binary open/close lock for the camera device
//!
//! Acquired before a device open is issued and released on whichever path
//! completes it (opened, disconnected, error, explicit close). Those paths run
//! in different calls, so this is a semaphore with one permit rather than a
//! scoped mutex guard.

use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Single-permit lock with bounded acquisition
#[derive(Debug, Default)]
pub struct OpenCloseLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl OpenCloseLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit, waiting at most `timeout`
    ///
    /// Returns `false` when the permit is still held by someone else after
    /// the wait.
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        let guard = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let (mut held, result) = self
            .released
            .wait_timeout_while(guard, timeout, |held| *held)
            .unwrap_or_else(|e| e.into_inner());

        if result.timed_out() && *held {
            return false;
        }
        *held = true;
        trace!("Open/close lock acquired");
        true
    }

    /// Return the permit; releasing an unheld lock is a no-op
    pub fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if *held {
            *held = false;
            trace!("Open/close lock released");
            self.released.notify_one();
        }
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_acquire_and_release() {
        let lock = OpenCloseLock::new();
        assert!(lock.try_acquire_for(Duration::from_millis(10)));
        assert!(lock.is_held());
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let lock = OpenCloseLock::new();
        assert!(lock.try_acquire_for(Duration::from_millis(10)));

        let start = Instant::now();
        assert!(!lock.try_acquire_for(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_release_is_idempotent() {
        let lock = OpenCloseLock::new();
        lock.release();
        lock.release();
        assert!(lock.try_acquire_for(Duration::from_millis(10)));
        // A double release must not hand out two permits
        lock.release();
        lock.release();
        assert!(lock.try_acquire_for(Duration::from_millis(10)));
        assert!(!lock.try_acquire_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let lock = Arc::new(OpenCloseLock::new());
        assert!(lock.try_acquire_for(Duration::from_millis(10)));

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.try_acquire_for(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        lock.release();
        assert!(waiter.join().unwrap());
    }
}
