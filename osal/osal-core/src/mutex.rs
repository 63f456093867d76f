//!
//! Plain mutual-exclusion lock
//!
//! Unlike `std::sync::Mutex` this lock has no guard: `lock` and `unlock` are
//! separate calls, which is what an OSAL condition variable needs when it
//! releases and reacquires a caller-owned mutex around a wait.
//!
//! The lock is not re-entrant and is not tied to the locking thread;
//! `unlock` releases whoever holds it.
//!

use std::sync::{Condvar, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{osal_verbose, osal_warn, Logger};

pub struct Mutex {
    locked: StdMutex<bool>,
    released: Condvar,
    logger: Logger,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            locked: StdMutex::new(false),
            released: Condvar::new(),
            logger,
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the lock is acquired. Always returns true.
    pub fn lock(&self) -> bool {
        let mut locked = self.state();
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
        osal_verbose!(self.logger, "Mutex locked");
        true
    }

    pub fn try_lock(&self) -> bool {
        let mut locked = self.state();
        if *locked {
            return false;
        }
        *locked = true;
        osal_verbose!(self.logger, "Mutex locked (try)");
        true
    }

    /// Waits at most `timeout_ms` for the lock.
    pub fn try_lock_for(&self, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut locked = self.state();
        while *locked {
            let now = Instant::now();
            if now >= deadline {
                osal_verbose!(self.logger, "Mutex lock timed out after {}ms", timeout_ms);
                return false;
            }
            locked = self
                .released
                .wait_timeout(locked, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *locked = true;
        osal_verbose!(self.logger, "Mutex locked (timed)");
        true
    }

    /// Releases the lock. Returns false, without side effects, when the
    /// mutex was not locked.
    pub fn unlock(&self) -> bool {
        let mut locked = self.state();
        if !*locked {
            osal_warn!(self.logger, "Unlock of a mutex that is not locked");
            return false;
        }
        *locked = false;
        drop(locked);
        self.released.notify_one();
        osal_verbose!(self.logger, "Mutex unlocked");
        true
    }

    pub fn is_locked(&self) -> bool {
        *self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureSink, LogLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock() {
        let m = Mutex::with_logger(Logger::null());
        assert!(m.lock());
        assert!(m.is_locked());
        assert!(!m.try_lock());
        assert!(m.unlock());
        assert!(!m.is_locked());
        assert!(m.try_lock());
        assert!(m.unlock());
    }

    #[test]
    fn test_unlock_when_unlocked_is_noop() {
        let sink = Arc::new(CaptureSink::new());
        let m = Mutex::with_logger(Logger::new(LogLevel::Warning, false, sink.clone()));
        assert!(!m.unlock());
        assert!(sink.contains("not locked"));
    }

    #[test]
    fn test_try_lock_for_times_out() {
        let m = Mutex::with_logger(Logger::null());
        m.lock();
        let start = Instant::now();
        assert!(!m.try_lock_for(50));
        assert!(start.elapsed() >= Duration::from_millis(45));
        m.unlock();
    }

    #[test]
    fn test_try_lock_for_acquires_after_release() {
        let m = Arc::new(Mutex::with_logger(Logger::null()));
        m.lock();
        let releaser = {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                m.unlock();
            })
        };
        assert!(m.try_lock_for(1_000));
        releaser.join().unwrap();
        assert!(m.unlock());
    }

    #[test]
    fn test_mutual_exclusion() {
        let m = Arc::new(Mutex::with_logger(Logger::null()));
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                let inside = Arc::clone(&inside);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        m.unlock();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 800);
    }
}
