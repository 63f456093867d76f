//!
//! Read-write lock
//!
//! Shared (read) and exclusive (write) acquisition with blocking, `try_*`
//! and timeout-bounded `*_for` variants. Like the OSAL mutex it has no
//! guards: every successful acquire is paired with an explicit unlock.
//!
//! Waiting writers block new readers, so a steady stream of readers cannot
//! starve a writer. A timed-out acquisition leaves the lock as it found it.
//!

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use osal_core::{osal_debug, osal_warn, Logger};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

impl LockState {
    fn can_read(&self) -> bool {
        !self.writer && self.writers_waiting == 0
    }

    fn can_write(&self) -> bool {
        !self.writer && self.readers == 0
    }
}

pub struct RwLock {
    state: Mutex<LockState>,
    changed: Condvar,
    logger: Logger,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLock")
            .field("readers", &self.read_lock_count())
            .field("write_locked", &self.is_write_locked())
            .finish()
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
            logger,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `ready` holds or `deadline` passes. Returns the guard and
    /// whether `ready` held.
    fn wait_for<'a>(
        &'a self,
        mut state: MutexGuard<'a, LockState>,
        deadline: Option<Instant>,
        ready: impl Fn(&LockState) -> bool,
    ) -> (MutexGuard<'a, LockState>, bool) {
        loop {
            if ready(&*state) {
                return (state, true);
            }
            match deadline {
                None => {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (state, false);
                    }
                    state = self
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn acquire_read(&self, deadline: Option<Instant>) -> bool {
        let (mut state, ready) = self.wait_for(self.lock_state(), deadline, LockState::can_read);
        if ready {
            state.readers += 1;
        }
        ready
    }

    fn acquire_write(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.lock_state();
        state.writers_waiting += 1;
        let (mut state, ready) = self.wait_for(state, deadline, LockState::can_write);
        state.writers_waiting -= 1;
        if ready {
            state.writer = true;
        } else {
            drop(state);
            // Readers held back by this writer may proceed now.
            self.changed.notify_all();
        }
        ready
    }

    pub fn read_lock(&self) {
        self.acquire_read(None);
        osal_debug!(self.logger, "Read lock acquired");
    }

    pub fn try_read_lock(&self) -> bool {
        let acquired = {
            let mut state = self.lock_state();
            let ok = state.can_read();
            if ok {
                state.readers += 1;
            }
            ok
        };
        osal_debug!(self.logger, "Try read lock {}", if acquired { "succeeded" } else { "failed" });
        acquired
    }

    pub fn read_lock_for(&self, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let acquired = self.acquire_read(Some(deadline));
        osal_debug!(
            self.logger,
            "Read lock with timeout {}",
            if acquired { "succeeded" } else { "failed" }
        );
        acquired
    }

    pub fn read_unlock(&self) {
        let mut state = self.lock_state();
        if state.readers == 0 {
            drop(state);
            osal_warn!(self.logger, "Read unlock without a read lock held");
            return;
        }
        state.readers -= 1;
        let last = state.readers == 0;
        drop(state);
        if last {
            self.changed.notify_all();
        }
        osal_debug!(self.logger, "Read lock released");
    }

    pub fn write_lock(&self) {
        self.acquire_write(None);
        osal_debug!(self.logger, "Write lock acquired");
    }

    pub fn try_write_lock(&self) -> bool {
        let acquired = {
            let mut state = self.lock_state();
            let ok = state.can_write();
            if ok {
                state.writer = true;
            }
            ok
        };
        osal_debug!(self.logger, "Try write lock {}", if acquired { "succeeded" } else { "failed" });
        acquired
    }

    pub fn write_lock_for(&self, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let acquired = self.acquire_write(Some(deadline));
        osal_debug!(
            self.logger,
            "Write lock with timeout {}",
            if acquired { "succeeded" } else { "failed" }
        );
        acquired
    }

    pub fn write_unlock(&self) {
        let mut state = self.lock_state();
        if !state.writer {
            drop(state);
            osal_warn!(self.logger, "Write unlock without the write lock held");
            return;
        }
        state.writer = false;
        drop(state);
        self.changed.notify_all();
        osal_debug!(self.logger, "Write lock released");
    }

    /// Number of readers currently holding the lock. Diagnostic only.
    pub fn read_lock_count(&self) -> usize {
        self.lock_state().readers
    }

    /// Diagnostic only.
    pub fn is_write_locked(&self) -> bool {
        self.lock_state().writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn quiet() -> RwLock {
        RwLock::with_logger(Logger::null())
    }

    #[test]
    fn test_reader_blocks_try_write() {
        let lock = Arc::new(quiet());
        lock.read_lock();

        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || other.try_write_lock()).join().unwrap();
        assert!(!acquired);

        lock.read_unlock();
        assert!(lock.try_write_lock());
        assert!(lock.is_write_locked());
        lock.write_unlock();
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_concurrent_readers() {
        let lock = Arc::new(quiet());
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    lock.read_lock();
                    peak.fetch_max(lock.read_lock_count(), Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    lock.read_unlock();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1);
        assert_eq!(lock.read_lock_count(), 0);
    }

    #[test]
    fn test_writer_exclusive() {
        let lock = Arc::new(quiet());
        let value = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..100 {
                        lock.write_lock();
                        let current = value.load(Ordering::SeqCst);
                        thread::yield_now();
                        value.store(current + 1, Ordering::SeqCst);
                        lock.write_unlock();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(value.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn test_write_lock_for_times_out_and_leaves_state() {
        let lock = Arc::new(quiet());
        lock.read_lock();

        let other = Arc::clone(&lock);
        let started = Instant::now();
        let acquired = thread::spawn(move || other.write_lock_for(50)).join().unwrap();
        assert!(!acquired);
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert!(!lock.is_write_locked());
        assert_eq!(lock.read_lock_count(), 1);

        // A timed-out writer must not keep blocking new readers.
        assert!(lock.try_read_lock());
        lock.read_unlock();
        lock.read_unlock();
    }

    #[test]
    fn test_read_lock_for_times_out_under_writer() {
        let lock = Arc::new(quiet());
        lock.write_lock();
        let other = Arc::clone(&lock);
        assert!(!thread::spawn(move || other.read_lock_for(30)).join().unwrap());
        assert_eq!(lock.read_lock_count(), 0);
        lock.write_unlock();
        assert!(lock.read_lock_for(30));
        lock.read_unlock();
    }

    #[test]
    fn test_write_lock_for_acquires_after_release() {
        let lock = Arc::new(quiet());
        lock.read_lock();
        let releaser = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                lock.read_unlock();
            })
        };
        assert!(lock.write_lock_for(1_000));
        releaser.join().unwrap();
        lock.write_unlock();
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(quiet());
        lock.read_lock();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.write_lock();
                lock.write_unlock();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!lock.try_read_lock());

        lock.read_unlock();
        writer.join().unwrap();
        assert!(lock.try_read_lock());
        lock.read_unlock();
    }

    #[test]
    fn test_unbalanced_unlock_is_noop() {
        let lock = quiet();
        lock.read_unlock();
        lock.write_unlock();
        assert_eq!(lock.read_lock_count(), 0);
        assert!(!lock.is_write_locked());
    }
}
