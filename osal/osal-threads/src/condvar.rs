//!
//! Condition variable
//!
//! Waits against a caller-held [`osal_core::Mutex`]: `wait` releases the
//! mutex, blocks until notified and reacquires the mutex before returning.
//!
//! Each waiter takes a ticket. `notify_one` hands a wake-up to the oldest
//! ticket, `notify_all` to every ticket outstanding at that moment. A waiter
//! only returns `true` when its own ticket was signalled, so OS-level
//! spurious wake-ups never reach the caller.
//!

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use osal_core::{osal_debug, Logger, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    waiting: VecDeque<u64>,
    signalled: HashSet<u64>,
}

pub struct ConditionVariable {
    tickets: StdMutex<Tickets>,
    wakeup: Condvar,
    waiters: AtomicUsize,
    logger: Logger,
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("waiters", &self.wait_count())
            .finish()
    }
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            tickets: StdMutex::new(Tickets::default()),
            wakeup: Condvar::new(),
            waiters: AtomicUsize::new(0),
            logger,
        }
    }

    fn lock_tickets(&self) -> MutexGuard<'_, Tickets> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases `mutex`, blocks until notified, then reacquires `mutex`.
    /// The caller must hold `mutex`.
    pub fn wait(&self, mutex: &Mutex) {
        self.wait_until(mutex, None);
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout_ms`. Returns
    /// false on timeout; `mutex` is held again either way.
    pub fn wait_for(&self, mutex: &Mutex, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        self.wait_until(mutex, Some(deadline))
    }

    fn wait_until(&self, mutex: &Mutex, deadline: Option<Instant>) -> bool {
        self.waiters.fetch_add(1, Ordering::SeqCst);

        // The ticket is taken before the caller's mutex is released, so a
        // notifier holding that mutex always sees this waiter.
        let mut tickets = self.lock_tickets();
        let ticket = tickets.next;
        tickets.next += 1;
        tickets.waiting.push_back(ticket);
        mutex.unlock();
        osal_debug!(self.logger, "Waiting on condition (ticket {})", ticket);

        let notified = loop {
            if tickets.signalled.remove(&ticket) {
                break true;
            }
            match deadline {
                None => {
                    tickets = self
                        .wakeup
                        .wait(tickets)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tickets.waiting.retain(|t| *t != ticket);
                        break false;
                    }
                    tickets = self
                        .wakeup
                        .wait_timeout(tickets, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };
        drop(tickets);

        mutex.lock();
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        osal_debug!(
            self.logger,
            "Condition wait {}",
            if notified { "notified" } else { "timed out" }
        );
        notified
    }

    /// Wakes the longest-waiting thread, if any.
    pub fn notify_one(&self) {
        let woke = {
            let mut tickets = self.lock_tickets();
            match tickets.waiting.pop_front() {
                Some(ticket) => {
                    tickets.signalled.insert(ticket);
                    true
                }
                None => false,
            }
        };
        if woke {
            self.wakeup.notify_all();
        }
        osal_debug!(self.logger, "Notify one ({})", if woke { "woke a waiter" } else { "no waiters" });
    }

    /// Wakes every thread currently waiting.
    pub fn notify_all(&self) {
        let woken = {
            let mut tickets = self.lock_tickets();
            let waiting: Vec<u64> = tickets.waiting.drain(..).collect();
            let woken = waiting.len();
            tickets.signalled.extend(waiting);
            woken
        };
        if woken > 0 {
            self.wakeup.notify_all();
        }
        osal_debug!(self.logger, "Notify all ({} waiters)", woken);
    }

    /// Threads currently inside `wait`/`wait_for`, including those
    /// reacquiring the mutex after a wake-up.
    pub fn wait_count(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}
