//!
//! Thread abstraction
//!
//! A [`Thread`] wraps a single OS thread and its lifecycle:
//!
//! ```text
//! Created ──start──▶ Running ◀──resume/suspend──▶ Suspended
//!                       │                              │
//!                       └────── task returns / stop ───┴──▶ Stopped ──start──▶ Running
//! ```
//!
//! Stop and suspend never interrupt the task. The task closure receives a
//! [`ThreadContext`] and observes them at its own checkpoints:
//!
//! ```
//! use osal_threads::Thread;
//! use std::time::Duration;
//!
//! let mut thread = Thread::spawn("ticker", |ctx| {
//!     while ctx.checkpoint() {
//!         ctx.sleep(Duration::from_millis(5));
//!     }
//! }, 0, 0).unwrap();
//!
//! thread.suspend();
//! thread.resume();
//! thread.stop();
//! assert!(!thread.is_running());
//! ```
//!
//! `join` and `detach` only change who owns the OS thread; they do not move
//! the state machine.
//!

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use osal_core::{osal_debug, osal_error, osal_warn, Logger};

use crate::error::ThreadError;

/// Smallest stack handed to the OS. Requests below this are raised to it.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Created,
    Running,
    Suspended,
    Stopped,
}

/// State shared between a `Thread` and the task running on it. A fresh
/// `Control` is created for every run.
///
/// `priority` is written before `tid` is read by `set_priority`, and the new
/// thread publishes `tid` before reading `priority`, so one side always
/// applies the latest value.
struct Control {
    state: Mutex<ThreadState>,
    changed: Condvar,
    stop_requested: AtomicBool,
    tid: AtomicI64,
    priority: AtomicI32,
}

impl Control {
    fn new(state: ThreadState, priority: i32) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            tid: AtomicI64::new(0),
            priority: AtomicI32::new(priority),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ThreadState {
        *self.lock()
    }

    fn is_active(&self) -> bool {
        matches!(self.state(), ThreadState::Running | ThreadState::Suspended)
    }

    fn transition(&self, from: ThreadState, to: ThreadState) -> bool {
        let mut state = self.lock();
        if *state != from {
            return false;
        }
        *state = to;
        drop(state);
        self.changed.notify_all();
        true
    }

    fn request_stop(&self) {
        {
            let _state = self.lock();
            self.stop_requested.store(true, Ordering::SeqCst);
        }
        self.changed.notify_all();
    }

    fn finish(&self) {
        *self.lock() = ThreadState::Stopped;
        self.tid.store(0, Ordering::SeqCst);
        self.changed.notify_all();
    }

    fn wait_finished(&self) {
        let mut state = self.lock();
        while *state != ThreadState::Stopped {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Handle given to a running task for cooperative stop and suspend.
#[derive(Clone)]
pub struct ThreadContext {
    control: Arc<Control>,
    name: Arc<str>,
}

impl ThreadContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once `stop` (or `request_stop`) was called on the owning thread.
    pub fn should_stop(&self) -> bool {
        self.control.stop_requested.load(Ordering::SeqCst)
    }

    /// Suspension point. Blocks while the thread is suspended and returns
    /// false when the task should exit.
    pub fn checkpoint(&self) -> bool {
        let mut state = self.control.lock();
        while *state == ThreadState::Suspended && !self.should_stop() {
            state = self
                .control
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !self.should_stop()
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false when
    /// the sleep was cut short by a stop request.
    /// `Duration::MAX` sleeps until stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut state = self.control.lock();
        loop {
            if self.should_stop() {
                return false;
            }
            match deadline {
                None => {
                    state = self
                        .control
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    state = self
                        .control
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

pub struct Thread {
    name: String,
    priority: i32,
    stack_size: usize,
    control: Arc<Control>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
    logger: Logger,
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("priority", &self.priority)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

impl Thread {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            name: String::new(),
            priority: 0,
            stack_size: 0,
            control: Arc::new(Control::new(ThreadState::Created, 0)),
            handle: None,
            thread_id: None,
            logger,
        }
    }

    /// Creates a thread and starts it immediately.
    pub fn spawn<F>(name: &str, task: F, priority: i32, stack_size: usize) -> Result<Self, ThreadError>
    where
        F: FnOnce(&ThreadContext) + Send + 'static,
    {
        let mut thread = Self::new();
        thread.start(name, task, priority, stack_size)?;
        Ok(thread)
    }

    /// Launches `task` on a new OS thread. A previous run still in progress
    /// is stopped first. `stack_size == 0` selects the platform default.
    pub fn start<F>(
        &mut self,
        name: &str,
        task: F,
        priority: i32,
        stack_size: usize,
    ) -> Result<(), ThreadError>
    where
        F: FnOnce(&ThreadContext) + Send + 'static,
    {
        if self.control.is_active() {
            osal_debug!(self.logger, "Thread '{}' restarting, stopping previous run", self.name);
        }
        self.stop();

        self.name = name.replace('\0', "");
        self.priority = priority;
        self.stack_size = stack_size;
        self.control = Arc::new(Control::new(ThreadState::Running, priority));
        self.thread_id = None;

        let mut builder = thread::Builder::new().name(self.name.clone());
        if stack_size > 0 {
            builder = builder.stack_size(stack_size.max(MIN_STACK_SIZE));
        }

        let control = Arc::clone(&self.control);
        let name: Arc<str> = Arc::from(self.name.as_str());
        let logger = self.logger.clone();

        let spawned = builder.spawn(move || {
            let tid = sched::current_tid();
            control.tid.store(tid, Ordering::SeqCst);
            let priority = control.priority.load(Ordering::SeqCst);
            if priority != 0 {
                if let Err(e) = sched::apply_priority(tid, priority) {
                    osal_warn!(logger, "Thread '{}' could not apply priority {}: {}", name, priority, e);
                }
            }

            let ctx = ThreadContext {
                control: Arc::clone(&control),
                name: Arc::clone(&name),
            };
            if panic::catch_unwind(AssertUnwindSafe(|| task(&ctx))).is_err() {
                osal_error!(logger, "Thread '{}' task panicked", name);
            }
            control.finish();
        });

        match spawned {
            Ok(handle) => {
                self.thread_id = Some(handle.thread().id());
                self.handle = Some(handle);
                osal_debug!(
                    self.logger,
                    "Thread '{}' started (priority {}, stack {})",
                    self.name,
                    priority,
                    stack_size
                );
                Ok(())
            }
            Err(source) => {
                self.control.finish();
                osal_error!(self.logger, "Failed to create thread '{}': {}", self.name, source);
                Err(ThreadError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn is_current(&self) -> bool {
        self.thread_id == Some(thread::current().id())
    }

    /// Asks the task to finish without waiting for it.
    pub fn request_stop(&self) {
        if self.control.is_active() {
            self.control.request_stop();
        }
    }

    /// Requests termination and blocks until the task has returned. A no-op
    /// when nothing is running. Called from the thread itself it only
    /// requests the stop.
    pub fn stop(&mut self) {
        if !self.control.is_active() && self.handle.is_none() {
            return;
        }
        self.control.request_stop();

        if self.is_current() {
            osal_debug!(self.logger, "Thread '{}' stop requested from itself", self.name);
            return;
        }

        match self.handle.take() {
            Some(handle) => {
                let _ = handle.join();
            }
            None => self.control.wait_finished(),
        }
        osal_debug!(self.logger, "Thread '{}' stopped", self.name);
    }

    /// Blocks until the task returns. Safe to call repeatedly; returns at
    /// once after a previous join or a detach.
    pub fn join(&mut self) {
        if self.is_current() {
            osal_warn!(self.logger, "Thread '{}' cannot join itself", self.name);
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            osal_debug!(self.logger, "Thread '{}' joined", self.name);
        }
    }

    /// Releases the OS thread so it runs on independently.
    pub fn detach(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle);
            osal_debug!(self.logger, "Thread '{}' detached", self.name);
        }
    }

    /// Marks the thread suspended; the task parks at its next checkpoint.
    /// Returns false when the thread is not running.
    pub fn suspend(&self) -> bool {
        let suspended = self
            .control
            .transition(ThreadState::Running, ThreadState::Suspended);
        if suspended {
            osal_debug!(self.logger, "Thread '{}' suspended", self.name);
        }
        suspended
    }

    pub fn resume(&self) -> bool {
        let resumed = self
            .control
            .transition(ThreadState::Suspended, ThreadState::Running);
        if resumed {
            osal_debug!(self.logger, "Thread '{}' resumed", self.name);
        }
        resumed
    }

    /// Caches `priority` for the next run and applies it to the live thread
    /// if there is one. Returns false if the OS rejected the change.
    pub fn set_priority(&mut self, priority: i32) -> bool {
        self.priority = priority;
        self.control.priority.store(priority, Ordering::SeqCst);
        let tid = self.control.tid.load(Ordering::SeqCst);
        if !self.control.is_active() || tid == 0 {
            osal_debug!(self.logger, "Thread '{}' priority {} cached", self.name, priority);
            return true;
        }
        match sched::apply_priority(tid, priority) {
            Ok(()) => {
                osal_debug!(self.logger, "Thread '{}' priority set to {}", self.name, priority);
                true
            }
            Err(e) => {
                osal_warn!(self.logger, "Thread '{}' priority {} rejected: {}", self.name, priority, e);
                false
            }
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.control.state()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_active()
    }

    /// Identifier of the most recently started OS thread.
    pub fn id(&self) -> Option<ThreadId> {
        self.thread_id
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "linux")]
mod sched {
    use std::io;

    pub fn current_tid() -> i64 {
        unsafe { libc::syscall(libc::SYS_gettid) as i64 }
    }

    /// Maps an OSAL priority onto the thread's nice value: higher priority,
    /// lower nice.
    pub fn apply_priority(tid: i64, priority: i32) -> io::Result<()> {
        let nice = priority.saturating_neg().clamp(-20, 19);
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sched {
    use std::io;

    pub fn current_tid() -> i64 {
        1
    }

    pub fn apply_priority(_tid: i64, _priority: i32) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize};

    fn quiet() -> Thread {
        Thread::with_logger(Logger::null())
    }

    #[test]
    fn test_start_and_stop_interrupts_sleep() {
        let mut thread = quiet();
        let stage = Arc::new(AtomicI32::new(1));
        let task_stage = Arc::clone(&stage);

        thread
            .start(
                "TestThread",
                move |ctx| {
                    task_stage.store(2, Ordering::SeqCst);
                    if ctx.sleep(Duration::from_secs(10)) {
                        task_stage.store(3, Ordering::SeqCst);
                    }
                },
                0,
                1024,
            )
            .unwrap();

        let started = Instant::now();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(stage.load(Ordering::SeqCst), 2);
        thread.stop();
        let elapsed = started.elapsed();

        assert_eq!(stage.load(Ordering::SeqCst), 2);
        assert!(elapsed > Duration::from_millis(50) && elapsed < Duration::from_millis(500));
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert!(!thread.is_running());
    }

    #[test]
    fn test_join_is_repeatable() {
        let mut thread = quiet();
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);

        thread
            .start("TestThread", move |_| flag.store(true, Ordering::SeqCst), 0, 0)
            .unwrap();
        thread.join();
        assert!(executed.load(Ordering::SeqCst));
        thread.join();
        assert!(!thread.is_running());
    }

    #[test]
    fn test_detach_keeps_running() {
        let mut thread = quiet();
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);

        thread
            .start(
                "TestThread",
                move |_| {
                    thread::sleep(Duration::from_millis(50));
                    flag.store(true, Ordering::SeqCst);
                },
                0,
                0,
            )
            .unwrap();

        thread.detach();
        thread::sleep(Duration::from_millis(200));
        assert!(executed.load(Ordering::SeqCst));
        thread.detach();
        thread.stop();
    }

    #[test]
    fn test_is_running_until_completion() {
        let mut thread = quiet();
        thread
            .start("TestThread", |_| thread::sleep(Duration::from_millis(100)), 0, 0)
            .unwrap();

        assert!(thread.is_running());
        thread.join();
        assert!(!thread.is_running());
        assert!(!thread.is_running());
    }

    #[test]
    fn test_priority_is_cached() {
        let mut thread = quiet();
        assert!(thread.set_priority(10));
        assert_eq!(thread.priority(), 10);

        thread.start("TestThread", |_| {}, 0, 0).unwrap();
        thread.join();
        assert!(thread.set_priority(-3));
        assert_eq!(thread.priority(), -3);
    }

    #[test]
    fn test_restart_stops_previous_run() {
        let mut thread = quiet();
        let first_finished = Arc::new(AtomicBool::new(false));
        let second_ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&first_finished);
        thread
            .start(
                "first",
                move |ctx| {
                    while ctx.sleep(Duration::from_millis(10)) {}
                    flag.store(true, Ordering::SeqCst);
                },
                0,
                0,
            )
            .unwrap();

        let flag = Arc::clone(&second_ran);
        thread
            .start("second", move |_| flag.store(true, Ordering::SeqCst), 0, 0)
            .unwrap();

        assert!(first_finished.load(Ordering::SeqCst));
        thread.join();
        assert!(second_ran.load(Ordering::SeqCst));
        assert_eq!(thread.name(), "second");
    }

    #[test]
    fn test_suspend_and_resume_at_checkpoints() {
        let mut thread = quiet();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        thread
            .start(
                "ticker",
                move |ctx| {
                    while ctx.checkpoint() {
                        counter.fetch_add(1, Ordering::SeqCst);
                        ctx.sleep(Duration::from_millis(5));
                    }
                },
                0,
                0,
            )
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(thread.suspend());
        assert_eq!(thread.state(), ThreadState::Suspended);
        assert!(!thread.suspend());

        thread::sleep(Duration::from_millis(30));
        let parked = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), parked);

        assert!(thread.resume());
        assert_eq!(thread.state(), ThreadState::Running);
        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::SeqCst) > parked);

        thread.stop();
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert!(!thread.resume());
    }

    #[test]
    fn test_stop_while_suspended() {
        let mut thread = quiet();
        thread
            .start(
                "parked",
                |ctx| {
                    while ctx.checkpoint() {
                        ctx.sleep(Duration::from_millis(5));
                    }
                },
                0,
                0,
            )
            .unwrap();
        thread.suspend();
        thread::sleep(Duration::from_millis(20));
        thread.stop();
        assert!(!thread.is_running());
    }

    #[test]
    fn test_operations_before_start_are_noops() {
        let mut thread = quiet();
        assert_eq!(thread.state(), ThreadState::Created);
        thread.stop();
        thread.join();
        thread.detach();
        assert!(!thread.suspend());
        assert!(!thread.resume());
        assert_eq!(thread.state(), ThreadState::Created);
        assert!(thread.id().is_none());
    }

    #[test]
    fn test_stop_after_detach_waits_for_exit() {
        let mut thread = quiet();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);
        thread
            .start(
                "detached",
                move |ctx| {
                    while ctx.sleep(Duration::from_millis(5)) {}
                    flag.store(true, Ordering::SeqCst);
                },
                0,
                0,
            )
            .unwrap();
        thread.detach();
        thread.stop();
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_task_stops_thread() {
        let mut thread = quiet();
        thread
            .start("panics", |_| panic!("task failure"), 0, 0)
            .unwrap();
        thread.join();
        assert_eq!(thread.state(), ThreadState::Stopped);
    }

    #[test]
    fn test_context_reports_name() {
        let seen = Arc::new(Mutex::new(String::new()));
        let slot = Arc::clone(&seen);
        let mut thread = Thread::spawn(
            "named",
            move |ctx| *slot.lock().unwrap() = ctx.name().to_string(),
            0,
            0,
        )
        .unwrap();
        thread.join();
        assert_eq!(*seen.lock().unwrap(), "named");
        assert!(thread.id().is_some());
    }
    #[test]
    fn test_sleep_without_deadline_until_stopped() {
        let mut thread = quiet();
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        thread
            .start(
                "forever",
                move |ctx| flag.store(!ctx.sleep(Duration::MAX), Ordering::SeqCst),
                0,
                0,
            )
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(thread.is_running());
        thread.stop();
        assert!(interrupted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let sink = Arc::new(osal_core::CaptureSink::new());
        let mut thread = Thread::with_logger(Logger::new(osal_core::LogLevel::Error, false, sink.clone()));

        let result = thread.start("huge", |_| {}, 0, usize::MAX);
        assert!(matches!(result, Err(ThreadError::Spawn { ref name, .. }) if name == "huge"));
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert!(!thread.is_running());
        assert!(sink.contains("Failed to create thread 'huge'"));
        assert!(sink
            .records()
            .iter()
            .any(|r| r.level == osal_core::LogLevel::Error));
    }

    #[cfg(target_os = "linux")]
    fn current_nice() -> i32 {
        unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_priority_set_right_after_start_reaches_os() {
        if current_nice() > 5 {
            // Moving down to nice 5 from a higher nice needs privileges.
            return;
        }
        let mut thread = quiet();
        let observed = Arc::new(AtomicI32::new(i32::MIN));
        let slot = Arc::clone(&observed);
        thread
            .start(
                "reniced",
                move |ctx| {
                    ctx.sleep(Duration::from_millis(50));
                    slot.store(current_nice(), Ordering::SeqCst);
                },
                0,
                0,
            )
            .unwrap();

        assert!(thread.set_priority(-5));
        thread.join();
        assert_eq!(observed.load(Ordering::SeqCst), 5);
    }
}
