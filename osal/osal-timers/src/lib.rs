///
/// osal-timers - One-shot and periodic timers
///
/// A [`Timer`] owns one [`Thread`] that sleeps until the current deadline
/// (via `Condvar::wait_timeout`) and then invokes the callback. A periodic
/// timer re-arms itself for another interval measured from the end of the
/// callback; a one-shot timer stops after the first fire.
///
/// ## Interrupting The Wait
///
/// `reset` moves the deadline and `stop` clears the running flag; both
/// notify the condvar so the loop re-evaluates immediately instead of
/// sleeping out the old deadline.
///
/// ## Callbacks
///
/// The callback runs with the timer state unlocked, so it may use a
/// [`TimerHandle`] to reset, stop or query the timer that fired it. Calling
/// `reset` from a one-shot callback re-arms it for one more fire.
///

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use osal_core::{osal_debug, osal_error, Logger};
use osal_threads::{Thread, ThreadContext, ThreadError};

/// Shortest interval a periodic timer may use.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_millis(1);

struct TimerState {
    running: bool,
    periodic: bool,
    interval: Duration,
    deadline: Instant,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable control surface of a [`Timer`], usable from inside its own
/// callback or from other threads. It never joins the timer thread.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
    logger: Logger,
}

impl TimerHandle {
    /// Ends the current run after any in-flight callback. Returns whether
    /// the timer was running.
    pub fn stop(&self) -> bool {
        let was_running = {
            let mut state = self.shared.lock();
            std::mem::replace(&mut state.running, false)
        };
        if was_running {
            self.shared.wakeup.notify_all();
        }
        was_running
    }

    /// Restarts the countdown from now without firing the callback.
    pub fn reset(&self) {
        let reset = {
            let mut state = self.shared.lock();
            if state.running {
                state.deadline = Instant::now() + state.interval;
            }
            state.running
        };
        if reset {
            self.shared.wakeup.notify_all();
            osal_debug!(self.logger, "Timer reset");
        } else {
            osal_debug!(self.logger, "Timer reset ignored, not running");
        }
    }

    /// Milliseconds until the next fire, or 0 when not running or overdue.
    pub fn remaining_time(&self) -> u32 {
        let state = self.shared.lock();
        if !state.running {
            return 0;
        }
        let remaining = state.deadline.saturating_duration_since(Instant::now());
        u32::try_from(remaining.as_millis()).unwrap_or(u32::MAX)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }
}

pub struct Timer {
    handle: TimerHandle,
    thread: Thread,
    logger: Logger,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("running", &self.is_running())
            .field("periodic", &self.is_periodic())
            .field("interval", &self.interval())
            .finish()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                running: false,
                periodic: false,
                interval: Duration::ZERO,
                deadline: Instant::now(),
            }),
            wakeup: Condvar::new(),
        });
        Self {
            handle: TimerHandle {
                shared,
                logger: logger.clone(),
            },
            thread: Thread::with_logger(logger.clone()),
            logger,
        }
    }

    /// Stops any previous run and arms the timer. `callback` first fires
    /// `interval_ms` from now; periodic intervals below 1 ms are raised.
    pub fn start<F>(&mut self, interval_ms: u32, periodic: bool, callback: F) -> Result<(), ThreadError>
    where
        F: FnMut() + Send + 'static,
    {
        self.stop();

        let mut interval = Duration::from_millis(u64::from(interval_ms));
        if periodic {
            interval = interval.max(MIN_PERIODIC_INTERVAL);
        }
        {
            let mut state = self.handle.shared.lock();
            state.running = true;
            state.periodic = periodic;
            state.interval = interval;
            state.deadline = Instant::now() + interval;
        }

        let shared = Arc::clone(&self.handle.shared);
        let logger = self.logger.clone();
        let mut callback = callback;
        let started = self.thread.start(
            "osal-timer",
            move |ctx| run_loop(&shared, ctx, &mut callback, &logger),
            0,
            0,
        );

        match started {
            Ok(()) => {
                osal_debug!(
                    self.logger,
                    "Timer started ({} ms, {})",
                    interval.as_millis(),
                    if periodic { "periodic" } else { "one-shot" }
                );
                Ok(())
            }
            Err(e) => {
                self.handle.shared.lock().running = false;
                Err(e)
            }
        }
    }

    /// Halts the loop and waits for the timer thread. A no-op when idle.
    pub fn stop(&mut self) {
        let was_running = self.handle.stop();
        self.thread.stop();
        if was_running {
            osal_debug!(self.logger, "Timer stopped");
        }
    }

    pub fn reset(&self) {
        self.handle.reset();
    }

    pub fn remaining_time(&self) -> u32 {
        self.handle.remaining_time()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn interval(&self) -> Duration {
        self.handle.shared.lock().interval
    }

    pub fn is_periodic(&self) -> bool {
        self.handle.shared.lock().periodic
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &TimerShared, ctx: &ThreadContext, callback: &mut dyn FnMut(), logger: &Logger) {
    let mut state = shared.lock();
    loop {
        if !state.running || ctx.should_stop() {
            break;
        }

        let now = Instant::now();
        if now < state.deadline {
            let wait = state.deadline - now;
            state = shared
                .wakeup
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let fired_deadline = state.deadline;
        drop(state);
        osal_debug!(logger, "Timer fired");
        if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            osal_error!(logger, "Timer callback panicked");
        }
        state = shared.lock();

        if !state.running || state.deadline != fired_deadline {
            // Stopped, or re-armed by a reset from the callback.
            continue;
        }
        if state.periodic {
            state.deadline = Instant::now() + state.interval;
        } else {
            state.running = false;
        }
    }
    state.running = false;
}
