//!
//! Thread pool
//!
//! A fixed-then-growing set of worker [`Thread`]s draining one shared FIFO
//! queue of [`Task`]s.
//!
//! - `start(n, ..)` spins up exactly `n` workers and sets both bounds to `n`
//! - `submit` appends to the queue, wakes one worker and consults the
//!   [`GrowthPolicy`] (default [`SaturationGrowth`]) to add one more worker
//! - Workers check the suspended flag before every dequeue; a task that is
//!   already executing always runs to completion
//! - `stop` is a hard shutdown: workers exit after their current task and
//!   whatever is still queued is discarded
//!
//! Tasks run in submission order. The task priority is stored and visible
//! but never used for ordering; it is reserved.
//!
//! ## Queue Discipline
//!
//! The queue, the started flag and the suspended flag are only changed with
//! the queue mutex held, so a worker cannot miss the wake-up that follows.
//! The active-thread counter is a plain atomic and is advisory.
//!

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use osal_core::{osal_debug, osal_error, osal_warn, Logger};

use crate::error::ThreadError;
use crate::policy::{GrowthPolicy, PoolSnapshot, SaturationGrowth};
use crate::thread::{Thread, ThreadContext};

/// Payload handed to a task function (or to the failure callback).
pub type TaskArg = Box<dyn Any + Send>;

/// Invoked with the argument of a task that was submitted without a function.
pub type FailureCallback = Arc<dyn Fn(TaskArg) + Send + Sync>;

/// A shareable task function. Two `TaskFn`s are equal when they are clones
/// of the same function, which is what `cancel_task` matches on.
#[derive(Clone)]
pub struct TaskFn(Arc<dyn Fn(TaskArg) + Send + Sync>);

impl TaskFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TaskArg) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, argument: TaskArg) {
        (self.0)(argument)
    }

    pub fn same(&self, other: &TaskFn) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl PartialEq for TaskFn {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for TaskFn {}

impl std::fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskFn({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

pub struct Task {
    pub function: Option<TaskFn>,
    pub argument: TaskArg,
    pub priority: i32,
}

impl Task {
    pub fn new(function: TaskFn, argument: impl Any + Send, priority: i32) -> Self {
        Self {
            function: Some(function),
            argument: Box::new(argument),
            priority,
        }
    }

    /// A task with no function. Executing it routes the argument to the
    /// pool's failure callback.
    pub fn empty(argument: impl Any + Send, priority: i32) -> Self {
        Self {
            function: None,
            argument: Box::new(argument),
            priority,
        }
    }

    fn matches(&self, function: Option<&TaskFn>) -> bool {
        match (self.function.as_ref(), function) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("function", &self.function)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Shared function behind `ThreadPool::execute`; its argument is the boxed
/// closure itself.
fn job_runner() -> &'static TaskFn {
    static RUNNER: OnceLock<TaskFn> = OnceLock::new();
    RUNNER.get_or_init(|| {
        TaskFn::new(|argument| {
            if let Ok(job) = argument.downcast::<Job>() {
                (*job)()
            }
        })
    })
}

struct PoolShared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    started: AtomicBool,
    suspended: AtomicBool,
    active: AtomicU32,
    failure_callback: RwLock<Option<FailureCallback>>,
    logger: Logger,
}

impl PoolShared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_flag(&self, flag: &AtomicBool, value: bool) {
        {
            let _queue = self.lock_queue();
            flag.store(value, Ordering::SeqCst);
        }
        self.available.notify_all();
    }

    fn wake_all(&self) {
        drop(self.lock_queue());
        self.available.notify_all();
    }

    /// Blocks until there is a task to run, or returns `None` when the
    /// worker should exit.
    fn next_task(&self, ctx: &ThreadContext, busy: &AtomicBool) -> Option<Task> {
        let mut queue = self.lock_queue();
        loop {
            if !self.started.load(Ordering::SeqCst) || ctx.should_stop() {
                return None;
            }
            if !self.suspended.load(Ordering::SeqCst) {
                if let Some(task) = queue.pop_front() {
                    busy.store(true, Ordering::SeqCst);
                    return Some(task);
                }
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn run(&self, task: Task) {
        match task.function {
            Some(function) => {
                self.active.fetch_add(1, Ordering::SeqCst);
                let argument = task.argument;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.call(argument)));
                self.active.fetch_sub(1, Ordering::SeqCst);
                if outcome.is_err() {
                    osal_error!(self.logger, "Task {:?} panicked", function);
                }
            }
            None => {
                let callback = self
                    .failure_callback
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match callback {
                    Some(callback) => {
                        let argument = task.argument;
                        if panic::catch_unwind(AssertUnwindSafe(|| callback(argument))).is_err() {
                            osal_error!(self.logger, "Task failure callback panicked");
                        }
                    }
                    None => osal_warn!(self.logger, "Dropped task without a function"),
                }
            }
        }
    }
}

fn worker_loop(shared: &PoolShared, ctx: &ThreadContext, busy: &AtomicBool) {
    while let Some(task) = shared.next_task(ctx, busy) {
        shared.run(task);
        busy.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    thread: Thread,
    busy: Arc<AtomicBool>,
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<Worker>>,
    priority: AtomicI32,
    stack_size: AtomicUsize,
    min_threads: AtomicU32,
    max_threads: AtomicU32,
    next_worker_id: AtomicU32,
    policy: Box<dyn GrowthPolicy>,
    logger: Logger,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    pub fn new() -> Self {
        Self::with_logger(Logger::process_default())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                started: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                active: AtomicU32::new(0),
                failure_callback: RwLock::new(None),
                logger: logger.clone(),
            }),
            workers: Mutex::new(Vec::new()),
            priority: AtomicI32::new(0),
            stack_size: AtomicUsize::new(0),
            min_threads: AtomicU32::new(0),
            max_threads: AtomicU32::new(0),
            next_worker_id: AtomicU32::new(0),
            policy: Box::new(SaturationGrowth),
            logger,
        }
    }

    /// Replaces the growth policy. Takes effect on the next submit.
    pub fn with_policy(mut self, policy: impl GrowthPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops any existing pool and starts `num_threads` workers. Both thread
    /// bounds are set to `num_threads`.
    pub fn start(&self, num_threads: u32, priority: i32, stack_size: usize) -> Result<(), ThreadError> {
        if self.is_started() || self.thread_count() > 0 {
            self.stop();
        }

        self.shared.set_flag(&self.shared.started, true);
        self.min_threads.store(num_threads, Ordering::SeqCst);
        self.max_threads.store(num_threads, Ordering::SeqCst);
        self.priority.store(priority, Ordering::SeqCst);
        self.stack_size.store(stack_size, Ordering::SeqCst);

        let spawned = {
            let mut workers = self.lock_workers();
            (0..num_threads).try_for_each(|_| self.spawn_worker(&mut workers))
        };
        if let Err(e) = spawned {
            // Queued tasks are kept for a later successful start.
            self.shutdown_workers();
            return Err(e);
        }

        osal_debug!(self.logger, "Thread pool started with {} threads", num_threads);
        Ok(())
    }

    fn spawn_worker(&self, workers: &mut Vec<Worker>) -> Result<(), ThreadError> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = Arc::clone(&busy);

        let mut thread = Thread::with_logger(self.logger.clone());
        thread.start(
            &format!("osal-pool-{}", id),
            move |ctx| worker_loop(&shared, ctx, &worker_busy),
            self.priority.load(Ordering::SeqCst),
            self.stack_size.load(Ordering::SeqCst),
        )?;

        workers.push(Worker { thread, busy });
        Ok(())
    }

    /// Adds one worker regardless of the thread bounds.
    pub fn add_worker(&self) -> Result<(), ThreadError> {
        let mut workers = self.lock_workers();
        self.spawn_worker(&mut workers)?;
        osal_debug!(self.logger, "Worker added ({} total)", workers.len());
        Ok(())
    }

    /// Stops and removes the first worker that is not executing a task.
    /// Returns false when every worker is busy or there are none.
    pub fn remove_idle_worker(&self) -> bool {
        let removed = {
            let mut workers = self.lock_workers();
            workers
                .iter()
                .position(|w| !w.busy.load(Ordering::SeqCst))
                .map(|index| workers.remove(index))
        };

        match removed {
            Some(mut worker) => {
                worker.thread.request_stop();
                self.shared.wake_all();
                worker.thread.stop();
                osal_debug!(self.logger, "Idle worker '{}' removed", worker.thread.name());
                true
            }
            None => false,
        }
    }

    /// Clears the started flag, waits for every worker to exit and discards
    /// queued tasks.
    pub fn stop(&self) {
        self.shutdown_workers();

        let discarded = {
            let mut queue = self.shared.lock_queue();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        osal_debug!(self.logger, "Thread pool stopped ({} queued tasks discarded)", discarded);
    }

    fn shutdown_workers(&self) {
        // Cleared under the workers lock so a concurrent submit cannot grow
        // the pool after the workers are taken.
        let mut workers = {
            let mut workers = self.lock_workers();
            self.shared.set_flag(&self.shared.started, false);
            std::mem::take(&mut *workers)
        };
        for worker in &workers {
            worker.thread.request_stop();
        }
        self.shared.wake_all();
        for worker in &mut workers {
            worker.thread.stop();
        }
    }

    /// Workers finish their current task and then stop dequeuing.
    pub fn suspend(&self) {
        self.shared.set_flag(&self.shared.suspended, true);
        osal_debug!(self.logger, "Thread pool suspended");
    }

    pub fn resume(&self) {
        self.shared.set_flag(&self.shared.suspended, false);
        osal_debug!(self.logger, "Thread pool resumed");
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }

    pub fn submit(&self, function: TaskFn, argument: impl Any + Send, priority: i32) {
        self.submit_task(Task::new(function, argument, priority));
    }

    /// Runs a one-off closure on the pool.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        self.submit(job_runner().clone(), job, 0);
    }

    pub fn submit_task(&self, task: Task) {
        let priority = task.priority;
        let queued = {
            let mut queue = self.shared.lock_queue();
            queue.push_back(task);
            queue.len()
        };
        self.shared.available.notify_one();
        self.grow_if_needed(queued);
        osal_debug!(self.logger, "Task submitted (priority {}, {} queued)", priority, queued);
    }

    fn grow_if_needed(&self, queued: usize) {
        if !self.is_started() {
            return;
        }
        let mut workers = self.lock_workers();
        if !self.is_started() {
            return;
        }
        let snapshot = PoolSnapshot {
            active_threads: self.shared.active.load(Ordering::SeqCst),
            worker_count: workers.len() as u32,
            min_threads: self.min_threads.load(Ordering::SeqCst),
            max_threads: self.max_threads.load(Ordering::SeqCst),
            queued_tasks: queued,
        };
        if self.policy.should_grow(&snapshot) && self.spawn_worker(&mut workers).is_ok() {
            osal_debug!(self.logger, "Thread pool grew to {} threads", workers.len());
        }
    }

    /// Removes every queued task whose function matches `function` (`None`
    /// matches tasks without a function). Running tasks are unaffected.
    pub fn cancel_task(&self, function: Option<&TaskFn>) -> bool {
        let removed = {
            let mut queue = self.shared.lock_queue();
            let before = queue.len();
            queue.retain(|task| !task.matches(function));
            before - queue.len()
        };
        if removed > 0 {
            osal_debug!(self.logger, "Task cancelled ({} removed)", removed);
        } else {
            osal_debug!(self.logger, "Task not found");
        }
        removed > 0
    }

    pub fn set_task_failure_callback<F>(&self, callback: F)
    where
        F: Fn(TaskArg) + Send + Sync + 'static,
    {
        *self
            .shared
            .failure_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        osal_debug!(self.logger, "Task failure callback set");
    }

    /// Applies `priority` to every current worker and to workers created later.
    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::SeqCst);
        for worker in self.lock_workers().iter_mut() {
            worker.thread.set_priority(priority);
        }
        osal_debug!(self.logger, "Thread pool priority set to {}", priority);
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }

    pub fn set_max_threads(&self, max_threads: u32) {
        self.max_threads.store(max_threads, Ordering::SeqCst);
        osal_debug!(self.logger, "Max threads set to {}", max_threads);
    }

    pub fn max_threads(&self) -> u32 {
        self.max_threads.load(Ordering::SeqCst)
    }

    pub fn set_min_threads(&self, min_threads: u32) {
        self.min_threads.store(min_threads, Ordering::SeqCst);
        osal_debug!(self.logger, "Min threads set to {}", min_threads);
    }

    pub fn min_threads(&self) -> u32 {
        self.min_threads.load(Ordering::SeqCst)
    }

    pub fn task_queue_size(&self) -> usize {
        self.shared.lock_queue().len()
    }

    pub fn active_thread_count(&self) -> u32 {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn thread_count(&self) -> usize {
        self.lock_workers().len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.is_started() || self.thread_count() > 0 {
            self.stop();
        }
    }
}
