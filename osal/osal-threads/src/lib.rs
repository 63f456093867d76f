//!
//! osal-threads - Concurrency Primitives
//!
//! Portable thread-level primitives for code that must run unchanged on
//! different OS backends.
//!
//! ## Thread
//!
//! [`Thread`] owns one OS thread running a task closure. Stop, suspend and
//! resume are cooperative: the task receives a [`ThreadContext`] and honors
//! them at its own checkpoints.
//!
//! ## Thread Pool
//!
//! [`ThreadPool`] runs submitted [`Task`]s on a set of worker threads:
//! - Strict FIFO dispatch (the task priority is recorded, never reordered on)
//! - Growth by one worker per submit while every worker is busy, bounded by
//!   `max_threads`, behind a pluggable [`GrowthPolicy`]
//! - Suspend/resume of dispatch, cancellation of still-queued tasks
//! - Failure callback for tasks submitted without a function
//!
//! ## Locks
//!
//! - [`RwLock`] - shared/exclusive lock with `try_*` and `*_for` variants
//! - [`ConditionVariable`] - waits against an `osal_core::Mutex`
//!

pub mod condvar;
pub mod error;
pub mod policy;
pub mod pool;
pub mod rwlock;
pub mod thread;

pub use condvar::ConditionVariable;
pub use error::ThreadError;
pub use policy::{GrowthPolicy, PoolSnapshot, QueueDepthGrowth, SaturationGrowth};
pub use pool::{FailureCallback, Task, TaskArg, TaskFn, ThreadPool};
pub use rwlock::RwLock;
pub use thread::{Thread, ThreadContext, ThreadState, MIN_STACK_SIZE};
