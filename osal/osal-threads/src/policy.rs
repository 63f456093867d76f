//!
//! Pool growth policies
//!
//! After every submit the pool takes a [`PoolSnapshot`] and asks its
//! [`GrowthPolicy`] whether to add one worker. Policies only ever grow the
//! pool; workers are removed by `stop` or `remove_idle_worker`.
//!

/// Point-in-time view of a pool, taken with the worker list locked. The
/// active count is read without the queue lock and may lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub active_threads: u32,
    pub worker_count: u32,
    pub min_threads: u32,
    pub max_threads: u32,
    pub queued_tasks: usize,
}

pub trait GrowthPolicy: Send + Sync {
    fn should_grow(&self, snapshot: &PoolSnapshot) -> bool;
}

/// Grow while every worker is busy and the active count is below
/// `max_threads`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SaturationGrowth;

impl GrowthPolicy for SaturationGrowth {
    fn should_grow(&self, s: &PoolSnapshot) -> bool {
        s.active_threads == s.worker_count && s.active_threads < s.max_threads
    }
}

/// Grow when more than `threshold` tasks are waiting, regardless of how
/// many workers are busy.
#[derive(Debug, Clone, Copy)]
pub struct QueueDepthGrowth {
    pub threshold: usize,
}

impl GrowthPolicy for QueueDepthGrowth {
    fn should_grow(&self, s: &PoolSnapshot) -> bool {
        s.worker_count < s.max_threads && s.queued_tasks > self.threshold
    }
}
