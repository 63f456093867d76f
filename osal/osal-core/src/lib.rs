//!
//! osal-core - Collaborators for the OSAL concurrency primitives
//!
//! Everything the thread, pool, lock and timer crates lean on but which is
//! not itself a concurrency primitive.
//!
//! ## Logging
//!
//! Leveled logging through an injected [`Logger`]:
//! - `LogLevel` - `None < Error < Warning < Info < Debug < Verbose`
//! - `LogSink` - where records go (`NullSink`, `TracingSink`, `CaptureSink`)
//! - `osal_debug!(logger, "...")` and friends capture file, module and line
//! - `set_default_logger` / `Logger::process_default` for the process boundary
//!
//! ## Clock
//!
//! `Chrono` exposes a millisecond tick counter, elapsed seconds and
//! calendar-string formatting.
//!
//! ## Mutex
//!
//! `Mutex` is a plain lock with explicit `lock`/`unlock`, the shape the
//! condition variable waits against.
//!
//! ## Configuration
//!
//! `OsalConfig` loads logging, thread and pool defaults from TOML.
//!

pub mod clock;
pub mod config;
pub mod log;
pub mod mutex;

pub use clock::{Chrono, TimePoint};
pub use config::{ConfigError, LogSettings, OsalConfig, PoolSettings, ThreadSettings};
pub use log::*;
pub use mutex::Mutex;
