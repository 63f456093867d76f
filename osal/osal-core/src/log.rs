//!
//! Leveled logging for the OSAL primitives
//!
//! Components never reach for a global logger directly. Each one is built
//! with a [`Logger`] (or takes a clone of the process default at
//! construction) and emits records through the `osal_*!` macros:
//!
//! ```
//! use osal_core::{osal_debug, CaptureSink, LogLevel, Logger};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(CaptureSink::new());
//! let logger = Logger::new(LogLevel::Debug, false, sink.clone());
//! osal_debug!(logger, "Thread {} started", "worker");
//! assert_eq!(sink.messages(), vec!["Thread worker started".to_string()]);
//! ```
//!
//! Levels and the include-location flag live behind the `Logger`'s shared
//! handle, so every clone observes `set_level` / `set_include_location`.
//!

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Severity of a log record. A logger at level `L` emits every record whose
/// level is `<= L`; `None` silences everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    #[serde(alias = "warn")]
    Warning = 2,
    Info = 3,
    Debug = 4,
    #[serde(alias = "trace")]
    Verbose = 5,
}

impl LogLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::None,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Verbose,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
        }
    }

    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Verbose => LevelFilter::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown log level '{0}' (expected none, error, warning, info, debug or verbose)")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "verbose" | "trace" => Ok(LogLevel::Verbose),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Source position of a log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub function: &'static str,
    pub line: u32,
}

/// A single formatted log entry. `location` is only filled in when the
/// emitting logger has include-location enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub location: Option<Location>,
    pub message: String,
}

/// Destination for log records.
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord);
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _record: &LogRecord) {}
}

/// Forwards records to the `tracing` ecosystem under the `osal` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

macro_rules! forward_to_tracing {
    ($mac:ident, $record:expr) => {
        match &$record.location {
            Some(loc) => tracing::$mac!(
                target: "osal",
                file = loc.file,
                function = loc.function,
                line = loc.line,
                "{}",
                $record.message
            ),
            None => tracing::$mac!(target: "osal", "{}", $record.message),
        }
    };
}

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) {
        match record.level {
            LogLevel::None => {}
            LogLevel::Error => forward_to_tracing!(error, record),
            LogLevel::Warning => forward_to_tracing!(warn, record),
            LogLevel::Info => forward_to_tracing!(info, record),
            LogLevel::Debug => forward_to_tracing!(debug, record),
            LogLevel::Verbose => forward_to_tracing!(trace, record),
        }
    }
}

/// Keeps records in memory. Useful for asserting on emitted diagnostics.
#[derive(Debug, Default)]
pub struct CaptureSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(needle))
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LogSink for CaptureSink {
    fn write(&self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

struct LoggerInner {
    level: AtomicU8,
    include_location: AtomicBool,
    sink: Arc<dyn LogSink>,
}

/// Handle passed into every component. Clones share level, flag and sink.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("include_location", &self.include_location())
            .finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::null()
    }
}

impl Logger {
    pub fn new(level: LogLevel, include_location: bool, sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                level: AtomicU8::new(level as u8),
                include_location: AtomicBool::new(include_location),
                sink,
            }),
        }
    }

    /// A logger that discards everything.
    pub fn null() -> Self {
        Self::new(LogLevel::None, false, Arc::new(NullSink))
    }

    pub fn tracing(level: LogLevel, include_location: bool) -> Self {
        Self::new(level, include_location, Arc::new(TracingSink))
    }

    /// Clone of the process-wide default logger.
    pub fn process_default() -> Self {
        default_slot()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn include_location(&self) -> bool {
        self.inner.include_location.load(Ordering::Relaxed)
    }

    pub fn set_include_location(&self, include: bool) {
        self.inner.include_location.store(include, Ordering::Relaxed);
    }

    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self.level()
    }

    /// Emits a record. Callers normally go through the `osal_*!` macros,
    /// which check [`Logger::enabled`] before formatting.
    pub fn log(
        &self,
        level: LogLevel,
        file: &'static str,
        function: &'static str,
        line: u32,
        args: fmt::Arguments<'_>,
    ) {
        if !self.enabled(level) {
            return;
        }
        let location = self
            .include_location()
            .then_some(Location { file, function, line });
        self.inner.sink.write(&LogRecord {
            level,
            location,
            message: args.to_string(),
        });
    }
}

fn default_slot() -> &'static RwLock<Logger> {
    static DEFAULT_LOGGER: OnceLock<RwLock<Logger>> = OnceLock::new();
    DEFAULT_LOGGER.get_or_init(|| RwLock::new(Logger::new(LogLevel::Info, false, Arc::new(NullSink))))
}

/// Replaces the process-wide default. Components already constructed keep
/// the logger they were built with.
pub fn set_default_logger(logger: Logger) {
    *default_slot().write().unwrap_or_else(PoisonError::into_inner) = logger;
}

pub fn set_log_level(level: LogLevel) {
    Logger::process_default().set_level(level);
}

pub fn log_level() -> LogLevel {
    Logger::process_default().level()
}

pub fn set_include_location(include: bool) {
    Logger::process_default().set_include_location(include);
}

pub fn include_location() -> bool {
    Logger::process_default().include_location()
}

/// Installs a stderr `tracing-subscriber` and makes a [`TracingSink`]
/// logger at `level` the process default. A subscriber installed earlier
/// by the host application is left in place.
pub fn init_tracing(level: LogLevel, include_location: bool) -> Logger {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level.to_level_filter())
        .try_init();

    let logger = Logger::tracing(level, include_location);
    set_default_logger(logger.clone());
    logger
}

#[macro_export]
macro_rules! osal_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::Logger = &$logger;
        let level: $crate::LogLevel = $level;
        if logger.enabled(level) {
            logger.log(level, file!(), module_path!(), line!(), format_args!($($arg)+));
        }
    }};
}

#[macro_export]
macro_rules! osal_error {
    ($logger:expr, $($arg:tt)+) => { $crate::osal_log!($logger, $crate::LogLevel::Error, $($arg)+) };
}

#[macro_export]
macro_rules! osal_warn {
    ($logger:expr, $($arg:tt)+) => { $crate::osal_log!($logger, $crate::LogLevel::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! osal_info {
    ($logger:expr, $($arg:tt)+) => { $crate::osal_log!($logger, $crate::LogLevel::Info, $($arg)+) };
}

#[macro_export]
macro_rules! osal_debug {
    ($logger:expr, $($arg:tt)+) => { $crate::osal_log!($logger, $crate::LogLevel::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! osal_verbose {
    ($logger:expr, $($arg:tt)+) => { $crate::osal_log!($logger, $crate::LogLevel::Verbose, $($arg)+) };
}
