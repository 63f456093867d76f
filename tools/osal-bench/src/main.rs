///
/// osal-bench - Smoke-test driver for the OSAL primitives
///
/// Provides one command per primitive:
/// - osal-bench pool: Push N sleeping tasks through a thread pool
/// - osal-bench thread: Run a ticking thread, suspend it, resume it, stop it
/// - osal-bench timer: Run a periodic or one-shot timer for a fixed time
///
/// Defaults come from `--config osal.toml` when given; `--log-level`
/// overrides the configured level.
///

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use osal_core::{init_tracing, osal_info, Chrono, LogLevel, Logger, OsalConfig};
use osal_threads::{Thread, ThreadPool};
use osal_timers::Timer;

#[derive(Parser)]
#[command(name = "osal-bench")]
#[command(author, version, about = "Smoke tests for the OSAL primitives", long_about = None)]
struct Cli {
    /// TOML file with [log], [thread] and [pool] settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (none, error, warning, info, debug, verbose)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks through a thread pool
    Pool {
        /// Number of tasks to submit
        #[arg(long, default_value_t = 100)]
        tasks: usize,

        /// Milliseconds each task sleeps
        #[arg(long, default_value_t = 5)]
        work_ms: u64,
    },

    /// Exercise the thread lifecycle
    Thread {
        /// Milliseconds to run before suspending and again after resuming
        #[arg(long, default_value_t = 100)]
        run_ms: u64,
    },

    /// Run a timer
    Timer {
        /// Interval between fires
        #[arg(long, default_value_t = 100)]
        interval_ms: u32,

        /// How long to let the timer run
        #[arg(long, default_value_t = 1_000)]
        duration_ms: u64,

        /// Fire once instead of periodically
        #[arg(long)]
        one_shot: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match OsalConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => OsalConfig::default(),
    };

    let level = cli.log_level.unwrap_or(config.log.level);
    let logger = init_tracing(level, config.log.include_location);

    let result = match cli.command {
        Commands::Pool { tasks, work_ms } => run_pool(&config, &logger, tasks, work_ms),
        Commands::Thread { run_ms } => run_thread(&config, &logger, run_ms),
        Commands::Timer {
            interval_ms,
            duration_ms,
            one_shot,
        } => run_timer(&logger, interval_ms, duration_ms, !one_shot),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_pool(config: &OsalConfig, logger: &Logger, tasks: usize, work_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let settings = &config.pool;
    let pool = ThreadPool::with_logger(logger.clone());
    pool.start(settings.threads, settings.priority, settings.stack_size)?;
    pool.set_max_threads(settings.effective_max_threads());

    let done = Arc::new(AtomicUsize::new(0));
    let started = Chrono::now();
    for _ in 0..tasks {
        let done = Arc::clone(&done);
        pool.execute(move || {
            std::thread::sleep(Duration::from_millis(work_ms));
            done.fetch_add(1, Ordering::SeqCst);
        });
    }

    while done.load(Ordering::SeqCst) < tasks {
        Chrono::sleep_ms(1);
    }
    let elapsed = Chrono::elapsed(started, Chrono::now());
    let workers = pool.thread_count();
    pool.stop();

    println!(
        "pool: {} tasks x {} ms on {} workers in {:.3}s ({:.1} tasks/s)",
        tasks,
        work_ms,
        workers,
        elapsed,
        tasks as f64 / elapsed.max(f64::EPSILON)
    );
    Ok(())
}

fn run_thread(config: &OsalConfig, logger: &Logger, run_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);

    let mut thread = Thread::with_logger(logger.clone());
    thread.start(
        "osal-bench-ticker",
        move |ctx| {
            while ctx.checkpoint() {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.sleep(Duration::from_millis(1));
            }
        },
        config.thread.priority,
        config.thread.stack_size,
    )?;

    Chrono::sleep_ms(run_ms);
    thread.suspend();
    let before_suspend = ticks.load(Ordering::SeqCst);
    Chrono::sleep_ms(run_ms);
    let while_suspended = ticks.load(Ordering::SeqCst) - before_suspend;
    thread.resume();
    Chrono::sleep_ms(run_ms);
    thread.stop();

    osal_info!(logger, "Thread bench finished at {}", Chrono::to_string(Chrono::wall_now()));
    println!(
        "thread: {} ticks total, {} while suspended, state {:?}",
        ticks.load(Ordering::SeqCst),
        while_suspended,
        thread.state()
    );
    Ok(())
}

fn run_timer(logger: &Logger, interval_ms: u32, duration_ms: u64, periodic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let fires = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fires);

    let mut timer = Timer::with_logger(logger.clone());
    timer.start(interval_ms, periodic, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;
    Chrono::sleep_ms(duration_ms);
    let still_running = timer.is_running();
    timer.stop();

    println!(
        "timer: {} fires in {} ms ({} ms, {}), running at end: {}",
        fires.load(Ordering::SeqCst),
        duration_ms,
        interval_ms,
        if periodic { "periodic" } else { "one-shot" },
        still_running
    );
    Ok(())
}
