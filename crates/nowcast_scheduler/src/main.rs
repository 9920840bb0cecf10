//! The scheduler daemon entry point: load configuration, start logging,
//! build the job list from `scheduled workers`, and tick once a minute,
//! launching whatever jobs are due. Reloads the job list from scratch on
//! SIGHUP; exits on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use nowcast_logging::{init_logging, LogConfig};
use nowcast_protocol::Config;
use nowcast_scheduler::{next_worker_for, prep_schedule};
use nowcast_worker::launch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nowcast-scheduler", about = "Wall-clock worker launch scheduler")]
struct Args {
    /// Path to the YAML configuration file.
    config_file: PathBuf,
}

const STATE_RUNNING: u8 = 0;
const STATE_RELOAD: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// How often the tick loop wakes to check for due jobs. Matches the
/// reference's hard-coded 60-second `sleep_seconds`; missed ticks are never
/// caught up, only rescheduled from the time they're next observed.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config_file).context("failed to load configuration")?;

    init_logging(LogConfig {
        app_name: "nowcast-scheduler",
        directory: PathBuf::from(&config.logging.directory),
        base_name: &config.logging.base_name,
        max_file_size: config.logging.max_file_size,
        max_files: config.logging.max_files,
        console_level: &config.logging.console_level,
        debug_mode: false,
    })
    .context("failed to initialize logging")?;

    info!(
        pid = std::process::id(),
        config_file = %args.config_file.display(),
        "scheduler running"
    );

    let state = Arc::new(AtomicU8::new(STATE_RUNNING));
    install_signal_handlers(Arc::clone(&state))?;

    loop {
        let mut jobs = prep_schedule(&config, Local::now());
        info!(job_count = jobs.len(), "schedule prepared");

        state.store(STATE_RUNNING, Ordering::SeqCst);
        run_tick_loop(&mut jobs, &config, Arc::clone(&state));

        match state.load(Ordering::SeqCst) {
            STATE_RELOAD => {
                info!("SIGHUP received, reloading configuration");
                config = config.reload().context("failed to reload configuration")?;
                continue;
            }
            _ => {
                info!("scheduler shutting down");
                return Ok(());
            }
        }
    }
}

/// Sleep in short slices so a signal can interrupt within roughly one
/// second, waking every `TICK_INTERVAL` to launch whatever jobs are due.
fn run_tick_loop(jobs: &mut [nowcast_scheduler::Job], config: &Config, state: Arc<AtomicU8>) {
    const POLL_SLICE: Duration = Duration::from_millis(500);
    let mut elapsed = TICK_INTERVAL;

    loop {
        if state.load(Ordering::SeqCst) != STATE_RUNNING {
            return;
        }

        if elapsed >= TICK_INTERVAL {
            let now = Local::now();
            for job in jobs.iter_mut() {
                if job.is_due(now) {
                    let next = next_worker_for(job);
                    launch(&next, config, "scheduler");
                    job.reschedule(now);
                }
            }
            elapsed = Duration::ZERO;
        }

        std::thread::sleep(POLL_SLICE);
        elapsed += POLL_SLICE;
    }
}

#[cfg(unix)]
fn install_signal_handlers(state: Arc<AtomicU8>) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGHUP => state.store(STATE_RELOAD, Ordering::SeqCst),
                SIGINT | SIGTERM => {
                    state.store(STATE_SHUTDOWN, Ordering::SeqCst);
                    break;
                }
                _ => {}
            }
        }
    });
    Ok(())
}

#[cfg(windows)]
fn install_signal_handlers(state: Arc<AtomicU8>) -> Result<()> {
    ctrlc::set_handler(move || {
        state.store(STATE_SHUTDOWN, Ordering::SeqCst);
    })?;
    Ok(())
}
