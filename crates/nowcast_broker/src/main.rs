//! The broker: a stateless fan-in router between many workers and one
//! manager. Binds a ROUTER socket on the workers endpoint and a DEALER
//! socket on the manager endpoint, then forwards every frame verbatim in
//! both directions via `zmq::proxy_steerable`, which preserves per-connection
//! request/reply pairing the same way the reference implementation's
//! `zmq.device(zmq.QUEUE, workers_socket, manager_socket)` does.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nowcast_logging::{init_logging, LogConfig};
use nowcast_protocol::Config;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "nowcast-broker", about = "Request/reply router between workers and the manager")]
struct Args {
    /// Path to the YAML configuration file.
    config_file: PathBuf,
}

const STATE_RUNNING: u8 = 0;
const STATE_RELOAD: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config_file).context("failed to load configuration")?;

    init_logging(LogConfig {
        app_name: "nowcast-broker",
        directory: PathBuf::from(&config.logging.directory),
        base_name: &config.logging.base_name,
        max_file_size: config.logging.max_file_size,
        max_files: config.logging.max_files,
        console_level: &config.logging.console_level,
        debug_mode: false,
    })
    .context("failed to initialize logging")?;

    let state = Arc::new(AtomicU8::new(STATE_RUNNING));
    install_signal_handlers(Arc::clone(&state))?;

    loop {
        info!(
            workers_port = config.zmq.ports.workers,
            manager_port = config.zmq.ports.manager,
            "broker binding sockets"
        );

        state.store(STATE_RUNNING, Ordering::SeqCst);
        match run_proxy(&config, Arc::clone(&state)) {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "broker transport error, exiting");
                return Err(e);
            }
        }

        match state.load(Ordering::SeqCst) {
            STATE_RELOAD => {
                info!("SIGHUP received, reloading configuration");
                config = config.reload().context("failed to reload configuration")?;
                continue;
            }
            _ => {
                info!("broker shutting down");
                return Ok(());
            }
        }
    }
}

/// Binds the two endpoints and runs the steerable proxy until a control
/// command (from a signal handler) terminates it.
fn run_proxy(config: &Config, state: Arc<AtomicU8>) -> Result<()> {
    let ctx = zmq::Context::new();

    let workers_socket = ctx.socket(zmq::ROUTER)?;
    workers_socket
        .bind(&format!("tcp://*:{}", config.zmq.ports.workers))
        .context("failed to bind workers endpoint")?;

    let manager_socket = ctx.socket(zmq::DEALER)?;
    manager_socket
        .bind(&format!("tcp://*:{}", config.zmq.ports.manager))
        .context("failed to bind manager endpoint")?;

    let control_endpoint = format!("inproc://broker-control-{}", std::process::id());
    let control_in = ctx.socket(zmq::PAIR)?;
    control_in.bind(&control_endpoint)?;

    let control_out = ctx.socket(zmq::PAIR)?;
    control_out.connect(&control_endpoint)?;

    let watcher = std::thread::spawn(move || {
        loop {
            std::thread::sleep(std::time::Duration::from_millis(200));
            match state.load(Ordering::SeqCst) {
                STATE_RUNNING => continue,
                _ => {
                    let _ = control_out.send("TERMINATE", 0);
                    return;
                }
            }
        }
    });

    let result = zmq::proxy_steerable(&workers_socket, &manager_socket, &control_in);

    let _ = watcher.join();

    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("zmq proxy failed: {e}")),
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
