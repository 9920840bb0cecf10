//! The manager daemon entry point: parse CLI, load configuration, start
//! logging, connect to the broker, and run the message loop. Reloads on
//! SIGHUP by re-entering setup (a fresh [`nowcast_manager::NowcastManager`]
//! is built, but the checklist is re-read from the same disk file it was
//! last written to, so no state is lost); exits cleanly on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nowcast_logging::{init_logging, LogConfig};
use nowcast_manager::NowcastManager;
use nowcast_protocol::Config;
use nowcast_worker::launch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "nowcast-manager",
    about = "Message-driven dispatch engine for the orchestration framework"
)]
struct Args {
    /// Path to the YAML configuration file.
    config_file: PathBuf,

    /// Don't load the serialized checklist left by a previously running
    /// manager instance; start with an empty checklist instead.
    #[arg(long)]
    ignore_checklist: bool,
}

const STATE_RUNNING: u8 = 0;
const STATE_RELOAD: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// How long the manager's reply socket blocks per `recv` attempt before
/// re-checking the shutdown/reload flag. Not a protocol timeout -- just
/// the loop's responsiveness to signals.
const POLL_INTERVAL_MS: i32 = 500;

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config_file).context("failed to load configuration")?;

    init_logging(LogConfig {
        app_name: "nowcast-manager",
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
        "manager running"
    );

    let state = Arc::new(AtomicU8::new(STATE_RUNNING));
    install_signal_handlers(Arc::clone(&state))?;

    loop {
        let mut manager = NowcastManager::setup(config.clone(), args.ignore_checklist)
            .context("manager setup failed, exiting")?;
        info!(
            module = %config.message_registry.next_workers_module,
            "dispatch module loaded"
        );

        state.store(STATE_RUNNING, Ordering::SeqCst);
        match run_message_loop(&mut manager, &config, Arc::clone(&state)) {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "manager transport error, shutting down");
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
                info!("manager shutting down");
                return Ok(());
            }
        }
    }
}

/// Connect to the broker's manager endpoint and process messages to
/// completion one at a time until a signal flips `state` away from
/// `STATE_RUNNING`.
fn run_message_loop(
    manager: &mut NowcastManager,
    config: &Config,
    state: Arc<AtomicU8>,
) -> Result<()> {
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::REP)?;
    socket.set_rcvtimeo(POLL_INTERVAL_MS)?;
    socket.connect(&format!(
        "tcp://{}:{}",
        config.zmq.host, config.zmq.ports.manager
    ))?;
    info!(
        host = %config.zmq.host,
        port = config.zmq.ports.manager,
        "connected to broker"
    );

    loop {
        if state.load(Ordering::SeqCst) != STATE_RUNNING {
            return Ok(());
        }

        let raw = match socket.recv_string(0) {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => {
                error!("received a non-UTF8 message, ignoring");
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => return Err(anyhow::anyhow!("zmq error on manager socket: {e}")),
        };

        let (reply, next_workers) = manager.handle_raw_message(&raw);
        socket.send(reply.as_bytes(), 0)?;

        for worker in &next_workers {
            launch(worker, config, "manager");
        }
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
