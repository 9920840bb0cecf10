//! The worker runtime harness: the library every worker binary links
//! against. `init_cli` / `add_argument` / `run` / `tell_manager` give
//! downstream workers a way to append their own CLI options before `run`
//! is called.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgMatches, Command};
use nowcast_protocol::{Config, Message, Value};
use tracing::{error, info, warn};

use crate::error::WorkerError;

/// Manager reply timeout, so a wedged manager can't hang a worker forever.
const MANAGER_REPLY_TIMEOUT_MS: i32 = 30_000;

/// TCP keepalive idle time on the worker's request socket, long enough to
/// survive long-running computations between messages.
const KEEPALIVE_IDLE_SECS: i32 = 900;

/// Outcome of a worker function's execution, used internally to decide
/// which of `success_fn`/`failure_fn` to invoke and whether to message the
/// manager at all.
pub enum Outcome {
    Success(Value),
    Failure,
    Terminated,
    Crash(String),
}

/// The harness a worker program builds around its business logic.
pub struct NowcastWorker {
    name: String,
    command: Command,
}

impl NowcastWorker {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let command = Command::new(name.clone())
            .about(description.into())
            .arg(
                Arg::new("config_file")
                    .required(true)
                    .value_name("CONFIG_FILE")
                    .help("path to the YAML configuration file"),
            )
            .arg(
                Arg::new("debug")
                    .long("debug")
                    .action(clap::ArgAction::SetTrue)
                    .help("suppress manager communication and log to console only"),
            );
        Self { name, command }
    }

    /// Append a worker-specific CLI option before calling [`Self::run`].
    pub fn add_argument(mut self, arg: Arg) -> Self {
        self.command = self.command.arg(arg);
        self
    }

    /// Parse CLI, load config, configure logging, install signal handlers,
    /// connect to the broker (unless `--debug`), run `worker_func`, and
    /// report the outcome to the manager. Returns the process exit code.
    pub fn run<F, S, Fl>(self, worker_func: F, success_fn: S, failure_fn: Fl) -> i32
    where
        F: FnOnce(&ArgMatches, &Config, &mut ManagerHandle) -> Result<Value, WorkerError>,
        S: FnOnce(&ArgMatches) -> String,
        Fl: FnOnce(&ArgMatches) -> String,
    {
        let matches = self.command.get_matches();
        let config_file: &String = matches.get_one("config_file").expect("required arg");
        let debug = matches.get_flag("debug");

        let config = match Config::load(config_file) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("fatal: failed to load configuration: {e}");
                return 1;
            }
        };

        if let Err(e) = configure_logging(&self.name, &config, debug) {
            eprintln!("fatal: failed to configure logging: {e}");
            return 1;
        }

        let terminated = Arc::new(AtomicBool::new(false));
        if let Err(e) = install_signal_handlers(Arc::clone(&terminated)) {
            error!(error = %e, "failed to install signal handlers");
            return 1;
        }

        let mut handle = match ManagerHandle::connect(&self.name, &config, debug) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to connect to broker");
                return 1;
            }
        };

        let outcome = match worker_func(&matches, &config, &mut handle) {
            _ if terminated.load(Ordering::SeqCst) => Outcome::Terminated,
            Ok(delta) => Outcome::Success(delta),
            Err(WorkerError::Declared(_)) => Outcome::Failure,
            Err(e) => Outcome::Crash(e.to_string()),
        };

        match outcome {
            Outcome::Terminated => {
                info!("terminated by signal, not messaging manager");
            }
            Outcome::Success(delta) => {
                let msg_type = success_fn(&matches);
                if let Err(e) = handle.tell_manager(&msg_type, delta) {
                    error!(error = %e, "failed to report success to manager");
                }
            }
            Outcome::Failure => {
                let msg_type = failure_fn(&matches);
                if let Err(e) = handle.tell_manager(&msg_type, Value::Null) {
                    error!(error = %e, "failed to report failure to manager");
                }
            }
            Outcome::Crash(detail) => {
                error!(error = %detail, "unhandled worker error");
                if let Err(e) = handle.tell_manager("crash", Value::Null) {
                    error!(error = %e, "failed to report crash to manager");
                }
            }
        }

        0
    }
}

fn configure_logging(name: &str, config: &Config, debug: bool) -> anyhow::Result<()> {
    nowcast_logging::init_logging(nowcast_logging::LogConfig {
        app_name: name,
        directory: PathBuf::from(&config.logging.directory),
        base_name: &config.logging.base_name,
        max_file_size: config.logging.max_file_size,
        max_files: config.logging.max_files,
        console_level: if debug {
            "debug"
        } else {
            &config.logging.console_level
        },
        debug_mode: debug,
    })
}

#[cfg(unix)]
fn install_signal_handlers(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            flag.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}

#[cfg(windows)]
fn install_signal_handlers(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(())
}

/// Owns the worker's connection to the manager (via the broker) and
/// enforces the `tell_manager` contract: registry gate, `--debug`
/// short-circuit, synchronous request/reply, reply-type validation.
pub struct ManagerHandle {
    name: String,
    config: Config,
    debug: bool,
    socket: Option<zmq::Socket>,
}

impl ManagerHandle {
    fn connect(name: &str, config: &Config, debug: bool) -> anyhow::Result<Self> {
        let socket = if debug {
            None
        } else {
            let ctx = zmq::Context::new();
            let socket = ctx.socket(zmq::REQ)?;
            socket.set_rcvtimeo(MANAGER_REPLY_TIMEOUT_MS)?;
            socket.set_tcp_keepalive(1)?;
            socket.set_tcp_keepalive_idle(KEEPALIVE_IDLE_SECS)?;
            socket.connect(&format!(
                "tcp://{}:{}",
                config.zmq.host, config.zmq.ports.workers
            ))?;
            Some(socket)
        };
        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            debug,
            socket,
        })
    }

    /// Send `msg_type`/`payload` to the manager, block on the reply,
    /// validate it, and return it.
    pub fn tell_manager(
        &mut self,
        msg_type: &str,
        payload: Value,
    ) -> Result<Message, WorkerError> {
        let entry = self
            .config
            .message_registry
            .worker(&self.name)
            .ok_or_else(|| WorkerError::UnregisteredWorker(self.name.clone()))?;
        if !entry.declares(msg_type) {
            return Err(WorkerError::UnregisteredMessageType(
                msg_type.to_string(),
                self.name.clone(),
            ));
        }

        if self.debug {
            warn!(msg_type, "debug mode: not sending to manager");
            return Ok(Message::manager_reply("ack", Value::Null));
        }

        let msg = Message::new(self.name.clone(), msg_type, payload);
        let text = msg.serialize()?;

        let socket = self
            .socket
            .as_ref()
            .expect("socket present when not --debug");
        socket.send(text.as_bytes(), 0)?;

        let reply_bytes = socket.recv_bytes(0).map_err(|e| {
            if e == zmq::Error::EAGAIN {
                WorkerError::Timeout
            } else {
                WorkerError::Transport(e)
            }
        })?;
        let reply_text = String::from_utf8_lossy(&reply_bytes);
        let reply = Message::deserialize(&reply_text)?;

        if reply.source != "manager"
            || !self
                .config
                .message_registry
                .manager
                .contains_key(&reply.msg_type)
        {
            return Err(WorkerError::UnrecognizedReply(reply.msg_type));
        }

        Ok(reply)
    }

    /// Sleep point used by long-running worker functions that want to poll
    /// for a shutdown signal between steps, rather than a hard requirement
    /// of the harness.
    pub fn sleep(duration: Duration) {
        std::thread::sleep(duration);
    }
}
