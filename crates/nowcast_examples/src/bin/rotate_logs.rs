//! Forces an immediate rotation of the nowcast system's log file. Grounded
//! in `original_source/nemo_nowcast/workers/rotate_logs.py`.

use nowcast_protocol::Value;
use nowcast_worker::{ManagerHandle, NowcastWorker};
use tracing::info;

fn main() {
    let code = NowcastWorker::new("rotate_logs", "Rotate the nowcast system's log files.")
        .run(rotate_logs, success, failure);
    std::process::exit(code);
}

fn rotate_logs(
    _matches: &clap::ArgMatches,
    config: &nowcast_protocol::Config,
    _manager: &mut ManagerHandle,
) -> Result<Value, nowcast_worker::WorkerError> {
    info!("rotating log files");
    let rotated = nowcast_logging::force_rotate(
        &config.logging.directory,
        &config.logging.base_name,
        config.logging.max_files,
    )
    .map_err(|e| nowcast_worker::WorkerError::Declared(format!("failed to rotate logs: {e}")))?;
    info!(path = %rotated.display(), "log file rotated");
    Ok(Value::List(vec![Value::String(
        rotated.display().to_string(),
    )]))
}

fn success(_matches: &clap::ArgMatches) -> String {
    info!("log files rotated");
    "success".to_string()
}

fn failure(_matches: &clap::ArgMatches) -> String {
    tracing::error!("failed to rotate log files");
    "failure".to_string()
}
