//! Requests that the manager clear its system state checklist. Normally
//! launched at the end of a nowcast processing cycle, just before
//! `rotate_logs`. Grounded in
//! `original_source/nemo_nowcast/workers/clear_checklist.py`.

use nowcast_protocol::Value;
use nowcast_worker::{ManagerHandle, NowcastWorker};
use tracing::info;

fn main() {
    let code = NowcastWorker::new(
        "clear_checklist",
        "Send a message to the manager requesting that it clear its checklist.",
    )
    .run(clear_checklist, success, failure);
    std::process::exit(code);
}

fn clear_checklist(
    _matches: &clap::ArgMatches,
    _config: &nowcast_protocol::Config,
    manager: &mut ManagerHandle,
) -> Result<Value, nowcast_worker::WorkerError> {
    info!("requesting that manager clear system state checklist");
    manager.tell_manager("clear checklist", Value::Null)?;
    // No checklist entry to return -- we just cleared it.
    Ok(Value::Null)
}

fn success(_matches: &clap::ArgMatches) -> String {
    info!("nowcast system checklist cleared");
    "success".to_string()
}

fn failure(_matches: &clap::ArgMatches) -> String {
    tracing::error!("failed to clear nowcast system checklist");
    "failure".to_string()
}
