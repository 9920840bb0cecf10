//! Example worker that does nothing but report success, to demonstrate a
//! worker launched after `sleep` finishes.

use nowcast_protocol::Value;
use nowcast_worker::{ManagerHandle, NowcastWorker};
use tracing::info;

fn main() {
    let code = NowcastWorker::new(
        "awaken",
        "Example worker that does nothing but send messages to the manager.",
    )
    .run(awaken, success, failure);
    std::process::exit(code);
}

fn awaken(
    _matches: &clap::ArgMatches,
    _config: &nowcast_protocol::Config,
    _manager: &mut ManagerHandle,
) -> Result<Value, nowcast_worker::WorkerError> {
    let mut checklist = std::collections::BTreeMap::new();
    checklist.insert("awoke".to_string(), Value::Bool(true));
    Ok(Value::Mapping(checklist))
}

fn success(_matches: &clap::ArgMatches) -> String {
    info!("awoke");
    "success".to_string()
}

fn failure(_matches: &clap::ArgMatches) -> String {
    tracing::error!("failed to awaken");
    "failure".to_string()
}
