//! Example worker that does nothing but sleep for a configurable number of
//! seconds.

use std::time::Duration;

use clap::Arg;
use nowcast_protocol::Value;
use nowcast_worker::{ManagerHandle, NowcastWorker};
use tracing::info;

fn main() {
    let code = NowcastWorker::new("sleep", "Example worker that sleeps for a given duration.")
        .add_argument(
            Arg::new("sleep_time")
                .long("sleep-time")
                .value_parser(clap::value_parser!(u64))
                .default_value("5")
                .help("number of seconds to sleep for; defaults to 5"),
        )
        .run(sleep, success, failure);
    std::process::exit(code);
}

fn sleep(
    matches: &clap::ArgMatches,
    _config: &nowcast_protocol::Config,
    _manager: &mut ManagerHandle,
) -> Result<Value, nowcast_worker::WorkerError> {
    let sleep_time: u64 = *matches.get_one("sleep_time").expect("has a default");
    ManagerHandle::sleep(Duration::from_secs(sleep_time));

    let mut checklist = std::collections::BTreeMap::new();
    checklist.insert("sleep time".to_string(), Value::Int(sleep_time as i64));
    Ok(Value::Mapping(checklist))
}

fn success(matches: &clap::ArgMatches) -> String {
    let sleep_time: &u64 = matches.get_one("sleep_time").expect("has a default");
    info!(sleep_time, "slept");
    "success".to_string()
}

fn failure(matches: &clap::ArgMatches) -> String {
    let sleep_time: &u64 = matches.get_one("sleep_time").expect("has a default");
    tracing::error!(sleep_time, "failed to sleep");
    "failure".to_string()
}
