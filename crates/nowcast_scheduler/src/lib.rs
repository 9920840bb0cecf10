//! The wall-clock worker-launch scheduler. See `schedule.rs` for the
//! `every <unit> at <HH:MM>` computation this daemon's tick loop drives.

pub mod error;
pub mod schedule;

pub use error::ScheduleError;
pub use schedule::{Job, Unit};

use nowcast_protocol::{Config, NextWorker};
use tracing::warn;

/// Build the job list from a config's `scheduled workers` section. Unlike
/// the reference's `_prep_schedule`, a malformed unit or time is not
/// silently swallowed -- it's logged and that one entry is skipped, since an
/// empty section (the common case the reference guards against) is a
/// perfectly ordinary configuration and should not itself warn.
pub fn prep_schedule(config: &Config, now: chrono::DateTime<chrono::Local>) -> Vec<Job> {
    let mut jobs = Vec::new();
    for entry in &config.scheduled_workers {
        let unit = match Unit::parse(&entry.every) {
            Ok(u) => u,
            Err(e) => {
                warn!(worker = %entry.module, error = %e, "skipping malformed scheduled worker entry");
                continue;
            }
        };
        let at = match schedule::parse_at(&entry.at) {
            Ok(t) => t,
            Err(e) => {
                warn!(worker = %entry.module, error = %e, "skipping malformed scheduled worker entry");
                continue;
            }
        };
        let args = entry
            .cmd_line_opts
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        jobs.push(Job::new(entry.module.clone(), unit, at, args, now));
    }
    jobs
}

/// The [`NextWorker`] a due job launches, built fresh each time so the args
/// are never consumed.
pub fn next_worker_for(job: &Job) -> NextWorker {
    NextWorker::new(job.worker_module.clone()).with_args(job.args.clone())
}
