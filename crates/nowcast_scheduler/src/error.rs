use thiserror::Error;

/// Errors preparing the `scheduled workers` section into runnable jobs.
/// Unlike the reference implementation (which silently ignores a missing or
/// empty section, per `scheduler.py`'s `_prep_schedule`), a malformed entry
/// for a unit/time that IS present is a configuration error worth surfacing.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unrecognized schedule unit {0:?} (want day, hour, or a weekday name)")]
    UnknownUnit(String),

    #[error("malformed time-of-day {0:?}, want HH:MM")]
    BadTime(String),
}
