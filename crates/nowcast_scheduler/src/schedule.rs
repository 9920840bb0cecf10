//! Wall-clock schedule computation: "every `<unit>` at `<HH:MM>`" semantics
//! computed directly on top of `chrono`.

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Timelike, Weekday};

use crate::error::ScheduleError;

/// The recurrence unit a `scheduled workers` entry's `every` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Day,
    Hour,
    Weekday(Weekday),
}

impl Unit {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "day" => Unit::Day,
            "hour" => Unit::Hour,
            "monday" => Unit::Weekday(Weekday::Mon),
            "tuesday" => Unit::Weekday(Weekday::Tue),
            "wednesday" => Unit::Weekday(Weekday::Wed),
            "thursday" => Unit::Weekday(Weekday::Thu),
            "friday" => Unit::Weekday(Weekday::Fri),
            "saturday" => Unit::Weekday(Weekday::Sat),
            "sunday" => Unit::Weekday(Weekday::Sun),
            other => return Err(ScheduleError::UnknownUnit(other.to_string())),
        })
    }
}

/// A runnable job: the worker to launch plus its next scheduled fire time.
/// Recomputed (not accumulated) on every fire, so there is no catch-up of
/// missed ticks -- a job whose fire time was missed while the scheduler
/// wasn't running simply reschedules from `now` on the next tick.
pub struct Job {
    pub worker_module: String,
    pub unit: Unit,
    pub at: NaiveTime,
    pub next_fire: DateTime<Local>,
    pub args: Vec<String>,
}

impl Job {
    pub fn new(
        worker_module: String,
        unit: Unit,
        at: NaiveTime,
        args: Vec<String>,
        now: DateTime<Local>,
    ) -> Self {
        let next_fire = next_fire_after(unit, at, now);
        Self {
            worker_module,
            unit,
            at,
            next_fire,
            args,
        }
    }

    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        self.next_fire <= now
    }

    /// Recompute `next_fire` strictly after `now`, discarding however many
    /// ticks were missed.
    pub fn reschedule(&mut self, now: DateTime<Local>) {
        self.next_fire = next_fire_after(self.unit, self.at, now);
    }
}

/// Parse `"HH:MM"` into a bare time-of-day. For the `hour` unit, only the
/// minute component is meaningful (matching the `schedule` package's
/// `:MM`-style `at()` argument for hourly jobs); callers pass the same
/// `HH:MM` string in either case and this function only ever looks at the
/// minute field for `Unit::Hour`.
pub fn parse_at(at: &str) -> Result<NaiveTime, ScheduleError> {
    let trimmed = at.trim_start_matches(':');
    let parts: Vec<&str> = if at.starts_with(':') {
        vec!["0", trimmed]
    } else {
        trimmed.splitn(2, ':').collect()
    };
    let (h, m) = match parts.as_slice() {
        [h, m] => (*h, *m),
        _ => return Err(ScheduleError::BadTime(at.to_string())),
    };
    let hour: u32 = h.parse().map_err(|_| ScheduleError::BadTime(at.to_string()))?;
    let minute: u32 = m.parse().map_err(|_| ScheduleError::BadTime(at.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| ScheduleError::BadTime(at.to_string()))
}

fn next_fire_after(unit: Unit, at: NaiveTime, now: DateTime<Local>) -> DateTime<Local> {
    match unit {
        Unit::Day => {
            let candidate = today_at(now, at);
            if candidate <= now {
                candidate + Duration::days(1)
            } else {
                candidate
            }
        }
        Unit::Weekday(target) => {
            let mut candidate = today_at(now, at);
            let mut days_ahead = days_until(now.weekday(), target);
            if days_ahead == 0 && candidate <= now {
                days_ahead = 7;
            }
            candidate = candidate + Duration::days(days_ahead as i64);
            candidate
        }
        Unit::Hour => {
            let candidate = now
                .with_minute(at.minute())
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(now);
            if candidate <= now {
                candidate + Duration::hours(1)
            } else {
                candidate
            }
        }
    }
}

fn today_at(now: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let naive = now.date_naive().and_time(at);
    Local
        .from_local_datetime(&naive)
        .single()
        .unwrap_or(now)
}

fn days_until(from: Weekday, to: Weekday) -> u32 {
    (7 + to.num_days_from_monday() as i64 - from.num_days_from_monday() as i64) as u32 % 7
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, mo, d)
                    .unwrap()
                    .and_hms_opt(h, mi, 0)
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn parses_hh_mm() {
        let t = parse_at("13:15").unwrap();
        assert_eq!(t.hour(), 13);
        assert_eq!(t.minute(), 15);
    }

    #[test]
    fn day_unit_fires_today_if_not_yet_passed() {
        let now = at(2026, 7, 28, 10, 0);
        let next = next_fire_after(Unit::Day, NaiveTime::from_hms_opt(13, 0, 0).unwrap(), now);
        assert_eq!(next.date_naive(), now.date_naive());
        assert_eq!(next.hour(), 13);
    }

    #[test]
    fn day_unit_rolls_to_tomorrow_if_passed() {
        let now = at(2026, 7, 28, 14, 0);
        let next = next_fire_after(Unit::Day, NaiveTime::from_hms_opt(13, 0, 0).unwrap(), now);
        assert_eq!(next.date_naive(), now.date_naive() + Duration::days(1));
    }

    #[test]
    fn weekday_unit_finds_next_occurrence() {
        // 2026-07-28 is a Tuesday.
        let now = at(2026, 7, 28, 10, 0);
        let next = next_fire_after(
            Unit::Weekday(Weekday::Fri),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            now,
        );
        assert_eq!(next.weekday(), Weekday::Fri);
        assert!(next > now);
    }

    #[test]
    fn hour_unit_fires_at_next_minute_boundary() {
        let now = at(2026, 7, 28, 10, 40);
        let next = next_fire_after(Unit::Hour, NaiveTime::from_hms_opt(0, 15, 0).unwrap(), now);
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn job_is_due_and_reschedules_without_catchup() {
        // Job created the day before its 09:00 fire time, so `next_fire` is
        // already in the past by the time `now` rolls around the next day.
        let created = at(2026, 7, 27, 9, 0);
        let mut job = Job::new(
            "sleep".to_string(),
            Unit::Day,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Vec::new(),
            created,
        );
        let now = at(2026, 7, 28, 10, 0);
        assert!(job.is_due(now));
        // Ticking far past several missed days only advances once, to the
        // next occurrence after `now` -- no backlog of runs.
        let later = now + Duration::days(5);
        job.reschedule(later);
        assert_eq!(job.next_fire.date_naive(), later.date_naive() + Duration::days(1));
    }
}
