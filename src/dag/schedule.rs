use chrono::{DateTime, Days, NaiveTime, Timelike, Utc};
use std::time::Duration;

/// Fires once per day at a fixed UTC time of day.
///
/// Runs are driven strictly one after another, so a run that overruns its
/// slot delays the next one instead of overlapping it. Missed days are not
/// backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn at(at: NaiveTime) -> Self {
        DailySchedule { at }
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.at
    }

    /// Cron-style expression for display.
    pub fn expression(&self) -> String {
        if self.at == NaiveTime::MIN {
            "@daily".to_string()
        } else {
            format!("{} {} * * *", self.at.minute(), self.at.hour())
        }
    }

    /// Returns the first firing time strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            now.date_naive()
                .checked_add_days(Days::new(1))
                .map(|date| date.and_time(self.at).and_utc())
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
    }

    /// Wall-clock wait from `now` until the next firing.
    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_run_after(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for DailySchedule {
    /// Midnight UTC.
    fn default() -> Self {
        DailySchedule { at: NaiveTime::MIN }
    }
}
