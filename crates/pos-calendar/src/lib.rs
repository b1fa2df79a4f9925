//! Business-day calendar and cluster-singleton job scheduling.
//!
//! # Design
//!
//! [`HolidayCalendar`] answers the single question the EOD engine asks:
//! is this date a business day. Weekend logic is fixed (Saturday/Sunday);
//! the holiday set is injected at startup and swapped atomically by a
//! daily refresh task.
//!
//! [`spawn_job`] runs a recurring job on a [`Schedule`], guarded by a
//! [`SchedulerLock`] so the job runs at most once across any number of
//! instances. The Postgres-backed lock lives in `pos-store`; tests use an
//! in-memory one.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use tracing::{info, warn};

pub mod schedule;

pub use schedule::Schedule;

// ---------------------------------------------------------------------------
// HolidayCalendar
// ---------------------------------------------------------------------------

/// Weekday + holiday-set business-day gate.
///
/// The holiday set is behind an `RwLock` so the refresh task can swap it
/// without stalling readers.
pub struct HolidayCalendar {
    holidays: RwLock<HashSet<NaiveDate>>,
}

impl HolidayCalendar {
    pub fn new(holidays: HashSet<NaiveDate>) -> Self {
        HolidayCalendar {
            holidays: RwLock::new(holidays),
        }
    }

    /// An empty holiday set: every weekday is a business day.
    pub fn weekdays_only() -> Self {
        Self::new(HashSet::new())
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self
            .holidays
            .read()
            .expect("holiday set lock poisoned")
            .contains(&date)
    }

    /// Most recent business day strictly before `date`.
    pub fn previous_business_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date - Duration::days(1);
        while !self.is_business_day(d) {
            d -= Duration::days(1);
        }
        d
    }

    /// Swap in a freshly loaded holiday set.
    pub fn replace_holidays(&self, holidays: HashSet<NaiveDate>) {
        let mut guard = self.holidays.write().expect("holiday set lock poisoned");
        *guard = holidays;
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays
            .read()
            .expect("holiday set lock poisoned")
            .len()
    }
}

// ---------------------------------------------------------------------------
// Distributed lock port
// ---------------------------------------------------------------------------

/// Cluster-wide job lock. `try_acquire` returns `true` when this instance
/// won the lock for `at_most_for`; a lock that is never released protects
/// against a crashed holder via the expiry.
#[async_trait::async_trait]
pub trait SchedulerLock: Send + Sync {
    async fn try_acquire(&self, name: &str, at_most_for: StdDuration) -> bool;
}

// ---------------------------------------------------------------------------
// Job runner
// ---------------------------------------------------------------------------

/// Spawn a recurring job on `schedule`, guarded by `lock`.
///
/// The job closure is invoked only on the instance that wins the lock for
/// that firing. Job panics are contained by the task boundary; errors are
/// logged and the loop continues.
pub fn spawn_job<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    lock: std::sync::Arc<dyn SchedulerLock>,
    job: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::time::sleep(wait).await;

            if !lock.try_acquire(name, schedule.lock_at_most_for()).await {
                continue;
            }
            info!(job = name, "scheduled job firing");
            if let Err(e) = job().await {
                warn!(job = name, error = %e, "scheduled job failed");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers shared with the schedule module
// ---------------------------------------------------------------------------

pub(crate) fn at_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let t = NaiveTime::from_hms_opt(hour, minute, 0).expect("valid schedule time");
    date.and_time(t).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_not_business_days() {
        let cal = HolidayCalendar::weekdays_only();
        assert!(cal.is_business_day(d(2025, 2, 3))); // Monday
        assert!(!cal.is_business_day(d(2025, 2, 1))); // Saturday
        assert!(!cal.is_business_day(d(2025, 2, 2))); // Sunday
    }

    #[test]
    fn holidays_gate_and_refresh() {
        let cal = HolidayCalendar::weekdays_only();
        let christmas = d(2025, 12, 25); // Thursday
        assert!(cal.is_business_day(christmas));

        cal.replace_holidays(HashSet::from([christmas]));
        assert!(!cal.is_business_day(christmas));
        assert_eq!(cal.holiday_count(), 1);
    }

    #[test]
    fn previous_business_day_skips_weekend_and_holiday() {
        let cal = HolidayCalendar::weekdays_only();
        // Monday 2025-02-03 → Friday 2025-01-31
        assert_eq!(cal.previous_business_day(d(2025, 2, 3)), d(2025, 1, 31));

        cal.replace_holidays(HashSet::from([d(2025, 1, 31)]));
        assert_eq!(cal.previous_business_day(d(2025, 2, 3)), d(2025, 1, 30));
    }
}
