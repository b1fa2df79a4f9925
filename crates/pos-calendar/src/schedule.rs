//! Wall-clock schedules for the recurring jobs. Pure date arithmetic,
//! testable without sleeping.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

use crate::at_time;

/// When a job fires, and how long its distributed lock may be held.
#[derive(Debug, Clone, Copy)]
pub enum Schedule {
    /// Every day at `hour:minute` UTC.
    DailyAt {
        hour: u32,
        minute: u32,
        lock_at_most_for: StdDuration,
    },
    /// Every `weekday` at `hour:minute` UTC.
    WeeklyAt {
        weekday: Weekday,
        hour: u32,
        minute: u32,
        lock_at_most_for: StdDuration,
    },
}

impl Schedule {
    /// Daily reconciliation default: 02:00 UTC, lock held at most 30 min.
    pub fn daily_recon() -> Self {
        Schedule::DailyAt {
            hour: 2,
            minute: 0,
            lock_at_most_for: StdDuration::from_secs(30 * 60),
        }
    }

    /// Weekly archive purge default: Sunday 03:00 UTC, lock at most 60 min.
    pub fn weekly_purge() -> Self {
        Schedule::WeeklyAt {
            weekday: Weekday::Sun,
            hour: 3,
            minute: 0,
            lock_at_most_for: StdDuration::from_secs(60 * 60),
        }
    }

    pub fn lock_at_most_for(&self) -> StdDuration {
        match self {
            Schedule::DailyAt {
                lock_at_most_for, ..
            }
            | Schedule::WeeklyAt {
                lock_at_most_for, ..
            } => *lock_at_most_for,
        }
    }

    /// First firing instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::DailyAt { hour, minute, .. } => {
                let today = at_time(now.date_naive(), hour, minute);
                if today > now {
                    today
                } else {
                    at_time(now.date_naive() + Duration::days(1), hour, minute)
                }
            }
            Schedule::WeeklyAt {
                weekday,
                hour,
                minute,
                ..
            } => {
                let mut date = now.date_naive();
                for _ in 0..8 {
                    if date.weekday() == weekday {
                        let candidate = at_time(date, hour, minute);
                        if candidate > now {
                            return candidate;
                        }
                    }
                    date += Duration::days(1);
                }
                // Unreachable: a weekday recurs within 7 days.
                at_time(date, hour, minute)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn daily_fires_today_if_still_ahead() {
        let s = Schedule::daily_recon();
        assert_eq!(s.next_after(dt(2025, 2, 3, 1, 0)), dt(2025, 2, 3, 2, 0));
        assert_eq!(s.next_after(dt(2025, 2, 3, 2, 0)), dt(2025, 2, 4, 2, 0));
    }

    #[test]
    fn weekly_fires_on_requested_weekday() {
        let s = Schedule::weekly_purge();
        // 2025-02-03 is a Monday; next Sunday is 2025-02-09.
        assert_eq!(s.next_after(dt(2025, 2, 3, 12, 0)), dt(2025, 2, 9, 3, 0));
        // On Sunday before 03:00 it fires the same day.
        assert_eq!(s.next_after(dt(2025, 2, 9, 1, 0)), dt(2025, 2, 9, 3, 0));
        // At exactly 03:00 it rolls a week.
        assert_eq!(s.next_after(dt(2025, 2, 9, 3, 0)), dt(2025, 2, 16, 3, 0));
    }
}
