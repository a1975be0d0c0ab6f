use chrono::{Days, FixedOffset, LocalResult, NaiveDate, Offset, TimeZone, Utc};
use serde::Serialize;

const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;

/// Half-open calendar-day interval `[start, end)` in epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DayWindow {
    pub start: i64,
    pub end: i64,
}

impl DayWindow {
    /// The local calendar day `day_offset` days away from the day containing `now`.
    ///
    /// Boundaries are local midnights, so a DST transition day is 23 or 25 hours long.
    pub fn local<Tz: TimeZone>(now: i64, day_offset: i64, tz: &Tz) -> Self {
        let today = tz
            .timestamp_millis_opt(now)
            .earliest()
            .map(|t| t.date_naive())
            .unwrap_or_default();
        let day = shift_date(today, day_offset);
        let next = shift_date(day, 1);
        Self {
            start: midnight_millis(day, tz),
            end: midnight_millis(next, tz),
        }
    }

    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && time < self.end
    }

    /// Same window with the end pulled back to `now` when `now` falls before it.
    pub fn capped_at(self, now: i64) -> Self {
        Self {
            start: self.start,
            end: self.end.min(now).max(self.start),
        }
    }
}

fn shift_date(date: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

fn midnight_millis<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> i64 {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        // Midnight skipped by a DST jump: the day starts at the first instant after the gap.
        LocalResult::None => (1..=4)
            .find_map(|h| {
                tz.from_local_datetime(&(midnight + chrono::Duration::hours(h)))
                    .earliest()
            })
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|| midnight.and_utc().timestamp_millis()),
    }
}

pub fn normalize_tz_offset_minutes(v: i32) -> i32 {
    v.clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

pub fn tz_offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(normalize_tz_offset_minutes(minutes).saturating_mul(60))
        .unwrap_or_else(|| Utc.fix())
}
