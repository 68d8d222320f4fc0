use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::models::Timeframe;

/// Calendar unit a timestamp can be truncated to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    /// Weeks start on Monday
    Week,
    Month,
}

/// Start of the minute/hour/day/week/month containing `timestamp`
pub fn truncate(timestamp: DateTime<Utc>, unit: CalendarUnit) -> DateTime<Utc> {
    match unit {
        CalendarUnit::Minute => Timeframe::MINUTE.window_start(timestamp),
        CalendarUnit::Hour => Timeframe::HOUR.window_start(timestamp),
        CalendarUnit::Day => Timeframe::DAY.window_start(timestamp),
        CalendarUnit::Week => {
            let day = Timeframe::DAY.window_start(timestamp);
            day - Duration::days(day.weekday().num_days_from_monday() as i64)
        }
        CalendarUnit::Month => NaiveDate::from_ymd_opt(timestamp.year(), timestamp.month(), 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .unwrap_or(timestamp),
    }
}

/// Which calendar boundaries a tick crossed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boundaries {
    pub minute: bool,
    pub hour: bool,
    pub day: bool,
    pub week: bool,
    pub month: bool,
}

impl Boundaries {
    pub fn any(&self) -> bool {
        self.minute || self.hour || self.day || self.week || self.month
    }
}

const UNITS: [CalendarUnit; 5] = [
    CalendarUnit::Minute,
    CalendarUnit::Hour,
    CalendarUnit::Day,
    CalendarUnit::Week,
    CalendarUnit::Month,
];

/// Tracks the last truncated value of each calendar unit
#[derive(Debug, Clone, Default)]
pub struct BoundaryClock {
    last: Option<[DateTime<Utc>; 5]>,
}

impl BoundaryClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `timestamp`; the first call only seeds the clock
    pub fn advance(&mut self, timestamp: DateTime<Utc>) -> Boundaries {
        let current = UNITS.map(|unit| truncate(timestamp, unit));

        let Some(last) = self.last.replace(current) else {
            return Boundaries::default();
        };

        let crossed = |i: usize| current[i] > last[i];
        Boundaries {
            minute: crossed(0),
            hour: crossed(1),
            day: crossed(2),
            week: crossed(3),
            month: crossed(4),
        }
    }
}
