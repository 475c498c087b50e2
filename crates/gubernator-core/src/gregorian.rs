//! Calendar-aligned durations.
//!
//! Duration values below [`GREGORIAN_MINUTES`] are literal milliseconds.
//! Values in the reserved band select a calendar unit; the counter window
//! then runs to the start of the next such unit in UTC.

use chrono::{Datelike, Days, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{GubernatorError, Result};

/// Start of the sentinel band. Everything below is a literal duration.
pub const GREGORIAN_MINUTES: i64 = 0x4000_0000_0000_0000;
pub const GREGORIAN_HOURS: i64 = GREGORIAN_MINUTES + 1;
pub const GREGORIAN_DAYS: i64 = GREGORIAN_MINUTES + 2;
pub const GREGORIAN_WEEKS: i64 = GREGORIAN_MINUTES + 3;
pub const GREGORIAN_MONTHS: i64 = GREGORIAN_MINUTES + 4;
pub const GREGORIAN_YEARS: i64 = GREGORIAN_MINUTES + 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GregorianUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl GregorianUnit {
    /// Decode a duration sentinel. `None` for literal-millisecond values
    /// and for values inside the band that map to no unit.
    pub fn from_duration(duration: i64) -> Option<Self> {
        match duration {
            GREGORIAN_MINUTES => Some(GregorianUnit::Minutes),
            GREGORIAN_HOURS => Some(GregorianUnit::Hours),
            GREGORIAN_DAYS => Some(GregorianUnit::Days),
            GREGORIAN_WEEKS => Some(GregorianUnit::Weeks),
            GREGORIAN_MONTHS => Some(GregorianUnit::Months),
            GREGORIAN_YEARS => Some(GregorianUnit::Years),
            _ => None,
        }
    }

    /// Nominal unit length in milliseconds. Months and years use their
    /// 30-day / 365-day lengths; only leak-rate math consumes this, the
    /// window itself always ends on the real calendar boundary.
    pub fn nominal_ms(self) -> i64 {
        match self {
            GregorianUnit::Minutes => 60_000,
            GregorianUnit::Hours => 3_600_000,
            GregorianUnit::Days => 86_400_000,
            GregorianUnit::Weeks => 604_800_000,
            GregorianUnit::Months => 2_592_000_000,
            GregorianUnit::Years => 31_536_000_000,
        }
    }

    /// Unix milliseconds of the start of the next calendar unit after
    /// `now_ms`, in UTC.
    pub fn next_boundary(self, now_ms: i64) -> Result<i64> {
        let now = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .ok_or_else(|| GubernatorError::Internal(format!("invalid timestamp {now_ms}")))?;

        let boundary = match self {
            GregorianUnit::Minutes => now
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .and_then(|t| t.checked_add_signed(Duration::minutes(1))),
            GregorianUnit::Hours => now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .and_then(|t| t.checked_add_signed(Duration::hours(1))),
            GregorianUnit::Days => now
                .date_naive()
                .succ_opt()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc()),
            GregorianUnit::Weeks => {
                // Weeks start on Monday.
                let today = now.date_naive();
                let until_monday = 7 - i64::from(today.weekday().num_days_from_monday());
                today
                    .checked_add_days(Days::new(until_monday as u64))
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|t| t.and_utc())
            }
            GregorianUnit::Months => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|t| t.and_utc())
            }
            GregorianUnit::Years => NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc()),
        };

        boundary
            .map(|t| t.timestamp_millis())
            .ok_or_else(|| GubernatorError::Internal(format!("no calendar boundary after {now_ms}")))
    }
}
