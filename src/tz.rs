//! Civil time ↔ instant conversion against the IANA database.
//!
//! Everything here is pure: no clock access, no I/O. The same inputs always
//! produce the same outputs, which is what lets slot generation be re-run
//! freely.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{ClockTime, Ms, Span};

/// How to resolve a local time that occurs twice (fall-back overlap).
/// Local times inside a spring-forward gap are always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disambiguation {
    Reject,
    Earliest,
    Latest,
}

/// Longest stretch of skipped local time we step over when looking for the
/// first instant of a day. Covers whole-day skips such as Pacific/Apia 2011.
const MAX_GAP_MINUTES: i64 = 26 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZoneConverter {
    tz: Tz,
}

impl TimeZoneConverter {
    pub fn new(name: &str) -> Result<Self, EngineError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::from_tz)
            .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
    }

    pub fn from_tz(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    /// Resolve a civil date + wall-clock time to an instant.
    pub fn to_absolute(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        how: Disambiguation,
    ) -> Result<Ms, EngineError> {
        match self.tz.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
            LocalResult::Ambiguous(a, b) => {
                let (early, late) = ordered(a.timestamp_millis(), b.timestamp_millis());
                match how {
                    Disambiguation::Earliest => Ok(early),
                    Disambiguation::Latest => Ok(late),
                    Disambiguation::Reject => Err(EngineError::AmbiguousLocalTime {
                        date,
                        time,
                        timezone: self.name().to_string(),
                    }),
                }
            }
            LocalResult::None => Err(EngineError::NonexistentLocalTime {
                date,
                time,
                timezone: self.name().to_string(),
            }),
        }
    }

    /// Like [`to_absolute`](Self::to_absolute) but accepts 24:00, which
    /// resolves to the first instant of the following day.
    pub fn clock_to_absolute(
        &self,
        date: NaiveDate,
        time: ClockTime,
        how: Disambiguation,
    ) -> Result<Ms, EngineError> {
        match time.to_naive() {
            Some(t) => self.to_absolute(date, t, how),
            None => Ok(self.start_of_day(next_day(date))),
        }
    }

    /// First instant of `date`. Midnight inside a gap moves to the end of the
    /// gap; an ambiguous midnight takes the earlier offset.
    pub fn start_of_day(&self, date: NaiveDate) -> Ms {
        let midnight = NaiveTime::default();
        let base = date.and_time(midnight);
        for step in 0..=MAX_GAP_MINUTES {
            let local = base + chrono::Duration::minutes(step);
            match self.tz.from_local_datetime(&local) {
                LocalResult::Single(dt) => return dt.timestamp_millis(),
                LocalResult::Ambiguous(a, b) => {
                    return ordered(a.timestamp_millis(), b.timestamp_millis()).0;
                }
                LocalResult::None => continue,
            }
        }
        // No zone in the database skips this much; treat the wall clock as UTC.
        base.and_utc().timestamp_millis()
    }

    /// `[start_of_day(date), start_of_day(date + 1))`. 23, 24 or 25 hours
    /// long on DST days; empty for a day the zone skipped entirely.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.start_of_day(date);
        let end = self.start_of_day(next_day(date));
        Span {
            start,
            end: end.max(start),
        }
    }

    pub fn to_local(&self, instant: Ms) -> (NaiveDate, NaiveTime) {
        let local = self.local_datetime(instant);
        (local.date_naive(), local.time())
    }

    pub fn local_date(&self, instant: Ms) -> NaiveDate {
        self.local_datetime(instant).date_naive()
    }

    /// Local wall-clock minute of `instant`, seconds dropped.
    pub fn local_clock(&self, instant: Ms) -> ClockTime {
        ClockTime::from_naive(self.local_datetime(instant).time())
    }

    /// RFC 3339 with the zone's offset at that instant, e.g. `2025-10-03T09:00:00-07:00`.
    pub fn format_instant(&self, instant: Ms) -> String {
        self.local_datetime(instant)
            .to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    pub fn local_datetime(&self, instant: Ms) -> DateTime<Tz> {
        DateTime::<Utc>::from_timestamp_millis(instant)
            .unwrap_or_default()
            .with_timezone(&self.tz)
    }
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn ordered(a: Ms, b: Ms) -> (Ms, Ms) {
    if a <= b { (a, b) } else { (b, a) }
}
