//! Instant ↔ civil-time conversion for one named zone.
//!
//! All DST reasoning goes through [`TimeZoneConverter`]; nothing else in the
//! crate touches `chrono_tz` directly.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike,
};
use chrono_tz::{OffsetComponents, Tz};

use crate::error::{AlignError, Result};

// Longest forward transition on record is well under a day.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// Wall-clock time in a named zone, together with the offset in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTimestamp {
    pub local: NaiveDateTime,
    pub offset_seconds: i32,
    pub zone: Tz,
}

impl CivilTimestamp {
    pub fn date(&self) -> NaiveDate {
        self.local.date()
    }

    pub fn year(&self) -> i32 {
        self.local.year()
    }

    pub fn month(&self) -> u32 {
        self.local.month()
    }

    pub fn day(&self) -> u32 {
        self.local.day()
    }

    pub fn hour(&self) -> u32 {
        self.local.hour()
    }

    /// Seconds elapsed since the start of the local hour.
    pub fn seconds_into_hour(&self) -> i64 {
        i64::from(self.local.minute()) * 60 + i64::from(self.local.second())
    }
}

impl fmt::Display for CivilTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset_seconds < 0 { '-' } else { '+' };
        let abs = self.offset_seconds.unsigned_abs();
        write!(
            f,
            "{}{}{:02}:{:02}[{}]",
            self.local.format("%Y-%m-%dT%H:%M:%S"),
            sign,
            abs / 3600,
            (abs % 3600) / 60,
            self.zone.name()
        )
    }
}

/// How one local wall-clock time maps back onto absolute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalHour {
    Normal(i64),
    /// Fall-back: the local time occurs twice. `earliest` starts the first
    /// pass and `latest` is where the clock re-enters it after the
    /// transition. For whole-hour shifts the two are one DST delta apart.
    Ambiguous { earliest: i64, latest: i64 },
    /// Spring-forward: the local time is skipped. `shifted` is the instant
    /// reached by moving forward across the gap.
    Nonexistent { shifted: i64 },
}

impl LocalHour {
    /// Candidate instants in ascending order.
    pub fn candidates(&self) -> Vec<i64> {
        match *self {
            LocalHour::Normal(t) => vec![t],
            LocalHour::Ambiguous { earliest, latest } => vec![earliest, latest],
            LocalHour::Nonexistent { shifted } => vec![shifted],
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LocalHour::Ambiguous { .. })
    }

    pub fn is_nonexistent(&self) -> bool {
        matches!(self, LocalHour::Nonexistent { .. })
    }

    /// The instant belonging to a 1-based occurrence index, if it exists.
    pub fn occurrence(&self, occurrence: u8) -> Option<i64> {
        match (*self, occurrence) {
            (LocalHour::Normal(t), 1) => Some(t),
            (LocalHour::Ambiguous { earliest, .. }, 1) => Some(earliest),
            (LocalHour::Ambiguous { latest, .. }, 2) => Some(latest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZoneConverter {
    tz: Tz,
}

impl TimeZoneConverter {
    pub fn new(name: &str) -> Result<Self> {
        let tz = name
            .trim()
            .parse::<Tz>()
            .map_err(|e| AlignError::ZoneResolution(format!("{name}: {e}")))?;
        Ok(Self { tz })
    }

    pub fn zone(&self) -> Tz {
        self.tz
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn to_civil(&self, instant: i64) -> Result<CivilTimestamp> {
        let utc = DateTime::from_timestamp(instant, 0).ok_or(AlignError::InstantOutOfRange(instant))?;
        let local = utc.with_timezone(&self.tz);
        Ok(CivilTimestamp {
            local: local.naive_local(),
            offset_seconds: local.offset().fix().local_minus_utc(),
            zone: self.tz,
        })
    }

    /// UTC offset in force at `instant`, in seconds.
    pub fn offset_at(&self, instant: i64) -> Result<i32> {
        Ok(self.to_civil(instant)?.offset_seconds)
    }

    /// Standard (non-DST) offset in force at `instant`, in seconds.
    pub fn standard_offset_at(&self, instant: i64) -> Result<i32> {
        let utc = DateTime::from_timestamp(instant, 0).ok_or(AlignError::InstantOutOfRange(instant))?;
        let offset = self.tz.offset_from_utc_datetime(&utc.naive_utc());
        Ok(offset.base_utc_offset().num_seconds() as i32)
    }

    /// Resolve local hour `hour` on `date` as a whole span.
    ///
    /// The hour is ambiguous when any minute of it is repeated, and
    /// nonexistent only when every minute is skipped. A partly skipped hour
    /// resolves to the first instant it actually exists. Returns `None` only
    /// when `hour` is not in `0..24`.
    pub fn resolve_local_hour(&self, date: NaiveDate, hour: u32) -> Option<LocalHour> {
        let start = date.and_hms_opt(hour, 0, 0)?;
        let last = start + Duration::minutes(59);
        if let (LocalResult::Single(a), LocalResult::Single(b)) = (
            self.tz.from_local_datetime(&start),
            self.tz.from_local_datetime(&last),
        ) {
            if b.timestamp() - a.timestamp() == 59 * 60 {
                return Some(LocalHour::Normal(a.timestamp()));
            }
        }

        let mut first_pass: Option<i64> = None;
        let mut second_pass: Option<i64> = None;
        for minute in 0..60 {
            let naive = start + Duration::minutes(minute);
            match self.tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => {
                    first_pass.get_or_insert(dt.timestamp());
                }
                LocalResult::Ambiguous(a, b) => {
                    let (earliest, latest) = ordered(a.timestamp(), b.timestamp());
                    first_pass.get_or_insert(earliest);
                    // The second pass re-enters the hour at the transition.
                    second_pass.get_or_insert(latest);
                }
                LocalResult::None => {}
            }
        }
        Some(match (first_pass, second_pass) {
            (Some(earliest), Some(latest)) => LocalHour::Ambiguous { earliest, latest },
            (Some(t), None) => LocalHour::Normal(t),
            _ => LocalHour::Nonexistent {
                shifted: self.shift_forward(start),
            },
        })
    }

    /// Resolve an arbitrary wall-clock time.
    pub fn resolve_local(&self, naive: NaiveDateTime) -> LocalHour {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => LocalHour::Normal(dt.timestamp()),
            LocalResult::Ambiguous(a, b) => {
                let (earliest, latest) = ordered(a.timestamp(), b.timestamp());
                LocalHour::Ambiguous { earliest, latest }
            }
            LocalResult::None => LocalHour::Nonexistent {
                shifted: self.shift_forward(naive),
            },
        }
    }

    /// Instant of a bucket start given its local label and occurrence.
    pub fn instant_for(&self, date: NaiveDate, hour: u32, occurrence: u8) -> Option<i64> {
        self.resolve_local_hour(date, hour)?.occurrence(occurrence)
    }

    /// Moves a skipped wall-clock time across the gap: the time is read with
    /// the offset in force just before the transition, which lands the same
    /// distance past the transition as it was past the gap start.
    fn shift_forward(&self, naive: NaiveDateTime) -> i64 {
        let as_utc = naive.and_utc().timestamp();
        let mut cursor = naive;
        for _ in 0..MAX_GAP_MINUTES {
            cursor += Duration::minutes(1);
            if let Some(after) = self.tz.from_local_datetime(&cursor).earliest() {
                if let Ok(before) = self.offset_at(after.timestamp() - 1) {
                    return as_utc - i64::from(before);
                }
                break;
            }
        }
        let standard = self.standard_offset_at(as_utc).unwrap_or(0);
        as_utc - i64::from(standard)
    }
}

fn ordered(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}
