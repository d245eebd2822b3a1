//! Merging of the camera's separate date and time columns into one instant.
//!
//! Firmware revisions disagree on the encoding:
//!
//! | date         | time            |
//! |--------------|-----------------|
//! | `2025-04-02` | `07-56-53-630`  |
//! | `02/04/2025` | `07:56:53`      |
//! | `2025/04/02` | `07:56:53.630`  |
//!
//! Camera clocks are set to a fixed regional offset, so the result never
//! depends on the zone of the machine running the ingestion.

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy)]
pub struct DatetimeNormalizer {
    offset: FixedOffset,
}

impl DatetimeNormalizer {
    /// `utc_offset_minutes` east of UTC, e.g. 600 for UTC+10:00
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!("Invalid UTC offset: {} minutes", utc_offset_minutes))
            })?;
        Ok(Self { offset })
    }

    pub fn normalize(&self, date: &str, time: &str) -> Result<DateTime<Utc>> {
        let malformed = || Error::MalformedTimestamp(format!("date={:?} time={:?}", date, time));

        let date = parse_date(date.trim()).ok_or_else(malformed)?;
        let time = parse_time(time.trim()).ok_or_else(malformed)?;

        self.offset
            .from_local_datetime(&NaiveDateTime::new(date, time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(malformed)
    }

    /// Calendar date of an instant in the camera's zone, as used for
    /// the per-day image folders
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    if token.contains('/') {
        let first = token.split('/').next()?;
        let format = if first.len() == 4 { "%Y/%m/%d" } else { "%d/%m/%Y" };
        NaiveDate::parse_from_str(token, format).ok()
    } else {
        NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
    }
}

fn parse_time(token: &str) -> Option<NaiveTime> {
    let (clock, fraction) = match token.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (token, None),
    };

    let parts: Vec<&str> = clock.split(|c| c == '-' || c == ':').collect();
    let (h, m, s, fraction) = match (parts.as_slice(), fraction) {
        ([h, m, s], fraction) => (*h, *m, *s, fraction),
        ([h, m, s, ms], None) => (*h, *m, *s, Some(*ms)),
        _ => return None,
    };

    let millis = match fraction {
        Some(f) => parse_millis(f)?,
        None => 0,
    };

    NaiveTime::from_hms_milli_opt(parse_field(h)?, parse_field(m)?, parse_field(s)?, millis)
}

fn parse_field(field: &str) -> Option<u32> {
    if field.is_empty() || field.len() > 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Decimal fraction of a second, 1 to 3 digits
fn parse_millis(fraction: &str) -> Option<u32> {
    if fraction.is_empty() || fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = fraction.parse().ok()?;
    Some(value * 10u32.pow(3 - fraction.len() as u32))
}
