//! Statistics over the reading list
//!
//! Pure functions, recomputed whenever the list changes. Calendar days are
//! always taken in the time zone of the supplied "now", for both the
//! entries and "now" itself.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, TimeZone};

use crate::models::ReadingEntry;

/// Sum of pages across the whole list
pub fn total_pages(readings: &[ReadingEntry]) -> u64 {
    readings.iter().map(|r| u64::from(r.pages)).sum()
}

/// Pages read on the local calendar day of `now`
pub fn today_pages(readings: &[ReadingEntry], now: DateTime<Local>) -> u64 {
    today_pages_in(readings, &now)
}

/// Pages read on the calendar day of `now`, in `now`'s time zone
pub fn today_pages_in<Tz: TimeZone>(readings: &[ReadingEntry], now: &DateTime<Tz>) -> u64 {
    let tz = now.timezone();
    let today = now.date_naive();

    readings
        .iter()
        .filter(|r| local_date(r.timestamp, &tz) == Some(today))
        .map(|r| u64::from(r.pages))
        .sum()
}

/// Pages per calendar day, newest day first
pub fn daily_totals<Tz: TimeZone>(readings: &[ReadingEntry], tz: &Tz) -> Vec<(NaiveDate, u64)> {
    let mut days: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for reading in readings {
        if let Some(date) = local_date(reading.timestamp, tz) {
            *days.entry(date).or_default() += u64::from(reading.pages);
        }
    }
    days.into_iter().rev().collect()
}

/// Calendar date of a millisecond timestamp, if representable
fn local_date<Tz: TimeZone>(timestamp: i64, tz: &Tz) -> Option<NaiveDate> {
    let utc = DateTime::from_timestamp_millis(timestamp)?;
    Some(utc.with_timezone(tz).date_naive())
}
