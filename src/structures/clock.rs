use time::{format_description::BorrowedFormatItem, macros::format_description, Date, OffsetDateTime, UtcOffset};

use super::errors::OffwatchError;

const DATE_KEY: &[BorrowedFormatItem<'static>] = format_description!("[day]-[month]-[year]");
const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[day]-[month]-[year] [hour]:[minute]:[second]");
const OFFSET: &[BorrowedFormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

pub trait Clock {
    /// Current time in the monitor's offset.
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        SystemClock { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Parse an offset such as `-03:00` or `+05:30`.
pub fn parse_offset(s: &str) -> Result<UtcOffset, OffwatchError> {
    Ok(UtcOffset::parse(s.trim(), OFFSET)?)
}

/// Cache key for the calendar day, `DD-MM-YYYY`.
pub fn date_key(at: OffsetDateTime) -> Result<String, OffwatchError> {
    Ok(at.format(DATE_KEY)?)
}

pub fn parse_date_key(key: &str) -> Option<Date> {
    Date::parse(key, DATE_KEY).ok()
}

/// Message timestamp, `DD-MM-YYYY HH:MM:SS`.
pub fn timestamp(at: OffsetDateTime) -> Result<String, OffwatchError> {
    Ok(at.format(TIMESTAMP)?)
}
