use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DateRangeError {
    #[error("expected exactly two ' - '-separated dates, got '{0}'")]
    BadShape(String),

    #[error("invalid date '{0}', expected YYYYmmdd")]
    BadDate(String),

    #[error("range start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// An inclusive wall-clock date range, written `"YYYYmmdd - YYYYmmdd"`.
/// Bounds are UTC midnights expressed as nanoseconds since the epoch, for
/// comparison against stitch metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn parse(text: &str) -> Result<Self, DateRangeError> {
        let mut parts = text.split('-').map(str::trim);
        let (start, end) = match (parts.next(), parts.next(), parts.next()) {
            (Some(start), Some(end), None) => (start, end),
            _ => return Err(DateRangeError::BadShape(text.to_string())),
        };

        let start = NaiveDate::parse_from_str(start, "%Y%m%d")
            .map_err(|_| DateRangeError::BadDate(start.to_string()))?;
        let end = NaiveDate::parse_from_str(end, "%Y%m%d")
            .map_err(|_| DateRangeError::BadDate(end.to_string()))?;

        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }

        Ok(Self { start, end })
    }

    /// Nanoseconds since the epoch at the start date's UTC midnight.
    pub fn start_nanos(&self) -> i64 {
        midnight_nanos(self.start)
    }

    /// Nanoseconds since the epoch at the end date's UTC midnight.
    pub fn end_nanos(&self) -> i64 {
        midnight_nanos(self.end)
    }
}

fn midnight_nanos(date: NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    midnight.and_utc().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
