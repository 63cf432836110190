use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Calendar date of a reservation. No time zone.
pub type Date = NaiveDate;

/// Minutes since midnight, `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MINUTES_PER_DAY: u16 = 24 * 60;

    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        if hours < 24 && minutes < 60 {
            Some(Self(hours * 60 + minutes))
        } else {
            None
        }
    }

    pub fn minute_of_day(self) -> u16 {
        self.0
    }

    pub fn hours(self) -> u16 {
        self.0 / 60
    }

    pub fn minutes(self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours(), self.minutes())
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_time(&s).ok_or_else(|| format!("invalid clock time: {s:?}"))
    }
}

impl From<ClockTime> for String {
    fn from(t: ClockTime) -> Self {
        t.to_string()
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse `YYYY-MM-DD`. The shape is checked before the calendar, so
/// `2024-1-05` and `2024-02-30` are both rejected.
pub fn parse_date(s: &str) -> Option<Date> {
    let mut parts = s.split('-');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    if y.len() != 4 || m.len() != 2 || d.len() != 2 {
        return None;
    }
    if !(all_digits(y) && all_digits(m) && all_digits(d)) {
        return None;
    }
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

/// Parse `HH:mm` (24-hour) into a minute-of-day value.
pub fn parse_time(s: &str) -> Option<ClockTime> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 || !all_digits(h) || !all_digits(m) {
        return None;
    }
    ClockTime::from_hm(h.parse().ok()?, m.parse().ok()?)
}

/// Render a date back in its wire form.
pub fn format_date(date: &Date) -> String {
    date.format("%Y-%m-%d").to_string()
}
