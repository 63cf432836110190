use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{ClockTime, Date};

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minute_of_day() - self.start.minute_of_day()
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// A persisted booking of one user for one time range on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub user: String,
    pub date: Date,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl Reservation {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Raw, unvalidated fields for a new reservation, as a caller supplies them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFields {
    pub user: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl BookingFields {
    pub fn new(user: &str, date: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            date: Some(date.to_string()),
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
        }
    }
}

/// Per-date index: the ranges booked on one date, sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: Date,
    pub slots: Vec<(Ulid, TimeRange)>,
}

impl DayState {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            slots: Vec::new(),
        }
    }

    /// Insert a slot maintaining sort order by start time.
    pub fn insert_slot(&mut self, id: Ulid, range: TimeRange) {
        let pos = self
            .slots
            .binary_search_by_key(&range.start, |(_, r)| r.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, (id, range));
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<TimeRange> {
        let pos = self.slots.iter().position(|(sid, _)| *sid == id)?;
        Some(self.slots.remove(pos).1)
    }

    /// Slots whose range overlaps `query`. Everything from the first slot
    /// starting at or after `query.end` onwards is skipped.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &(Ulid, TimeRange)> {
        let right_bound = self.slots.partition_point(|(_, r)| r.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |(_, r)| r.end > query.start)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A registered account. The hash never leaves the crate through read paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub password_hash: String,
}

impl User {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
}

/// Body returned after a reservation is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConfirmation {
    pub message: String,
}

impl DeleteConfirmation {
    pub fn new(id: Ulid) -> Self {
        Self {
            message: format!("Booking with ID \"{id}\" successfully deleted"),
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated(Reservation),
    /// Carries the full record after the update.
    ReservationUpdated(Reservation),
    ReservationDeleted {
        id: Ulid,
    },
    UserRegistered {
        id: Ulid,
        username: String,
        password_hash: String,
    },
}
