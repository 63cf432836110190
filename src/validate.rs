use std::fmt;

use serde::Serialize;

use crate::limits::MAX_USER_LEN;
use crate::model::{BookingFields, TimeRange};
use crate::time::{parse_date, parse_time, ClockTime, Date};

pub const MSG_USER_EMPTY: &str = "user should not be empty";
pub const MSG_USER_MISSING: &str = "user must be provided";
pub const MSG_USER_TOO_LONG: &str = "user is too long";
pub const MSG_DATE_FORMAT: &str = "Date must be in the format YYYY-MM-DD";
pub const MSG_START_FORMAT: &str = "StartTime must be in the format HH:mm";
pub const MSG_END_FORMAT: &str = "EndTime must be in the format HH:mm";
pub const MSG_ORDERING: &str = "Start time must be earlier than end time";

/// A single field-level rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub message: &'static str,
}

impl Violation {
    pub fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Fields of a new reservation after shape checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub user: String,
    pub date: Date,
    pub range: TimeRange,
}

/// Fields of an update after shape checks. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidPatch {
    pub user: Option<String>,
    pub date: Option<Date>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
}

impl ValidPatch {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.date.is_none() && self.start_time.is_none() && self.end_time.is_none()
    }
}

fn check_user(user: &str, violations: &mut Vec<Violation>) {
    if user.trim().is_empty() {
        violations.push(Violation::new("user", MSG_USER_EMPTY));
    } else if user.len() > MAX_USER_LEN {
        violations.push(Violation::new("user", MSG_USER_TOO_LONG));
    }
}

/// Shape-check every present field. Missing fields are not reported here.
fn check_fields(
    fields: &BookingFields,
    violations: &mut Vec<Violation>,
) -> (Option<Date>, Option<ClockTime>, Option<ClockTime>) {
    if let Some(user) = &fields.user {
        check_user(user, violations);
    }
    let date = fields.date.as_deref().and_then(|s| {
        let parsed = parse_date(s);
        if parsed.is_none() {
            violations.push(Violation::new("date", MSG_DATE_FORMAT));
        }
        parsed
    });
    let start = fields.start_time.as_deref().and_then(|s| {
        let parsed = parse_time(s);
        if parsed.is_none() {
            violations.push(Violation::new("startTime", MSG_START_FORMAT));
        }
        parsed
    });
    let end = fields.end_time.as_deref().and_then(|s| {
        let parsed = parse_time(s);
        if parsed.is_none() {
            violations.push(Violation::new("endTime", MSG_END_FORMAT));
        }
        parsed
    });
    if let (Some(s), Some(e)) = (start, end)
        && s >= e
    {
        violations.push(Violation::new("timeSlot", MSG_ORDERING));
    }
    (date, start, end)
}

/// Validate the fields of a new reservation. All four are mandatory.
pub fn validate_create(fields: &BookingFields) -> Result<ValidBooking, Vec<Violation>> {
    let mut violations = Vec::new();
    if fields.user.is_none() {
        violations.push(Violation::new("user", MSG_USER_MISSING));
    }
    if fields.date.is_none() {
        violations.push(Violation::new("date", MSG_DATE_FORMAT));
    }
    if fields.start_time.is_none() {
        violations.push(Violation::new("startTime", MSG_START_FORMAT));
    }
    if fields.end_time.is_none() {
        violations.push(Violation::new("endTime", MSG_END_FORMAT));
    }
    let (date, start, end) = check_fields(fields, &mut violations);

    match (fields.user.as_ref(), date, start, end) {
        (Some(user), Some(date), Some(start), Some(end)) if violations.is_empty() => Ok(ValidBooking {
            user: user.clone(),
            date,
            range: TimeRange::new(start, end),
        }),
        _ => Err(violations),
    }
}

/// Validate a partial update. Ordering is only checked when both times are given.
pub fn validate_update(fields: &BookingFields) -> Result<ValidPatch, Vec<Violation>> {
    let mut violations = Vec::new();
    let (date, start_time, end_time) = check_fields(fields, &mut violations);
    if !violations.is_empty() {
        return Err(violations);
    }
    Ok(ValidPatch {
        user: fields.user.clone(),
        date,
        start_time,
        end_time,
    })
}
