use ulid::Ulid;

use crate::model::*;
use crate::time::Date;

use super::EngineError;

/// True if any existing slot on `date` intersects `candidate`.
pub fn conflicts(date: Date, candidate: &TimeRange, existing_same_date: &[Reservation]) -> bool {
    first_conflict(date, candidate, existing_same_date).is_some()
}

/// The first reservation on `date` whose range intersects `candidate`.
/// Reservations for other dates are ignored.
pub fn first_conflict(date: Date, candidate: &TimeRange, existing_same_date: &[Reservation]) -> Option<Ulid> {
    existing_same_date
        .iter()
        .filter(|r| r.date == date)
        .find(|r| r.range().overlaps(candidate))
        .map(|r| r.id)
}

/// Conflict check against the per-date index. Caller holds the day lock.
pub(crate) fn check_no_conflict(day: &DayState, range: &TimeRange) -> Result<(), EngineError> {
    match day.overlapping(range).next() {
        Some((id, _)) => Err(EngineError::Conflict {
            date: day.date,
            range: *range,
            existing: *id,
        }),
        None => Ok(()),
    }
}
