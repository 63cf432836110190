use ulid::Ulid;

use crate::model::TimeRange;
use crate::time::{format_date, Date};
use crate::validate::Violation;

#[derive(Debug)]
pub enum EngineError {
    Validation(Vec<Violation>),
    Conflict {
        date: Date,
        range: TimeRange,
        existing: Ulid,
    },
    NotFound(Ulid),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    /// WAL writer gone or disk I/O failed. Retryable by the caller.
    StoreUnavailable(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(violations) => {
                write!(f, "validation failed: ")?;
                for (i, v) in violations.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            EngineError::Conflict { date, range, .. } => write!(
                f,
                "Booking conflict detected for date {} and time range {range}",
                format_date(date)
            ),
            EngineError::NotFound(id) => write!(f, "Booking with ID \"{id}\" not found"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
