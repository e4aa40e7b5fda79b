use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    InvalidRange {
        start: NaiveTime,
        end: NaiveTime,
    },
    DuplicateWindow {
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },
    PastDate(NaiveDate),
    WindowOccupied(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden(&'static str),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        action: &'static str,
    },
    SlotNoLongerAvailable(NaiveDateTime),
    TooEarly {
        appointment: NaiveDateTime,
    },
    CompletionWindowExpired {
        deadline: NaiveDateTime,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Business-rule rejection as opposed to an infrastructure failure.
    pub fn is_business(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} must be before end {end}")
            }
            EngineError::DuplicateWindow { date, start, end } => {
                write!(f, "duplicate window: {date} {start}-{end} already declared")
            }
            EngineError::PastDate(date) => write!(f, "date is in the past: {date}"),
            EngineError::WindowOccupied(id) => {
                write!(f, "window {id} is occupied by a booking")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(why) => write!(f, "forbidden: {why}"),
            EngineError::InvalidTransition { id, from, action } => {
                write!(f, "invalid transition: cannot {action} booking {id} in status {from}")
            }
            EngineError::SlotNoLongerAvailable(at) => {
                write!(f, "slot no longer available: {at}")
            }
            EngineError::TooEarly { appointment } => {
                write!(f, "too early: appointment at {appointment} has not started")
            }
            EngineError::CompletionWindowExpired { deadline } => {
                write!(f, "completion window expired at {deadline}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
