use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use ulid::Ulid;

use crate::model::AppointmentStatus;

/// Coarse classification callers branch on. Webhook and API responses map
/// each kind to its own status; kinds are never collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    DstTransition,
    Conflict,
    Storage,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid timezone: '{0}'")]
    InvalidTimezone(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid duration: {0} minutes")]
    InvalidDuration(u32),

    #[error("appointment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("inactive: {0}")]
    Inactive(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("{date} {time} happens twice in {timezone} because of a clock change")]
    AmbiguousLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        timezone: String,
    },

    #[error("{date} {time} does not exist in {timezone} because of a clock change")]
    NonexistentLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        timezone: String,
    },

    #[error("conflict with appointment: {0}")]
    Conflict(Ulid),

    #[error("interval is outside the vet's availability")]
    OutsideAvailability,

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidTimezone(_)
            | EngineError::InvalidRange(_)
            | EngineError::InvalidDuration(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::NotFound(_)
            | EngineError::AlreadyExists(_)
            | EngineError::Inactive(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::AmbiguousLocalTime { .. } | EngineError::NonexistentLocalTime { .. } => {
                ErrorKind::DstTransition
            }
            EngineError::Conflict(_) | EngineError::OutsideAvailability => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
