use thiserror::Error;

use crate::model::SpotId;

/// Why a request failed the booking rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    MissingField,
    InvalidName,
    InvalidIdentity,
    InvalidDate,
    PastDate,
    PastTime,
    OutsideWindow,
    WeekendRestricted,
    Holiday,
    InvalidTime,
    MisalignedTime,
    InvalidTimeRange,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCode::MissingField => "missing_field",
            ValidationCode::InvalidName => "invalid_name",
            ValidationCode::InvalidIdentity => "invalid_identity",
            ValidationCode::InvalidDate => "invalid_date",
            ValidationCode::PastDate => "past_date",
            ValidationCode::PastTime => "past_time",
            ValidationCode::OutsideWindow => "outside_booking_window",
            ValidationCode::WeekendRestricted => "weekend_restricted",
            ValidationCode::Holiday => "holiday",
            ValidationCode::InvalidTime => "invalid_time",
            ValidationCode::MisalignedTime => "misaligned_time",
            ValidationCode::InvalidTimeRange => "invalid_time_range",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("{message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },
    #[error("parking spot {0} does not exist")]
    SpotNotFound(SpotId),
    #[error("reservation {0} not found")]
    ReservationNotFound(String),
    #[error("spot already reserved for the selected time (reservation {0})")]
    Conflict(ulid::Ulid),
    #[error("forbidden: {0}")]
    Unauthorized(&'static str),
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ReservationError {
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        ReservationError::Validation {
            code,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status class.
    pub fn status(&self) -> u16 {
        match self {
            ReservationError::Validation { .. } => 400,
            ReservationError::SpotNotFound(_) | ReservationError::ReservationNotFound(_) => 404,
            ReservationError::Conflict(_) => 409,
            ReservationError::Unauthorized(_) => 403,
            ReservationError::Upstream(_) => 503,
            ReservationError::Unexpected(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::Validation { code, .. } => code.as_str(),
            ReservationError::SpotNotFound(_) => "spot_not_found",
            ReservationError::ReservationNotFound(_) => "reservation_not_found",
            ReservationError::Conflict(_) => "conflict",
            ReservationError::Unauthorized(_) => "forbidden",
            ReservationError::Upstream(_) => "upstream_unavailable",
            ReservationError::Unexpected(_) => "internal",
        }
    }

    pub fn validation_code(&self) -> Option<ValidationCode> {
        match self {
            ReservationError::Validation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Upstream failures are worth retrying unchanged; nothing else is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::Upstream(_))
    }

    /// Message safe to show a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ReservationError::Unexpected(_) => "unexpected server error".to_string(),
            other => other.to_string(),
        }
    }
}
