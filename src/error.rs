use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::diagnostics::Infeasibility;
use crate::format;

/// The kind reported next to every error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    SchedulingInfeasible,
    SchedulingTimeout,
    SchedulingCancelled,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::SchedulingInfeasible => "SchedulingInfeasible",
            ErrorKind::SchedulingTimeout => "SchedulingTimeout",
            ErrorKind::SchedulingCancelled => "SchedulingCancelled",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can end a generation request without a timetable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimetableError {
    #[error("{0}")]
    Validation(String),
    #[error("No feasible timetable: {0}")]
    Infeasible(Infeasibility),
    #[error(
        "Scheduling timed out after {backtracks} backtracks ({elapsed:.2?}); \
         a solution may still exist, retry with relaxed constraints"
    )]
    Timeout { backtracks: u64, elapsed: Duration },
    #[error("Scheduling was cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl TimetableError {
    pub fn validation(message: impl Into<String>) -> Self {
        TimetableError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TimetableError::Validation(_) => ErrorKind::ValidationError,
            TimetableError::Infeasible(_) => ErrorKind::SchedulingInfeasible,
            TimetableError::Timeout { .. } => ErrorKind::SchedulingTimeout,
            TimetableError::Cancelled => ErrorKind::SchedulingCancelled,
            TimetableError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TimetableError::Validation(_) => StatusCode::BAD_REQUEST,
            TimetableError::Infeasible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TimetableError::Timeout { .. } | TimetableError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TimetableError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the caller. Internal details stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            TimetableError::Internal(_) => {
                "An internal error occurred while generating the timetable.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for TimetableError {
    fn into_response(self) -> Response {
        (self.status(), Json(format::error_body(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_surfaced_unchanged() {
        let err = TimetableError::validation("class list is empty");
        assert_eq!(err.public_message(), "class list is empty");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = TimetableError::Internal("staff index 7 out of range".into());
        assert!(!err.public_message().contains("index 7"));
        assert_eq!(err.kind().as_str(), "InternalError");
    }

    #[test]
    fn timeout_is_distinct_from_infeasible() {
        let timeout = TimetableError::Timeout {
            backtracks: 10,
            elapsed: Duration::from_millis(5),
        };
        let infeasible = TimetableError::Infeasible(Infeasibility::NoAvailableSlots);
        assert_ne!(timeout.kind(), infeasible.kind());
        assert_eq!(timeout.kind().as_str(), "SchedulingTimeout");
        assert_eq!(infeasible.kind().as_str(), "SchedulingInfeasible");
    }
}
