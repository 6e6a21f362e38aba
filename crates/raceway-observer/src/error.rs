//! Error types for the HTTP API.
//!
//! [`ObserverError`] maps control-loop failures onto HTTP statuses and
//! renders them as `{"error": msg, "status": code}` through its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. The
//! push channel uses [`rejection_kind`] for the same errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use raceway_core::control::SessionError;
use raceway_core::queue::QueueError;
use raceway_core::runner::ControlError;
use raceway_types::RejectionKind;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body or parameters failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The control loop is not running.
    #[error("race control unavailable")]
    Unavailable,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ControlError> for ObserverError {
    fn from(err: ControlError) -> Self {
        let message = err.to_string();
        match err {
            ControlError::Queue(queue) => match queue {
                QueueError::EmptyName | QueueError::Roster { .. } => Self::InvalidRequest(message),
                QueueError::NotFound { .. } | QueueError::DriverNotFound { .. } => {
                    Self::NotFound(message)
                }
                QueueError::DuplicateName { .. } | QueueError::Empty => Self::Conflict(message),
                QueueError::IdsExhausted => Self::Internal(message),
            },
            ControlError::Session(session) => match session {
                SessionError::UnknownCar { .. } => Self::NotFound(message),
                SessionError::NoQueuedRace
                | SessionError::InvalidTransition { .. }
                | SessionError::NotRunning => Self::Conflict(message),
            },
            ControlError::Unavailable => Self::Unavailable,
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Machine-readable kind for a command rejected on the push channel.
pub const fn rejection_kind(err: &ControlError) -> RejectionKind {
    match err {
        ControlError::Queue(_) => RejectionKind::Queue,
        ControlError::Session(session) => match session {
            SessionError::NoQueuedRace => RejectionKind::NoQueuedRace,
            SessionError::InvalidTransition { .. } => RejectionKind::InvalidTransition,
            SessionError::NotRunning => RejectionKind::NotRunning,
            SessionError::UnknownCar { .. } => RejectionKind::UnknownCar,
        },
        ControlError::Unavailable => RejectionKind::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use raceway_core::queue::RosterError;
    use raceway_types::{RaceId, SafetyMode};

    use super::*;

    fn status_of(err: ControlError) -> StatusCode {
        ObserverError::from(err).into_response().status()
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ControlError::Queue(QueueError::Roster {
            source: RosterError::TooManyDrivers { count: 9 },
        });
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ControlError::Queue(QueueError::EmptyName)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn conflicts_map_to_409() {
        let duplicate = ControlError::Queue(QueueError::DuplicateName {
            name: "Heat 1".to_owned(),
        });
        assert_eq!(status_of(duplicate), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ControlError::Session(SessionError::NotRunning)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ControlError::Session(SessionError::NoQueuedRace)),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unknown_race_and_car_map_to_404() {
        let race = ControlError::Queue(QueueError::NotFound { id: RaceId(9) });
        assert_eq!(status_of(race), StatusCode::NOT_FOUND);
        let car = ControlError::Session(SessionError::UnknownCar { car_number: 7 });
        assert_eq!(status_of(car), StatusCode::NOT_FOUND);
    }

    #[test]
    fn stopped_loop_maps_to_503() {
        assert_eq!(
            status_of(ControlError::Unavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn rejection_kinds_follow_session_errors() {
        let err = ControlError::Session(SessionError::InvalidTransition {
            from: SafetyMode::Finished,
            to: SafetyMode::Safe,
        });
        assert_eq!(rejection_kind(&err), RejectionKind::InvalidTransition);
        assert_eq!(
            rejection_kind(&ControlError::Queue(QueueError::Empty)),
            RejectionKind::Queue
        );
    }
}
