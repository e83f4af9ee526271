use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::leads::{QualificationError, RepositoryError, SchedulingError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Storage(RepositoryError),
    Scheduling(SchedulingError),
    Qualification(QualificationError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Storage(err) => write!(f, "storage error: {}", err),
            AppError::Scheduling(err) => write!(f, "scheduling error: {}", err),
            AppError::Qualification(err) => write!(f, "lead qualification error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Scheduling(err) => Some(err),
            AppError::Qualification(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Storage(err) => storage_failure(err),
            AppError::Scheduling(err) => scheduling_failure(err),
            AppError::Qualification(err) => qualification_failure(err),
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Io(_) | AppError::Server(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": self.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn storage_failure(err: &RepositoryError) -> (StatusCode, Value) {
    let status = match err {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict
        | RepositoryError::LeadAlreadyScheduled(_)
        | RepositoryError::SlotTaken(_)
        | RepositoryError::InvalidTransition { .. }
        | RepositoryError::NeedsReassignment(_) => StatusCode::CONFLICT,
        RepositoryError::Unavailable(_) => {
            tracing::error!(error = %err, "storage unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, json!({ "error": err.to_string() }))
}

fn scheduling_failure(err: &SchedulingError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        SchedulingError::Validation(details) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": message, "details": details }),
        ),
        SchedulingError::NotFound { .. } => (StatusCode::NOT_FOUND, json!({ "error": message })),
        SchedulingError::NoAvailableSlot {
            closer_id,
            lookahead_days,
        } => (
            StatusCode::NOT_FOUND,
            json!({
                "error": message,
                "closer_id": closer_id,
                "lookahead_days": lookahead_days,
            }),
        ),
        SchedulingError::AlreadyScheduled {
            lead_id,
            appointment_id,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "lead_id": lead_id,
                "appointment_id": appointment_id,
            }),
        ),
        SchedulingError::Conflict { attempts } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "retryable": err.is_retryable(),
                "attempts": attempts,
            }),
        ),
        SchedulingError::InvalidTransition { from, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "status": from.label() }),
        ),
        SchedulingError::CloserInactive {
            closer_id,
            appointment_id,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "closer_id": closer_id,
                "appointment_id": appointment_id,
            }),
        ),
        SchedulingError::Repository(inner) => storage_failure(inner),
    }
}

fn qualification_failure(err: &QualificationError) -> (StatusCode, Value) {
    match err {
        QualificationError::Validation(details) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": err.to_string(), "details": details }),
        ),
        QualificationError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, json!({ "error": err.to_string() }))
        }
        QualificationError::Repository(inner) => storage_failure(inner),
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(value)
    }
}

impl From<SchedulingError> for AppError {
    fn from(value: SchedulingError) -> Self {
        Self::Scheduling(value)
    }
}

impl From<QualificationError> for AppError {
    fn from(value: QualificationError) -> Self {
        Self::Qualification(value)
    }
}
