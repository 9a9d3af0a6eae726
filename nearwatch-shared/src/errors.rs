use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Submission gate rejections
/// - E2xxx: Alert and email verification errors
/// - E3xxx: Report and feedback errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    TokenExpired,
    TokenInvalid,

    // Submission gate (E1xxx)
    IdentifierMissing,
    IdentifierTooShort,
    LinkNotAllowed,
    CooldownActive,
    ReporterLocationMissing,
    ReportTooFar,
    AlertQuotaExceeded,
    InvalidCoordinates,
    InvalidRadius,
    EmailRequired,
    IdentifierTooLong,

    // Alerts (E2xxx)
    AlertNotFound,
    VerificationTokenInvalid,
    NotAlertOwner,

    // Reports (E3xxx)
    ReportNotFound,
    FeedbackNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::BadRequest => "E0008",
            Self::TokenExpired => "E0010",
            Self::TokenInvalid => "E0011",

            // Submission gate
            Self::IdentifierMissing => "E1001",
            Self::IdentifierTooShort => "E1002",
            Self::LinkNotAllowed => "E1003",
            Self::CooldownActive => "E1004",
            Self::ReporterLocationMissing => "E1005",
            Self::ReportTooFar => "E1006",
            Self::AlertQuotaExceeded => "E1007",
            Self::InvalidCoordinates => "E1008",
            Self::InvalidRadius => "E1009",
            Self::EmailRequired => "E1010",
            Self::IdentifierTooLong => "E1011",

            // Alerts
            Self::AlertNotFound => "E2001",
            Self::VerificationTokenInvalid => "E2002",
            Self::NotAlertOwner => "E2003",

            // Reports
            Self::ReportNotFound => "E3001",
            Self::FeedbackNotFound => "E3002",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::BadRequest | Self::IdentifierMissing
            | Self::IdentifierTooShort | Self::LinkNotAllowed | Self::ReporterLocationMissing
            | Self::ReportTooFar | Self::InvalidCoordinates | Self::InvalidRadius
            | Self::EmailRequired | Self::IdentifierTooLong => StatusCode::BAD_REQUEST,
            Self::CooldownActive | Self::AlertQuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound | Self::AlertNotFound | Self::VerificationTokenInvalid
            | Self::ReportNotFound | Self::FeedbackNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotAlertOwner => StatusCode::FORBIDDEN,
        }
    }
}

/// Why the submission gate turned a report, alert, or feedback away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    IdentifierMissing,
    IdentifierTooShort,
    LinkNotAllowed,
    CooldownActive,
    ReporterLocationMissing,
    ReportTooFar,
    AlertQuotaExceeded,
    InvalidCoordinates,
    InvalidRadius,
    EmailRequired,
    IdentifierTooLong,
}

impl Rejection {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::IdentifierMissing => ErrorCode::IdentifierMissing,
            Self::IdentifierTooShort => ErrorCode::IdentifierTooShort,
            Self::LinkNotAllowed => ErrorCode::LinkNotAllowed,
            Self::CooldownActive => ErrorCode::CooldownActive,
            Self::ReporterLocationMissing => ErrorCode::ReporterLocationMissing,
            Self::ReportTooFar => ErrorCode::ReportTooFar,
            Self::AlertQuotaExceeded => ErrorCode::AlertQuotaExceeded,
            Self::InvalidCoordinates => ErrorCode::InvalidCoordinates,
            Self::InvalidRadius => ErrorCode::InvalidRadius,
            Self::EmailRequired => ErrorCode::EmailRequired,
            Self::IdentifierTooLong => ErrorCode::IdentifierTooLong,
        }
    }
}

/// A submission rejected before anything was persisted. The message is shown
/// to the submitter verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub rejection: Rejection,
    pub message: String,
}

impl ValidationError {
    pub fn new(rejection: Rejection, message: impl Into<String>) -> Self {
        Self {
            rejection,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known { code: ErrorCode, message: String },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    pub fn rejected(rejection: Rejection, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(rejection, message))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code this error renders as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
            AppError::Database(_) => ErrorCode::InternalError,
            AppError::Validation(err) => err.rejection.error_code(),
        }
    }

    /// The gate rejection behind this error, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            AppError::Validation(err) => Some(err.rejection),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message } => (code.status_code(), ApiErrorResponse::new(*code, message)),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new(ErrorCode::InternalError, "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new(ErrorCode::NotFound, "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new(ErrorCode::InternalError, "database error"),
                    ),
                }
            }
            AppError::Validation(err) => (
                err.rejection.error_code().status_code(),
                ApiErrorResponse::rejected(err),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
