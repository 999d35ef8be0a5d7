use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed taxonomy of failure kinds. Driver and collaborator errors are mapped
/// onto it once, at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    // authentication
    UserNotFound,
    WrongPassword,
    EmailAlreadyInUse,
    WeakPassword,
    InvalidEmail,
    UserDisabled,
    TooManyRequests,
    // backing store
    PermissionDenied,
    Unavailable,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    DataLoss,
    Unauthenticated,
    // transport and local
    Network,
    Timeout,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable
                | ErrorKind::ResourceExhausted
                | ErrorKind::Aborted
                | ErrorKind::Internal
                | ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::TooManyRequests
        )
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::UserNotFound => "user-not-found",
            ErrorKind::WrongPassword => "wrong-password",
            ErrorKind::EmailAlreadyInUse => "email-already-in-use",
            ErrorKind::WeakPassword => "weak-password",
            ErrorKind::InvalidEmail => "invalid-email",
            ErrorKind::UserDisabled => "user-disabled",
            ErrorKind::TooManyRequests => "too-many-requests",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::FailedPrecondition => "failed-precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out-of-range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
            ErrorKind::DataLoss => "data-loss",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::UserNotFound => "No account found with this email address.",
            ErrorKind::WrongPassword => "Incorrect password. Please try again.",
            ErrorKind::EmailAlreadyInUse => "An account with this email already exists.",
            ErrorKind::WeakPassword => "Password should be at least 6 characters long.",
            ErrorKind::InvalidEmail => "Please enter a valid email address.",
            ErrorKind::UserDisabled => "This account has been disabled.",
            ErrorKind::TooManyRequests => "Too many attempts. Please wait a moment and try again.",
            ErrorKind::PermissionDenied => "You don't have permission to perform this action.",
            ErrorKind::Unavailable => "The service is temporarily unavailable. Please try again.",
            ErrorKind::NotFound => "The requested data could not be found.",
            ErrorKind::AlreadyExists => "This item already exists.",
            ErrorKind::ResourceExhausted => "Service quota exceeded. Please try again later.",
            ErrorKind::FailedPrecondition => "This action isn't available right now.",
            ErrorKind::Aborted => "The operation was interrupted. Please try again.",
            ErrorKind::OutOfRange => "The request is outside the allowed range.",
            ErrorKind::Unimplemented => "This feature is not supported.",
            ErrorKind::Internal => "An internal error occurred. Please try again.",
            ErrorKind::DataLoss => "Stored data appears to be corrupted.",
            ErrorKind::Unauthenticated => "Please sign in to continue.",
            ErrorKind::Network => "Network error. Please check your connection.",
            ErrorKind::Timeout => "The request took too long. Please try again.",
            ErrorKind::Validation => "Some of the submitted data is invalid.",
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation
            | ErrorKind::InvalidEmail
            | ErrorKind::WeakPassword
            | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
            ErrorKind::WrongPassword | ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied | ErrorKind::UserDisabled => StatusCode::FORBIDDEN,
            ErrorKind::NotFound | ErrorKind::UserNotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists | ErrorKind::EmailAlreadyInUse | ErrorKind::Aborted => {
                StatusCode::CONFLICT
            }
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::TooManyRequests | ErrorKind::ResourceExhausted => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Unavailable | ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal | ErrorKind::DataLoss | ErrorKind::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error on `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("{kind}: {message}")]
    Backend { kind: ErrorKind, message: String },

    #[error("{label} timed out after {elapsed_ms}ms")]
    Timeout { label: String, elapsed_ms: u64 },

    #[error("{label} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn backend(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Backend {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::backend(ErrorKind::NotFound, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Internal,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Backend { kind, .. } => *kind,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::RetriesExhausted { source, .. } => source.kind(),
            Error::Json(_) => ErrorKind::DataLoss,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // A broken configuration will not heal on retry.
            Error::Config(_) => false,
            other => other.kind().is_retryable(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message, .. } => message.clone(),
            other => other.kind().user_message().to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<(String, String)> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("failed `{}` check", e.code))
                    })
                    .unwrap_or_else(|| "is invalid".to_string());
                (field.to_string(), message)
            })
            .collect();
        fields.sort();
        match fields.into_iter().next() {
            Some((field, message)) => Error::Validation { field, message },
            None => Error::validation("payload", "is invalid"),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::PoolTimedOut => ErrorKind::Unavailable,
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => ErrorKind::Unavailable,
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ErrorKind::Network,
            sqlx::Error::Configuration(_) => ErrorKind::FailedPrecondition,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => ErrorKind::DataLoss,
            sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref()),
            sqlx::Error::Protocol(_) => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };
        Error::backend(kind, err.to_string())
    }
}

fn classify_sqlstate(code: Option<&str>) -> ErrorKind {
    match code {
        Some("40001") | Some("40P01") => ErrorKind::Aborted,
        Some("23505") => ErrorKind::AlreadyExists,
        Some("42501") => ErrorKind::PermissionDenied,
        Some("22003") => ErrorKind::OutOfRange,
        Some("57014") => ErrorKind::Timeout,
        Some("0A000") => ErrorKind::Unimplemented,
        Some(c) if c.starts_with("53") => ErrorKind::ResourceExhausted,
        Some(c) if c.starts_with("08") => ErrorKind::Unavailable,
        Some(c) if c.starts_with("23") => ErrorKind::FailedPrecondition,
        Some(c) if c.starts_with("XX") => ErrorKind::Internal,
        _ => ErrorKind::Unknown,
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network
        } else if let Some(status) = err.status() {
            classify_http_status(status.as_u16())
        } else if err.is_decode() {
            ErrorKind::DataLoss
        } else {
            ErrorKind::Unknown
        };
        Error::backend(kind, format!("External service error: {}", err))
    }
}

/// Maps an upstream HTTP status onto the taxonomy.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::Validation,
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        409 => ErrorKind::Aborted,
        429 => ErrorKind::TooManyRequests,
        501 => ErrorKind::Unimplemented,
        502 | 503 => ErrorKind::Unavailable,
        504 => ErrorKind::Timeout,
        s if s >= 500 => ErrorKind::Unavailable,
        _ => ErrorKind::Unknown,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        match &self {
            Error::Validation { .. } => tracing::debug!(error = %self, "request rejected"),
            _ if kind.status().is_server_error() => tracing::error!(error = %self, "request failed"),
            _ => tracing::warn!(error = %self, "request failed"),
        }

        let mut body = json!({
            "error": kind.code(),
            "message": self.user_message(),
            "retryable": self.is_retryable(),
        });
        if let Error::Validation { field, .. } = &self {
            body["field"] = json!(field);
        }
        (kind.status(), Json(body)).into_response()
    }
}
