use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Caller input is malformed or missing. Always surfaced before any external call.
    Validation(String),
    /// A required external-service URL or credential is absent.
    Configuration(String),
    /// The upstream loan-processing service rejected the call.
    ///
    /// `status` is `None` when the service could not be reached at all.
    Upstream {
        status: Option<u16>,
        message: String,
    },
    /// The upstream service answered 200/201 but the body was empty or not JSON.
    MalformedUpstream(String),
    /// A relational store operation failed.
    Persistence(sqlx::Error),
    /// A non-relational store fault (in-memory backend, serialization of a row).
    Store(String),
    /// No record matches a lookup.
    NotFound(String),
    /// Bad request error (invalid input outside the validation profiles).
    BadRequest(String),
    /// The messaging provider failed to deliver.
    Notification(String),
    /// Internal server error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        AppError::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Strips any context layers and returns the innermost error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), AppError::Configuration(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), AppError::Validation(_))
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self.root(),
            AppError::Upstream { .. } | AppError::MalformedUpstream(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream { status: None, .. } => StatusCode::BAD_GATEWAY,
            AppError::Upstream { .. } => StatusCode::BAD_REQUEST,
            AppError::MalformedUpstream(_) => StatusCode::BAD_REQUEST,
            AppError::Persistence(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Upstream {
                status: Some(status),
                message,
            } => write!(f, "Upstream error ({}): {}", status, message),
            AppError::Upstream {
                status: None,
                message,
            } => write!(f, "Upstream unreachable: {}", message),
            AppError::MalformedUpstream(msg) => write!(f, "Malformed upstream response: {}", msg),
            AppError::Persistence(e) => write!(f, "Database error: {}", e),
            AppError::Store(msg) => write!(f, "Store error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Notification(msg) => write!(f, "Notification error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Message shown to callers. Store and internal faults are logged and replaced
    /// with a generic message.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::BadRequest(msg) | AppError::NotFound(msg) => {
                msg.clone()
            }
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                msg.clone()
            }
            AppError::Upstream { message, .. } => {
                tracing::warn!("Upstream error: {}", message);
                message.clone()
            }
            AppError::MalformedUpstream(msg) => {
                tracing::warn!("Malformed upstream response: {}", msg);
                msg.clone()
            }
            AppError::Persistence(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Store(msg) => {
                tracing::error!("Store error: {}", msg);
                "Database error".to_string()
            }
            AppError::Notification(msg) => {
                tracing::error!("Notification error: {}", msg);
                msg.clone()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                source.public_message()
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each variant to its status class and a `{"success": false, "error": ..}` body.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Persistence(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Persistence(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Persistence(e)),
            context: f(),
        })
    }
}

/// Outcome of one step in a multi-step workflow.
///
/// Optional steps and best-effort persistence fail as `Recoverable`; the workflow
/// logs them and continues. Required steps fail as `Fatal` and abort the workflow.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Ok(T),
    Recoverable(AppError),
    Fatal(AppError),
}

impl<T> StepOutcome<T> {
    /// Wraps the result of a step whose failure must not abort the workflow.
    pub fn optional(result: Result<T, AppError>) -> Self {
        match result {
            Ok(value) => StepOutcome::Ok(value),
            Err(e) => StepOutcome::Recoverable(e),
        }
    }

    /// Wraps the result of a step whose failure aborts the workflow.
    pub fn required(result: Result<T, AppError>) -> Self {
        match result {
            Ok(value) => StepOutcome::Ok(value),
            Err(e) => StepOutcome::Fatal(e),
        }
    }

    /// Collapses the outcome for the caller: recoverable failures are logged under
    /// `step` and become `Ok(None)`, fatal ones are returned.
    pub fn resolve(self, step: &str) -> Result<Option<T>, AppError> {
        match self {
            StepOutcome::Ok(value) => Ok(Some(value)),
            StepOutcome::Recoverable(e) => {
                tracing::warn!("{} failed, continuing: {}", step, e);
                Ok(None)
            }
            StepOutcome::Fatal(e) => {
                tracing::error!("{} failed: {}", step, e);
                Err(e)
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok(_))
    }
}
