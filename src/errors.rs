use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Postgres SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Deal, party, or progress record does not exist.
    NotFound(String),
    /// Uniqueness violation on a party contact field (email or phone).
    Conflict {
        /// The colliding field, `email` or `phone`.
        field: String,
        /// Human readable message.
        message: String,
    },
    /// A field required by the step being saved is missing or malformed.
    ValidationError(String),
    /// The co-borrower link (or the joint flip that depends on it) could not be written.
    LinkageFailure(String),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    pub fn conflict(field: &str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Strips any `WithContext` wrappers and returns the underlying error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), AppError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), AppError::Conflict { .. })
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::LinkageFailure(msg) => write!(f, "Linkage failure: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict { field, message } => {
                // The UI sends the user to login instead of signup on this shape
                let body = Json(json!({
                    "error": message,
                    "field": field,
                    "action": "login",
                }));
                return (StatusCode::CONFLICT, body).into_response();
            }
            AppError::ValidationError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::LinkageFailure(msg) => {
                tracing::error!("Linkage failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to link co-borrower to application".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to
    /// `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::Conflict { field, message } => AppError::Conflict {
                field: field.clone(),
                message: message.clone(),
            },
            AppError::ValidationError(msg) => AppError::ValidationError(msg.clone()),
            AppError::LinkageFailure(msg) => AppError::LinkageFailure(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    ///
    /// Unique violations on the party contact indexes become `Conflict` so the
    /// storage-level race guard surfaces the same way as the application check.
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let constraint = db_err.constraint().unwrap_or_default();
                let field = if constraint.contains("phone") {
                    "phone"
                } else if constraint.contains("email") {
                    "email"
                } else {
                    "record"
                };
                return AppError::conflict(
                    field,
                    format!("borrower with this {} already exists", field),
                );
            }
        }
        AppError::DatabaseError(err)
    }
}

/// A non-critical sub-write that failed during a step save.
///
/// Never returned as an error: collected on the save report and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialWriteWarning {
    pub field: String,
    pub message: String,
}

impl PartialWriteWarning {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        let warning = Self {
            field: field.to_string(),
            message: message.into(),
        };
        tracing::warn!(
            "Partial write skipped ({}): {}",
            warning.field,
            warning.message
        );
        warning
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_strips_context_chain() {
        let err: Result<(), AppError> = Err(AppError::NotFound("deal".into()));
        let wrapped = err.context("loading deal").context("saving step").unwrap_err();
        assert!(wrapped.is_not_found());
        assert!(matches!(wrapped.root(), AppError::NotFound(msg) if msg == "deal"));
    }

    #[test]
    fn test_conflict_status_and_display() {
        let err = AppError::conflict("phone", "borrower with this phone already exists");
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Conflict: borrower with this phone already exists"
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::ValidationError("x".into()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::LinkageFailure("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let wrapped = AppError::WithContext {
            source: Box::new(AppError::NotFound("deal".into())),
            context: "ctx".into(),
        };
        assert_eq!(wrapped.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_sqlx_context_keeps_database_root() {
        let err: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let wrapped = err.context("attaching primary borrower").unwrap_err();
        assert!(matches!(wrapped.root(), AppError::DatabaseError(_)));
        assert!(wrapped.to_string().starts_with("attaching primary borrower: "));
        assert_eq!(
            wrapped.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_row_not_found_stays_database_error() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::DatabaseError(_)));
    }
}
