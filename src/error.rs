use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde_json::json;
use sqlx::mysql::MySqlDatabaseError;

/// Errors surfaced by handlers. Every variant renders as the standard
/// `{success, message, error}` envelope.
#[derive(Debug, Display)]
pub enum ApiError {
    #[display(fmt = "{}", _0)]
    Validation(String),
    #[display(fmt = "{}", _0)]
    Unauthorized(String),
    #[display(fmt = "{}", _0)]
    Forbidden(String),
    #[display(fmt = "{}", _0)]
    NotFound(String),
    #[display(fmt = "{}", _0)]
    Conflict(String),
    #[display(fmt = "{}", _0)]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    /// `ApiError::not_found("Employee")` renders as "Employee not found".
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{entity} not found"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
            "error": self.code(),
            "data": null,
        }))
    }
}

/// MySQL error numbers for deleting a row that child rows still point at.
const ROW_IS_REFERENCED: [u16; 2] = [1217, 1451];

/// A parent row still in use is a conflict; a dangling reference in the
/// request is a validation error.
fn foreign_key_error(mysql_number: Option<u16>) -> ApiError {
    match mysql_number {
        Some(n) if ROW_IS_REFERENCED.contains(&n) => {
            ApiError::Conflict("Record is still referenced by other records".into())
        }
        _ => ApiError::Validation("Referenced record does not exist".into()),
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict("Duplicate value violates a unique constraint".into())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                foreign_key_error(
                    db_err
                        .try_downcast_ref::<MySqlDatabaseError>()
                        .map(MySqlDatabaseError::number),
                )
            }
            _ => ApiError::Internal(format!("database error: {err}")),
        }
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        ApiError::Internal(format!("password hashing failed: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ApiError::Internal(format!("token signing failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("Shift").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_message_names_entity() {
        assert_eq!(ApiError::not_found("Employee").to_string(), "Employee not found");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn referenced_rows_conflict_and_dangling_references_are_invalid() {
        assert!(matches!(foreign_key_error(Some(1451)), ApiError::Conflict(_)));
        assert!(matches!(foreign_key_error(Some(1217)), ApiError::Conflict(_)));
        assert!(matches!(foreign_key_error(Some(1452)), ApiError::Validation(_)));
        assert!(matches!(foreign_key_error(None), ApiError::Validation(_)));
    }

    #[test]
    fn pool_errors_map_to_500() {
        let err: ApiError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), "INTERNAL_SERVER_ERROR");
    }
}
