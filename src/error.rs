use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    /// A multi-step write failed part way; the transaction was rolled back
    #[error("Transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Reclassify a storage error raised inside a write transaction.
    ///
    /// A unique violation keeps its meaning as a Conflict; anything else
    /// becomes a `Transaction` failure.
    pub fn from_write(err: sqlx::Error, conflict_message: &str) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict(conflict_message.to_string())
            }
            other => ServiceError::Transaction(other),
        }
    }
}

fn missing_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"missing field `([^`]+)`").expect("valid pattern"))
}

fn field_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z0-9_\[\]]+(?:\.[A-Za-z0-9_\[\]]+)*): ").expect("valid pattern"))
}

/// Name the offending field of a deserialization error.
///
/// `detail` is serde's message, optionally prefixed with the field path
/// (`language_id: invalid type: ...`).
fn describe_input_error(detail: &str, fallback_field: &str) -> ServiceError {
    if let Some(field) = missing_field_pattern()
        .captures(detail)
        .and_then(|c| c.get(1))
    {
        let field = field.as_str();
        return ServiceError::validation(field, format!("The {} field is required.", field));
    }

    if let Some(field) = field_path_pattern().captures(detail).and_then(|c| c.get(1)) {
        let field = field.as_str();
        return ServiceError::validation(field, format!("The {} field is invalid.", field));
    }

    ServiceError::validation(fallback_field, detail)
}

/// Text after the framework's "Failed to ...: " preamble
fn rejection_detail(body_text: &str) -> &str {
    body_text
        .split_once(": ")
        .map(|(_, detail)| detail)
        .unwrap_or(body_text)
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) => describe_input_error(rejection_detail(&text), "body"),
            _ => ServiceError::validation("body", text),
        }
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        describe_input_error(rejection_detail(&rejection.body_text()), "query")
    }
}

impl From<PathRejection> for ServiceError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(_) => {
                ServiceError::validation("id", "The id must be an integer.")
            }
            other => ServiceError::validation("path", other.body_text()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::Validation { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": message.clone(),
                    "errors": { field: [message] },
                })),
            )
                .into_response(),
            ServiceError::Conflict(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "message": message })),
            )
                .into_response(),
            ServiceError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ServiceError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unauthenticated." })),
            )
                .into_response(),
            ServiceError::Transaction(err) => {
                error!(error = %err, "Write transaction rolled back");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "The operation could not be completed" })),
                )
                    .into_response()
            }
            ServiceError::Database(err) => {
                error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "An internal server error occurred" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServiceError::validation("query", "too short"), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::Conflict("dup".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::NotFound("missing".into()), StatusCode::NOT_FOUND),
            (ServiceError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                ServiceError::Transaction(sqlx::Error::PoolTimedOut),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_from_write_non_constraint_is_transaction_failure() {
        let err = ServiceError::from_write(sqlx::Error::PoolTimedOut, "dup");
        assert!(matches!(err, ServiceError::Transaction(_)));
    }

    fn field_of(err: ServiceError) -> String {
        match err {
            ServiceError::Validation { field, .. } => field,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_input_errors_name_the_field() {
        assert_eq!(
            field_of(describe_input_error("missing field `value` at line 1 column 30", "body")),
            "value"
        );
        assert_eq!(
            field_of(describe_input_error(
                "language_id: invalid type: string \"x\", expected i64 at line 1 column 20",
                "body"
            )),
            "language_id"
        );
        assert_eq!(
            field_of(describe_input_error("tags[0]: invalid type: integer `1`, expected a string", "body")),
            "tags[0]"
        );
        assert_eq!(
            field_of(describe_input_error("expected value at line 1 column 1", "body")),
            "body"
        );
    }

    #[test]
    fn test_rejection_detail_strips_preamble() {
        assert_eq!(
            rejection_detail("Failed to deserialize the JSON body into the target type: missing field `value`"),
            "missing field `value`"
        );
        assert_eq!(rejection_detail("no preamble"), "no preamble");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ServiceError::validation("languages", "The languages field is required.").to_string(),
            "The languages field is required."
        );
        assert_eq!(ServiceError::NotFound("Translation not found".into()).to_string(), "Translation not found");
    }
}
