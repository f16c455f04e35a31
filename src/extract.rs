//! Request extractors whose rejections render as validation errors.
//!
//! axum's own `Json`, `Path` and `Query` answer malformed input with plain
//! text; these wrappers route it through [`ServiceError`] so every client
//! error carries the `{"message", "errors"}` body.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ServiceError;

/// JSON request body
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
pub struct Payload<T>(pub T);

/// Path parameters
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ServiceError))]
pub struct PathParam<T>(pub T);

/// Query string
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ServiceError))]
pub struct QueryParams<T>(pub T);

/// Parse a page number from the query string.
///
/// Values below 1 read as 1; anything that is not an integer is rejected
/// against `field`.
pub fn page_number(field: &str, raw: Option<&str>) -> Result<Option<u32>, ServiceError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    raw.parse::<i64>()
        .map(|n| Some(n.clamp(1, i64::from(u32::MAX)) as u32))
        .map_err(|_| ServiceError::validation(field, format!("The {} must be an integer.", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number_defaults_when_absent() {
        assert_eq!(page_number("page", None).unwrap(), None);
        assert_eq!(page_number("page", Some("  ")).unwrap(), None);
    }

    #[test]
    fn test_page_number_reads_small_values_as_one() {
        assert_eq!(page_number("page", Some("-1")).unwrap(), Some(1));
        assert_eq!(page_number("page", Some("0")).unwrap(), Some(1));
        assert_eq!(page_number("per_page", Some("25")).unwrap(), Some(25));
    }

    #[test]
    fn test_page_number_rejects_text() {
        match page_number("per_page", Some("ten")) {
            Err(ServiceError::Validation { field, .. }) => assert_eq!(field, "per_page"),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}
