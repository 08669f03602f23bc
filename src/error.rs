use log::error;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

/// Everything a handler can refuse a request with.
///
/// Store failures convert with `?`; the rest are constructed at the point the
/// request is rejected, before any mutation has happened.
#[derive(Error, Debug)]
pub enum ApiError {
    /// A bus, stop, route, schedule entry or user that does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Refused because the request contradicts current data (stop not in the
    /// bus's route, stop still referenced, duplicate schedule slot).
    #[error("{0}")]
    InvalidState(String),
    /// Missing or malformed input, rejected before touching storage.
    #[error("{0}")]
    Validation(String),
    /// Missing, invalid or expired session token.
    #[error("{0}")]
    Unauthorized(String),
    /// Valid session, wrong role or refused operation.
    #[error("{0}")]
    Forbidden(String),
    /// Resource already exists.
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidState(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for ApiError {}

/// Turn any error convertible to [`ApiError`] into a warp rejection, so
/// handlers can write `store_call().map_err(reject)?`.
pub fn reject(err: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(err.into())
}

/// Top-level rejection recovery: every error leaves the server as a JSON
/// `{"message": ...}` body with the taxonomy's status code.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(api) = err.find::<ApiError>() {
        match api {
            ApiError::Db(db) => {
                error!("store failure: {db}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            other => (other.status(), other.to_string()),
        }
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "Invalid request body".to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query parameters".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": message })),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::NotFound("Bus route not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Forbidden("You are not assigned to this bus".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Validation("Latitude and longitude are required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("user already exists".into()).status(),
            StatusCode::CONFLICT
        );
    }
}
