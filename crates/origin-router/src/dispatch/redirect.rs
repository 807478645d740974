//! Temporary redirect to a route's destination.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// `307 Temporary Redirect` to `location`. No backend is contacted.
pub fn redirect(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => {
            tracing::info!(location = %location, "Redirecting");
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, value)]).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, location = %location, "Redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
