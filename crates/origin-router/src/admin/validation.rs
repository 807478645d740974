//! Admin request bodies and their validation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::routing::{RouteAction, RouteEntry};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("field {field:?} is empty")]
    EmptyField { field: &'static str },

    #[error("route type {action:?} is invalid, expected \"redirect\" or \"proxy\"")]
    InvalidAction { action: String },
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        super::error_response(StatusCode::BAD_REQUEST, self.to_string())
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, ValidationError> {
    match value.trim() {
        "" => Err(ValidationError::EmptyField { field }),
        trimmed => Ok(trimmed.to_string()),
    }
}

/// Body of `POST /api/v1/routes`.
#[derive(Debug, Deserialize)]
pub struct CreateRoute {
    #[serde(default, alias = "From")]
    pub from: String,
    #[serde(default, alias = "To")]
    pub to: String,
    #[serde(default, rename = "type", alias = "Type")]
    pub action: String,
}

impl CreateRoute {
    /// Trimmed origin key and the entry to store under it.
    pub fn validate(&self) -> Result<(String, RouteEntry), ValidationError> {
        let from = non_empty(&self.from, "from")?;
        let to = non_empty(&self.to, "to")?;
        let action = match self.action.as_str() {
            "redirect" => RouteAction::Redirect,
            "proxy" => RouteAction::Proxy,
            other => {
                return Err(ValidationError::InvalidAction {
                    action: other.to_string(),
                })
            }
        };
        Ok((from, RouteEntry::new(to, action)))
    }
}

/// Body of `DELETE /api/v1/routes`.
#[derive(Debug, Deserialize)]
pub struct DeleteRoute {
    #[serde(default, alias = "From")]
    pub from: String,
}

impl DeleteRoute {
    pub fn validate(&self) -> Result<String, ValidationError> {
        non_empty(&self.from, "from")
    }
}
