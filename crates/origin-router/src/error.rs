//! Per-request dispatch failures and their client-visible statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::routing::{AddressError, RouteAction};

/// A dispatch that ended without relaying a backend response.
///
/// None of these touch the route table; each one costs exactly one error
/// response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("error parsing remote address: {0}")]
    AddressParse(#[from] AddressError),

    #[error("no route configured for host {peer:?}")]
    NoRouteMatched {
        peer: String,
        candidates: Vec<String>,
    },

    #[error("unknown route type {action:?} for key {key:?}")]
    UnknownActionKind { key: String, action: RouteAction },

    #[error("error creating request to {url:?}: {source}")]
    OutboundRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error getting content at {url:?}: {source}")]
    OutboundTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::AddressParse(_) | DispatchError::UnknownActionKind { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DispatchError::NoRouteMatched { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::OutboundRequest { .. } | DispatchError::OutboundTransport { .. } => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn log(&self) {
        match self {
            DispatchError::NoRouteMatched { peer, candidates } => tracing::warn!(
                error = %self,
                peer = %peer,
                candidates = ?candidates,
                "Unmatched peer"
            ),
            DispatchError::UnknownActionKind { .. } => {
                tracing::error!(error = %self, "Route table holds an invalid action")
            }
            _ => tracing::error!(error = %self, "Dispatch failed"),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        self.log();
        self.status().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let parse = DispatchError::AddressParse(AddressError::MissingHost {
            address: "http://".to_string(),
        });
        assert_eq!(parse.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let unmatched = DispatchError::NoRouteMatched {
            peer: "10.9.9.9:1".to_string(),
            candidates: vec!["10.9.9.9:1".to_string(), "10.9.9.9".to_string()],
        };
        assert_eq!(unmatched.status(), StatusCode::BAD_GATEWAY);

        let unknown = DispatchError::UnknownActionKind {
            key: "k".to_string(),
            action: RouteAction::Unknown,
        };
        assert_eq!(unknown.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_response_has_empty_body() {
        let response = DispatchError::NoRouteMatched {
            peer: "10.9.9.9:1".to_string(),
            candidates: Vec::new(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get("location").is_none());
    }
}
