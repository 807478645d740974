//! Administrative API: list, create and delete routes.
//!
//! Mutations hit the shared route table before the handler returns, then
//! queue a store write. The API never reaches past the table's public
//! `get_all` / `set` / `remove` surface.

mod validation;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::routing::RouteTable;
use crate::store::PersistQueue;

pub use validation::{CreateRoute, DeleteRoute, ValidationError};

/// Shared admin state.
#[derive(Clone)]
pub struct AdminState {
    pub routes: Arc<RouteTable>,
    pub persist: PersistQueue,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/api/v1/routes",
            get(list_routes)
                .post(create_route)
                .delete(delete_route)
                .fallback(api_not_found),
        )
        .route("/health", get(handle_health))
        .fallback(api_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "Error unmarshaling route from request body");
        error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    })
}

/// GET /api/v1/routes: every configured route keyed by origin.
async fn list_routes(State(state): State<AdminState>) -> Response {
    Json(state.routes.get_all()).into_response()
}

/// POST /api/v1/routes: create or replace the route for `from`.
async fn create_route(State(state): State<AdminState>, body: Bytes) -> Response {
    let request: CreateRoute = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let (key, entry) = match request.validate() {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!(error = %e, "Error validating route");
            return e.into_response();
        }
    };

    let span = router_tracing::admin_request_span!("set", key);
    let _enter = span.enter();

    state.routes.set(key.clone(), entry.clone());
    state.persist.submit("set", &key);

    span.record("status", StatusCode::OK.as_u16());
    tracing::info!(to = %entry.to, action = %entry.action, "Route set");
    Json(json!({ "from": key, "to": entry.to, "type": entry.action })).into_response()
}

/// DELETE /api/v1/routes: remove the route for `from`, if any.
async fn delete_route(State(state): State<AdminState>, body: Bytes) -> Response {
    let request: DeleteRoute = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let key = match request.validate() {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "Error validating route");
            return e.into_response();
        }
    };

    let span = router_tracing::admin_request_span!("remove", key);
    let _enter = span.enter();

    let existed = state.routes.exists(&key);
    state.routes.remove(&key);
    state.persist.submit("remove", &key);

    span.record("status", StatusCode::OK.as_u16());
    tracing::info!(existed, "Route removed");
    Json(json!({ "from": key })).into_response()
}

async fn api_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
