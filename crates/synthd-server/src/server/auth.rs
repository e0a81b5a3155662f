//! API-key and IP-whitelist middleware for non-public endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::ApiError;
use super::http::AppState;

/// Rejects requests that miss the configured API key (401) or arrive from
/// an address outside the whitelist (403). Both checks are disabled when
/// their setting is unset, which keeps local development friction-free.
pub async fn guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(expected) = &state.config.api_key {
        let provided = req
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return ApiError::unauthorized().into_response();
        }
    }

    if !state.config.ip_whitelist.is_empty() {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string());
        let allowed = client_ip
            .as_deref()
            .is_some_and(|ip| state.config.ip_whitelist.iter().any(|entry| entry == ip));
        if !allowed {
            return ApiError::forbidden().into_response();
        }
    }

    next.run(req).await
}
