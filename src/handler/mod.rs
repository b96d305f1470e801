use crate::app::AppState;
use crate::campaign::CampaignError;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::fmt::Display;
use tracing::warn;

pub mod agents;
pub mod auth;
pub mod billing;
pub mod calls;
pub mod campaigns;
pub mod forms;
pub mod middleware;
pub mod tickets;
pub mod usage;
pub mod webhook;

/// Routes mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::urls())
        .merge(agents::urls())
        .merge(campaigns::urls())
        .merge(calls::urls())
        .merge(usage::urls())
        .merge(billing::urls())
        .merge(tickets::urls())
        .merge(webhook::urls())
}

async fn health() -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "Authentication required")
}

pub(crate) fn forbidden(message: impl Into<String>) -> Response {
    json_error(StatusCode::FORBIDDEN, message)
}

pub(crate) fn not_found(what: &str) -> Response {
    json_error(StatusCode::NOT_FOUND, format!("{} not found", what))
}

pub(crate) fn conflict(message: impl Into<String>) -> Response {
    json_error(StatusCode::CONFLICT, message)
}

pub(crate) fn payment_required(message: impl Into<String>) -> Response {
    json_error(StatusCode::PAYMENT_REQUIRED, message)
}

/// Logs `err` and answers 500 with a message that does not leak it.
pub(crate) fn internal_error(action: &str, err: impl Display) -> Response {
    warn!("failed to {}: {}", action, err);
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to {}", action),
    )
}

pub(crate) fn campaign_error(err: CampaignError) -> Response {
    match err {
        CampaignError::InvalidTransition { .. }
        | CampaignError::ContactsLocked
        | CampaignError::NotRunning(_) => conflict(err.to_string()),
        CampaignError::NoContacts | CampaignError::AgentNotReady(_) => {
            bad_request(err.to_string())
        }
        CampaignError::NotFound => not_found("Campaign"),
        CampaignError::Internal(err) => internal_error("process campaign", err),
    }
}
