use crate::app::AppState;
use crate::billing::usage::{UsageSnapshot, refresh_period, summarize};
use crate::handler::{internal_error, middleware::auth::AuthUser};
use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/usage", get(current_usage))
}

async fn list_plans(State(state): State<AppState>) -> Response {
    Json(json!({
        "currency": state.config.payment.currency,
        "items": state.plans.plans(),
    }))
    .into_response()
}

async fn current_usage(State(state): State<AppState>, AuthUser(user): AuthUser) -> Response {
    let user = match refresh_period(&state.db, user, Utc::now()).await {
        Ok(user) => user,
        Err(err) => return internal_error("refresh billing period", err),
    };
    let snapshot = UsageSnapshot::from(&user);
    Json(summarize(&snapshot, state.plans.get(&user.plan))).into_response()
}
