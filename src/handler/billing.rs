use crate::app::AppState;
use crate::billing::payment::{
    OrderRequest, PaymentError, confirm_payment, create_plan_order, create_topup_order,
    list_transactions,
};
use crate::handler::{
    bad_request, forbidden, internal_error, json_error, middleware::auth::AuthUser, not_found,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentPayload {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/billing/orders", post(create_order))
        .route("/billing/verify", post(verify_payment))
        .route("/billing/transactions", get(transactions))
}

fn payment_error(err: PaymentError) -> Response {
    match err {
        PaymentError::InvalidAmount | PaymentError::UnknownPlan(_) => {
            bad_request(err.to_string())
        }
        PaymentError::OrderNotFound => not_found("Order"),
        PaymentError::SignatureMismatch => forbidden(err.to_string()),
        PaymentError::Gateway(err) => {
            warn!("payment gateway request failed: {:#}", err);
            json_error(StatusCode::BAD_GATEWAY, "Payment gateway is unavailable")
        }
        PaymentError::Internal(err) => internal_error("process payment", err),
    }
}

async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<OrderRequest>,
) -> Response {
    let currency = &state.config.payment.currency;
    let gateway = state.gateway.as_ref();
    let result = match request {
        OrderRequest::Topup { amount } => {
            create_topup_order(&state.db, gateway, &state.plans, currency, &user, amount).await
        }
        OrderRequest::Plan { plan } => {
            create_plan_order(&state.db, gateway, &state.plans, currency, &user, &plan).await
        }
    };
    match result {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(err) => payment_error(err),
    }
}

async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<VerifyPaymentPayload>,
) -> Response {
    match confirm_payment(
        &state.db,
        state.gateway.as_ref(),
        user.id,
        &payload.order_id,
        &payload.payment_id,
        &payload.signature,
        Utc::now(),
    )
    .await
    {
        Ok(transaction) => Json(transaction).into_response(),
        Err(err) => payment_error(err),
    }
}

async fn transactions(State(state): State<AppState>, AuthUser(user): AuthUser) -> Response {
    match list_transactions(&state.db, user.id).await {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => internal_error("list transactions", err),
    }
}
