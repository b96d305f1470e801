use crate::app::AppState;
use crate::handler::{bad_request, internal_error, json_error};
use crate::webhook::{
    SIGNATURE_HEADER, WebhookContext, WebhookEvent, handle_event, verify_signature,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use tracing::{info, warn};

pub fn urls() -> Router<AppState> {
    Router::new().route("/webhooks/voice", post(voice_webhook))
}

/// Post-call events from the voice provider. The raw body is needed for the
/// signature, so it is parsed only after verification.
async fn voice_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    if state.config.provider.webhook_secret.is_empty() {
        warn!("voice webhook received but no webhook secret is configured");
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Webhook secret is not configured",
        );
    }
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(err) = verify_signature(
        signature,
        &body,
        &state.config.provider.webhook_secret,
        state.config.provider.webhook_tolerance_secs,
        now.timestamp(),
    ) {
        warn!("rejected voice webhook: {}", err);
        return json_error(StatusCode::UNAUTHORIZED, err.to_string());
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(err) => return bad_request(format!("{:#}", err)),
    };
    let ctx = WebhookContext {
        db: &state.db,
        plans: &state.plans,
        currency: &state.config.payment.currency,
        classifier: state.classifier.as_deref(),
    };
    match handle_event(&ctx, &event, now).await {
        Ok(outcome) => {
            info!(event = event.kind(), ?outcome, "voice webhook handled");
            Json(outcome).into_response()
        }
        Err(err) => internal_error("handle voice webhook", format!("{:#}", err)),
    }
}
