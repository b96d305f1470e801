use crate::app::AppState;
use crate::billing::usage::{UsageSnapshot, check_call_permitted, refresh_period};
use crate::campaign::normalize_phone;
use crate::handler::{
    agents::find_owned_agent,
    bad_request, conflict,
    forms::{self, ListQuery},
    internal_error, json_error,
    middleware::auth::AuthUser,
    not_found, payment_required,
};
use crate::models::call_record::{
    ActiveModel as CallActiveModel, CallDirection, CallStatus, Column as CallColumn,
    Entity as CallEntity,
};
use crate::provider::OutboundCallRequest;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallFilters {
    #[serde(default)]
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub status: Option<CallStatus>,
    #[serde(default)]
    pub direction: Option<CallDirection>,
}

#[derive(Debug, Deserialize)]
pub struct OutboundCallPayload {
    pub agent_id: i64,
    #[serde(alias = "phone_number")]
    pub to_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/calls", get(list_calls))
        .route("/calls/outbound", post(place_outbound_call))
        .route("/calls/{id}", get(get_call))
}

async fn list_calls(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
    Query(filters): Query<CallFilters>,
) -> Response {
    let (_, per_page) = query.normalize();
    let mut selector = CallEntity::find().filter(CallColumn::UserId.eq(user.id));
    if let Some(campaign_id) = filters.campaign_id {
        selector = selector.filter(CallColumn::CampaignId.eq(campaign_id));
    }
    if let Some(agent_id) = filters.agent_id {
        selector = selector.filter(CallColumn::AgentId.eq(agent_id));
    }
    if let Some(status) = filters.status {
        selector = selector.filter(CallColumn::Status.eq(status));
    }
    if let Some(direction) = filters.direction {
        selector = selector.filter(CallColumn::Direction.eq(direction));
    }
    let paginator = selector
        .order_by_desc(CallColumn::StartedAt)
        .order_by_desc(CallColumn::Id)
        .paginate(&state.db, per_page);
    match forms::paginate(paginator, &query).await {
        Ok(pagination) => Json(pagination).into_response(),
        Err(err) => internal_error("list calls", err),
    }
}

async fn get_call(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    let call = CallEntity::find_by_id(id)
        .filter(CallColumn::UserId.eq(user.id))
        .one(&state.db)
        .await;
    match call {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => not_found("Call"),
        Err(err) => internal_error("load call", err),
    }
}

/// Places a single call outside any campaign, subject to the same usage and
/// concurrency limits.
async fn place_outbound_call(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<OutboundCallPayload>,
) -> Response {
    let agent = match find_owned_agent(&state.db, user.id, payload.agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => return not_found("Agent"),
        Err(err) => return internal_error("load agent", err),
    };
    if !agent.can_place_calls() {
        return bad_request("Agent is not ready to place calls");
    }
    let Some(to_number) = normalize_phone(&payload.to_number, &state.config.default_country_code)
    else {
        return bad_request("Invalid phone number");
    };

    let now = Utc::now();
    let user = match refresh_period(&state.db, user, now).await {
        Ok(user) => user,
        Err(err) => return internal_error("refresh billing period", err),
    };
    let plan = state.plans.get(&user.plan);
    if let Err(denied) = check_call_permitted(&UsageSnapshot::from(&user), plan) {
        return payment_required(denied.to_string());
    }

    let max_concurrent = plan.map(|p| p.max_concurrent_calls).unwrap_or(1).max(1);
    let in_flight = CallEntity::find()
        .filter(CallColumn::UserId.eq(user.id))
        .filter(CallColumn::Status.is_in(CallStatus::in_flight()))
        .count(&state.db)
        .await;
    match in_flight {
        Ok(n) if n >= max_concurrent as u64 => {
            return conflict(format!(
                "Concurrent call limit of {} reached",
                max_concurrent
            ));
        }
        Ok(_) => {}
        Err(err) => return internal_error("count active calls", err),
    }

    let mut dynamic_variables = payload.variables;
    if let Some(name) = payload.name.filter(|n| !n.trim().is_empty()) {
        dynamic_variables.insert("name".into(), Value::String(name));
    }
    dynamic_variables.insert("phone_number".into(), Value::String(to_number.clone()));
    let request = OutboundCallRequest {
        provider_agent_id: agent.provider_agent_id.clone().unwrap_or_default(),
        phone_number_id: agent.phone_number_id.clone().unwrap_or_default(),
        to_number: to_number.clone(),
        dynamic_variables,
    };

    let mut call = CallActiveModel {
        user_id: Set(user.id),
        agent_id: Set(agent.id),
        direction: Set(CallDirection::Outbound),
        to_number: Set(Some(to_number)),
        started_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let placed = state.provider.place_call(&request).await;
    match &placed {
        Ok(response) => {
            call.status = Set(CallStatus::Initiated);
            call.conversation_id = Set(response.conversation_id.clone());
            call.call_sid = Set(response.call_sid.clone());
        }
        Err(err) => {
            warn!(user_id = user.id, agent_id = agent.id, "failed to place call: {}", err);
            call.status = Set(CallStatus::Failed);
            call.error = Set(Some(err.to_string()));
            call.ended_at = Set(Some(now));
        }
    }
    let call = match call.insert(&state.db).await {
        Ok(call) => call,
        Err(err) => return internal_error("record call", err),
    };

    if placed.is_err() {
        return json_error(StatusCode::BAD_GATEWAY, "Voice provider could not place the call");
    }
    info!(
        user_id = user.id,
        call_id = call.id,
        conversation_id = call.conversation_id.as_deref().unwrap_or("-"),
        "outbound call placed"
    );
    (StatusCode::CREATED, Json(call)).into_response()
}
