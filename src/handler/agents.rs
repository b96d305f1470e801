use crate::app::AppState;
use crate::handler::{
    bad_request, conflict, forbidden, internal_error, json_error, middleware::auth::AuthUser,
    not_found,
};
use crate::models::{
    agent::{
        ActiveModel as AgentActiveModel, Column as AgentColumn, Entity as AgentEntity,
        Model as AgentModel,
    },
    call_record::{CallStatus, Column as CallColumn, Entity as CallEntity},
    campaign::{CampaignStatus, Column as CampaignColumn, Entity as CampaignEntity},
};
use crate::provider::AgentSpec;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Deserialize)]
pub struct AgentPayload {
    pub name: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

/// Absent fields are left alone; an empty string clears an optional field.
#[derive(Debug, Default, Deserialize)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub voice_id: Option<String>,
    pub language: Option<String>,
    pub first_message: Option<String>,
    pub system_prompt: Option<String>,
    pub llm: Option<String>,
    pub phone_number_id: Option<String>,
    pub is_active: Option<bool>,
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/{id}",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) async fn find_owned_agent(
    db: &DatabaseConnection,
    user_id: i64,
    id: i64,
) -> Result<Option<AgentModel>, DbErr> {
    AgentEntity::find_by_id(id)
        .filter(AgentColumn::UserId.eq(user_id))
        .one(db)
        .await
}

async fn list_agents(State(state): State<AppState>, AuthUser(user): AuthUser) -> Response {
    match AgentEntity::find()
        .filter(AgentColumn::UserId.eq(user.id))
        .order_by_asc(AgentColumn::Id)
        .all(&state.db)
        .await
    {
        Ok(agents) => Json(json!({ "items": agents })).into_response(),
        Err(err) => internal_error("list agents", err),
    }
}

async fn create_agent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<AgentPayload>,
) -> Response {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return bad_request("Agent name is required");
    }
    let Some(plan) = state.plans.get(&user.plan) else {
        return forbidden(format!("Plan '{}' is not available", user.plan));
    };
    // Archived agents have no provider mirror and do not count.
    let existing = match AgentEntity::find()
        .filter(AgentColumn::UserId.eq(user.id))
        .filter(AgentColumn::ProviderAgentId.is_not_null())
        .count(&state.db)
        .await
    {
        Ok(count) => count,
        Err(err) => return internal_error("count agents", err),
    };
    if existing >= plan.max_agents as u64 {
        return forbidden(format!(
            "The {} plan allows at most {} agents",
            plan.name, plan.max_agents
        ));
    }

    let spec = AgentSpec {
        name: name.clone(),
        voice_id: non_empty(payload.voice_id),
        language: non_empty(payload.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        first_message: non_empty(payload.first_message),
        system_prompt: non_empty(payload.system_prompt),
        llm: non_empty(payload.llm),
    };
    let provider_agent_id = match state.provider.create_agent(&spec).await {
        Ok(id) => id,
        Err(err) => {
            warn!(user_id = user.id, "failed to create provider agent: {}", err);
            return json_error(
                StatusCode::BAD_GATEWAY,
                "Voice provider rejected the agent",
            );
        }
    };

    let now = Utc::now();
    let result = AgentActiveModel {
        user_id: Set(user.id),
        name: Set(spec.name),
        provider_agent_id: Set(Some(provider_agent_id.clone())),
        voice_id: Set(spec.voice_id),
        language: Set(spec.language),
        first_message: Set(spec.first_message),
        system_prompt: Set(spec.system_prompt),
        llm: Set(spec.llm),
        phone_number_id: Set(non_empty(payload.phone_number_id)),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await;

    match result {
        Ok(agent) => {
            info!(user_id = user.id, agent_id = agent.id, %provider_agent_id, "agent created");
            (StatusCode::CREATED, Json(agent)).into_response()
        }
        Err(err) => {
            if let Err(cleanup) = state.provider.delete_agent(&provider_agent_id).await {
                warn!(%provider_agent_id, "failed to remove orphaned provider agent: {}", cleanup);
            }
            internal_error("create agent", err)
        }
    }
}

async fn get_agent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    match find_owned_agent(&state.db, user.id, id).await {
        Ok(Some(agent)) => Json(agent).into_response(),
        Ok(None) => not_found("Agent"),
        Err(err) => internal_error("load agent", err),
    }
}

async fn update_agent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<AgentPatch>,
) -> Response {
    let agent = match find_owned_agent(&state.db, user.id, id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => return not_found("Agent"),
        Err(err) => return internal_error("load agent", err),
    };
    if agent.provider_agent_id.is_none() {
        return conflict("Agent is archived");
    }

    let mut next = agent.clone();
    if let Some(name) = patch.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return bad_request("Agent name is required");
        }
        next.name = name;
    }
    if let Some(language) = patch.language {
        next.language = non_empty(Some(language)).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    }
    if patch.voice_id.is_some() {
        next.voice_id = non_empty(patch.voice_id);
    }
    if patch.first_message.is_some() {
        next.first_message = non_empty(patch.first_message);
    }
    if patch.system_prompt.is_some() {
        next.system_prompt = non_empty(patch.system_prompt);
    }
    if patch.llm.is_some() {
        next.llm = non_empty(patch.llm);
    }
    if patch.phone_number_id.is_some() {
        next.phone_number_id = non_empty(patch.phone_number_id);
    }
    if let Some(is_active) = patch.is_active {
        next.is_active = is_active;
    }

    let spec = AgentSpec::from(&next);
    if spec != AgentSpec::from(&agent) {
        if let Some(provider_agent_id) = agent.provider_agent_id.as_deref() {
            if let Err(err) = state.provider.update_agent(provider_agent_id, &spec).await {
                warn!(agent_id = agent.id, "failed to update provider agent: {}", err);
                return json_error(
                    StatusCode::BAD_GATEWAY,
                    "Voice provider rejected the update",
                );
            }
        }
    }

    let mut active: AgentActiveModel = agent.into();
    active.name = Set(next.name);
    active.voice_id = Set(next.voice_id);
    active.language = Set(next.language);
    active.first_message = Set(next.first_message);
    active.system_prompt = Set(next.system_prompt);
    active.llm = Set(next.llm);
    active.phone_number_id = Set(next.phone_number_id);
    active.is_active = Set(next.is_active);
    active.updated_at = Set(Utc::now());
    match active.update(&state.db).await {
        Ok(agent) => Json(agent).into_response(),
        Err(err) => internal_error("update agent", err),
    }
}

async fn delete_agent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    let agent = match find_owned_agent(&state.db, user.id, id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => return not_found("Agent"),
        Err(err) => return internal_error("load agent", err),
    };

    let in_flight = CallEntity::find()
        .filter(CallColumn::AgentId.eq(agent.id))
        .filter(CallColumn::Status.is_in(CallStatus::in_flight()))
        .count(&state.db)
        .await;
    match in_flight {
        Ok(0) => {}
        Ok(_) => return conflict("Agent has calls in progress"),
        Err(err) => return internal_error("check agent calls", err),
    }
    let unfinished = CampaignEntity::find()
        .filter(CampaignColumn::AgentId.eq(agent.id))
        .filter(CampaignColumn::Status.is_in([
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::InProgress,
            CampaignStatus::Paused,
        ]))
        .count(&state.db)
        .await;
    match unfinished {
        Ok(0) => {}
        Ok(_) => return conflict("Agent is used by an unfinished campaign"),
        Err(err) => return internal_error("check agent campaigns", err),
    }
    let history = match has_history(&state.db, agent.id).await {
        Ok(history) => history,
        Err(err) => return internal_error("check agent history", err),
    };

    if let Some(provider_agent_id) = agent.provider_agent_id.as_deref() {
        // The local row is removed or archived even when the provider call fails.
        if let Err(err) = state.provider.delete_agent(provider_agent_id).await {
            warn!(agent_id = agent.id, "failed to delete provider agent: {}", err);
        }
    }
    let agent_id = agent.id;

    // Calls and campaigns keep referencing the agent, so it is archived
    // instead of deleted once it has any.
    if history {
        let mut active: AgentActiveModel = agent.into();
        active.provider_agent_id = Set(None);
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        return match active.update(&state.db).await {
            Ok(_) => {
                info!(user_id = user.id, agent_id, "agent archived");
                Json(json!({"status": "archived"})).into_response()
            }
            Err(err) => internal_error("archive agent", err),
        };
    }
    match agent.delete(&state.db).await {
        Ok(_) => {
            info!(user_id = user.id, agent_id, "agent deleted");
            Json(json!({"status": "deleted"})).into_response()
        }
        Err(err) => internal_error("delete agent", err),
    }
}

async fn has_history(db: &DatabaseConnection, agent_id: i64) -> Result<bool, DbErr> {
    let calls = CallEntity::find()
        .filter(CallColumn::AgentId.eq(agent_id))
        .count(db)
        .await?;
    if calls > 0 {
        return Ok(true);
    }
    let campaigns = CampaignEntity::find()
        .filter(CampaignColumn::AgentId.eq(agent_id))
        .count(db)
        .await?;
    Ok(campaigns > 0)
}
