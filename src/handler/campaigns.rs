use crate::app::AppState;
use crate::campaign::{
    CampaignAction, CampaignError, ContactInput, apply_action, export_csv, import_contacts,
    parse_csv, process_batch,
    runner::{count_in_flight, count_pending},
    state::is_finished,
};
use crate::handler::{
    agents::find_owned_agent,
    bad_request, campaign_error, conflict,
    forms::{self, ListQuery},
    internal_error,
    middleware::auth::AuthUser,
    not_found,
};
use crate::models::{
    campaign::{
        ActiveModel as CampaignActiveModel, CampaignStatus, Column as CampaignColumn,
        Entity as CampaignEntity, Model as CampaignModel,
    },
    contact::{Column as ContactColumn, ContactStatus, Entity as ContactEntity},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const MAX_CONCURRENCY: i32 = 100;

#[derive(Debug, Deserialize)]
pub struct CampaignPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub agent_id: i64,
    #[serde(default)]
    pub concurrency_limit: Option<i32>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub agent_id: Option<i64>,
    pub concurrency_limit: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignFilters {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactFilters {
    #[serde(default)]
    pub status: Option<ContactStatus>,
}

/// Either a bare array of contacts or `{"contacts": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContactsPayload {
    List(Vec<ContactInput>),
    Wrapped { contacts: Vec<ContactInput> },
}

impl ContactsPayload {
    fn into_inputs(self) -> Vec<ContactInput> {
        match self {
            ContactsPayload::List(contacts) | ContactsPayload::Wrapped { contacts } => contacts,
        }
    }
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/campaigns/{id}",
            get(get_campaign)
                .patch(update_campaign)
                .delete(delete_campaign),
        )
        .route(
            "/campaigns/{id}/contacts",
            get(list_contacts).post(add_contacts),
        )
        .route("/campaigns/{id}/contacts/import", post(import_csv))
        .route("/campaigns/{id}/export", get(export_contacts))
        .route("/campaigns/{id}/{action}", post(campaign_action))
}

fn check_concurrency(limit: i32) -> Result<i32, Response> {
    if (1..=MAX_CONCURRENCY).contains(&limit) {
        Ok(limit)
    } else {
        Err(bad_request(format!(
            "concurrency_limit must be between 1 and {}",
            MAX_CONCURRENCY
        )))
    }
}

pub(crate) async fn find_owned_campaign(
    db: &DatabaseConnection,
    user_id: i64,
    id: i64,
) -> Result<Option<CampaignModel>, DbErr> {
    CampaignEntity::find_by_id(id)
        .filter(CampaignColumn::UserId.eq(user_id))
        .one(db)
        .await
}

/// Loads a campaign owned by `user_id`, or the 404/500 response.
async fn load_campaign(state: &AppState, user_id: i64, id: i64) -> Result<CampaignModel, Response> {
    match find_owned_campaign(&state.db, user_id, id).await {
        Ok(Some(campaign)) => Ok(campaign),
        Ok(None) => Err(not_found("Campaign")),
        Err(err) => Err(internal_error("load campaign", err)),
    }
}

async fn list_campaigns(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
    Query(filters): Query<CampaignFilters>,
) -> Response {
    let (_, per_page) = query.normalize();
    let mut selector = CampaignEntity::find().filter(CampaignColumn::UserId.eq(user.id));
    if let Some(status) = filters.status {
        selector = selector.filter(CampaignColumn::Status.eq(status));
    }
    let paginator = selector
        .order_by_desc(CampaignColumn::Id)
        .paginate(&state.db, per_page);
    match forms::paginate(paginator, &query).await {
        Ok(pagination) => Json(pagination).into_response(),
        Err(err) => internal_error("list campaigns", err),
    }
}

async fn create_campaign(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CampaignPayload>,
) -> Response {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return bad_request("Campaign name is required");
    }
    let concurrency_limit = match check_concurrency(payload.concurrency_limit.unwrap_or(1)) {
        Ok(limit) => limit,
        Err(response) => return response,
    };
    match find_owned_agent(&state.db, user.id, payload.agent_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return bad_request("Unknown agent"),
        Err(err) => return internal_error("load agent", err),
    }

    let now = Utc::now();
    let result = CampaignActiveModel {
        user_id: Set(user.id),
        agent_id: Set(payload.agent_id),
        name: Set(name),
        description: Set(payload.description.filter(|d| !d.trim().is_empty())),
        status: Set(CampaignStatus::Draft),
        concurrency_limit: Set(concurrency_limit),
        scheduled_at: Set(payload.scheduled_at),
        total_contacts: Set(0),
        calls_placed: Set(0),
        completed_calls: Set(0),
        failed_calls: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await;
    match result {
        Ok(campaign) => {
            info!(user_id = user.id, campaign_id = campaign.id, "campaign created");
            (StatusCode::CREATED, Json(campaign)).into_response()
        }
        Err(err) => internal_error("create campaign", err),
    }
}

async fn get_campaign(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    let pending = count_pending(&state.db, campaign.id).await;
    let in_flight = count_in_flight(&state.db, campaign.id).await;
    match (pending, in_flight) {
        (Ok(pending), Ok(in_flight)) => Json(json!({
            "campaign": campaign,
            "pending_contacts": pending,
            "in_flight_calls": in_flight,
        }))
        .into_response(),
        (Err(err), _) | (_, Err(err)) => internal_error("load campaign progress", err),
    }
}

async fn update_campaign(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<CampaignPatch>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    if is_finished(campaign.status) {
        return conflict("Finished campaigns cannot be edited");
    }

    let status = campaign.status;
    let mut active: CampaignActiveModel = campaign.into();
    if let Some(name) = patch.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return bad_request("Campaign name is required");
        }
        active.name = Set(name);
    }
    if let Some(description) = patch.description {
        let description = description.trim().to_string();
        active.description = Set(Some(description).filter(|d| !d.is_empty()));
    }
    if let Some(limit) = patch.concurrency_limit {
        match check_concurrency(limit) {
            Ok(limit) => active.concurrency_limit = Set(limit),
            Err(response) => return response,
        }
    }
    if let Some(agent_id) = patch.agent_id {
        if status == CampaignStatus::InProgress {
            return conflict("Pause the campaign before changing its agent");
        }
        match find_owned_agent(&state.db, user.id, agent_id).await {
            Ok(Some(_)) => active.agent_id = Set(agent_id),
            Ok(None) => return bad_request("Unknown agent"),
            Err(err) => return internal_error("load agent", err),
        }
    }
    if let Some(scheduled_at) = patch.scheduled_at {
        active.scheduled_at = Set(Some(scheduled_at));
    }
    active.updated_at = Set(Utc::now());
    match active.update(&state.db).await {
        Ok(campaign) => Json(campaign).into_response(),
        Err(err) => internal_error("update campaign", err),
    }
}

async fn delete_campaign(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    if campaign.status == CampaignStatus::InProgress {
        return conflict("Pause or cancel the campaign before deleting it");
    }
    let campaign_id = campaign.id;
    match campaign.delete(&state.db).await {
        Ok(_) => {
            info!(user_id = user.id, campaign_id, "campaign deleted");
            Json(json!({"status": "ok"})).into_response()
        }
        Err(err) => internal_error("delete campaign", err),
    }
}

async fn list_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
    Query(filters): Query<ContactFilters>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    let (_, per_page) = query.normalize();
    let mut selector = ContactEntity::find().filter(ContactColumn::CampaignId.eq(campaign.id));
    if let Some(status) = filters.status {
        selector = selector.filter(ContactColumn::Status.eq(status));
    }
    let paginator = selector
        .order_by_asc(ContactColumn::Id)
        .paginate(&state.db, per_page);
    match forms::paginate(paginator, &query).await {
        Ok(pagination) => Json(pagination).into_response(),
        Err(err) => internal_error("list contacts", err),
    }
}

async fn add_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<ContactsPayload>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    let inputs = payload.into_inputs();
    if inputs.is_empty() {
        return bad_request("No contacts supplied");
    }
    import_response(&state, &campaign, inputs).await
}

async fn import_csv(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    body: Bytes,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    let inputs = match parse_csv(&body) {
        Ok(inputs) => inputs,
        Err(err) => return bad_request(format!("Invalid CSV: {:#}", err)),
    };
    if inputs.is_empty() {
        return bad_request("CSV contains no contacts");
    }
    import_response(&state, &campaign, inputs).await
}

async fn import_response(
    state: &AppState,
    campaign: &CampaignModel,
    inputs: Vec<ContactInput>,
) -> Response {
    match import_contacts(
        &state.db,
        campaign,
        inputs,
        &state.config.default_country_code,
        Utc::now(),
    )
    .await
    {
        Ok(report) => Json(report).into_response(),
        Err(err) => campaign_error(err),
    }
}

async fn export_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    match export_csv(&state.db, campaign.id).await {
        Ok(body) => (
            [
                (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"campaign-{}.csv\"", campaign.id),
                ),
            ],
            body,
        )
            .into_response(),
        Err(err) => internal_error("export campaign", err),
    }
}

async fn campaign_action(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, action)): Path<(i64, String)>,
) -> Response {
    let campaign = match load_campaign(&state, user.id, id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    let now = Utc::now();

    if action == "process" {
        return match process_batch(
            &state.db,
            state.provider.as_ref(),
            &state.plans,
            campaign.id,
            now,
        )
        .await
        {
            Ok(report) => Json(json!({ "batch": report })).into_response(),
            Err(err) => campaign_error(err),
        };
    }

    let Some(action) = CampaignAction::parse(&action) else {
        return not_found("Action");
    };
    let result: Result<_, CampaignError> = apply_action(
        &state.db,
        state.provider.as_ref(),
        &state.plans,
        campaign,
        action,
        now,
    )
    .await;
    match result {
        Ok((campaign, batch)) => Json(json!({
            "campaign": campaign,
            "batch": batch,
        }))
        .into_response(),
        Err(err) => campaign_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contacts_payload_shapes() {
        let list: ContactsPayload =
            serde_json::from_str(r#"[{"name":"A","phone":"+14155550100"}]"#).unwrap();
        assert_eq!(list.into_inputs().len(), 1);
        let wrapped: ContactsPayload = serde_json::from_str(
            r#"{"contacts":[{"phone_number":"+14155550100"},{"phone_number":"+14155550101"}]}"#,
        )
        .unwrap();
        let inputs = wrapped.into_inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].phone_number, "+14155550101");
    }

    #[test]
    fn test_check_concurrency() {
        assert_eq!(check_concurrency(1).ok(), Some(1));
        assert_eq!(check_concurrency(100).ok(), Some(100));
        assert!(check_concurrency(0).is_err());
        assert!(check_concurrency(101).is_err());
    }
}
