use crate::app::AppState;
use crate::handler::{
    bad_request, conflict,
    forms::{self, ListQuery},
    internal_error,
    middleware::auth::{AuthUser, StaffUser},
    not_found,
};
use crate::models::{
    ticket::{
        ActiveModel as TicketActiveModel, Column as TicketColumn, Entity as TicketEntity,
        Model as TicketModel, TicketPriority, TicketStatus,
    },
    ticket_message::{
        ActiveModel as MessageActiveModel, Column as MessageColumn, Entity as MessageEntity,
    },
    user::Model as UserModel,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const MAX_SUBJECT_LEN: usize = 200;
const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Deserialize)]
pub struct TicketPayload {
    pub subject: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketPatch {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilters {
    #[serde(default)]
    pub status: Option<TicketStatus>,
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route("/tickets/{id}", get(get_ticket).patch(update_ticket))
        .route("/tickets/{id}/messages", post(add_message))
}

/// Staff reach every ticket, everyone else only their own.
async fn find_visible_ticket(
    db: &DatabaseConnection,
    user: &UserModel,
    id: i64,
) -> Result<Option<TicketModel>, DbErr> {
    let mut query = TicketEntity::find_by_id(id);
    if !user.is_staff {
        query = query.filter(TicketColumn::UserId.eq(user.id));
    }
    query.one(db).await
}

/// Status after a new message: a staff reply picks an open ticket up, a
/// customer reply reopens a resolved one.
fn status_after_message(current: TicketStatus, from_staff: bool) -> TicketStatus {
    match (current, from_staff) {
        (TicketStatus::Open, true) => TicketStatus::InProgress,
        (TicketStatus::Resolved, false) => TicketStatus::Open,
        (status, _) => status,
    }
}

async fn ticket_with_messages(db: &DatabaseConnection, ticket: TicketModel) -> Response {
    let messages = MessageEntity::find()
        .filter(MessageColumn::TicketId.eq(ticket.id))
        .order_by_asc(MessageColumn::CreatedAt)
        .order_by_asc(MessageColumn::Id)
        .all(db)
        .await;
    match messages {
        Ok(messages) => Json(json!({
            "ticket": ticket,
            "messages": messages,
        }))
        .into_response(),
        Err(err) => internal_error("load ticket messages", err),
    }
}

async fn list_tickets(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
    Query(filters): Query<TicketFilters>,
) -> Response {
    let (_, per_page) = query.normalize();
    let mut selector = TicketEntity::find();
    if !user.is_staff {
        selector = selector.filter(TicketColumn::UserId.eq(user.id));
    }
    if let Some(status) = filters.status {
        selector = selector.filter(TicketColumn::Status.eq(status));
    }
    let paginator = selector
        .order_by_desc(TicketColumn::UpdatedAt)
        .order_by_desc(TicketColumn::Id)
        .paginate(&state.db, per_page);
    match forms::paginate(paginator, &query).await {
        Ok(pagination) => Json(pagination).into_response(),
        Err(err) => internal_error("list tickets", err),
    }
}

async fn insert_ticket(
    db: &DatabaseConnection,
    user: &UserModel,
    payload: TicketPayload,
    now: DateTime<Utc>,
) -> Result<TicketModel, DbErr> {
    let txn = db.begin().await?;
    let ticket = TicketActiveModel {
        user_id: Set(user.id),
        subject: Set(payload.subject.trim().to_string()),
        category: Set(payload
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())),
        priority: Set(payload.priority.unwrap_or(TicketPriority::Medium)),
        status: Set(TicketStatus::Open),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    MessageActiveModel {
        ticket_id: Set(ticket.id),
        author_id: Set(user.id),
        from_staff: Set(user.is_staff),
        body: Set(payload.message.trim().to_string()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    Ok(ticket)
}

async fn create_ticket(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<TicketPayload>,
) -> Response {
    let subject_len = payload.subject.trim().chars().count();
    if subject_len == 0 || subject_len > MAX_SUBJECT_LEN {
        return bad_request("Subject must be between 1 and 200 characters");
    }
    if payload.message.trim().is_empty() {
        return bad_request("Message is required");
    }
    match insert_ticket(&state.db, &user, payload, Utc::now()).await {
        Ok(ticket) => {
            info!(user_id = user.id, ticket_id = ticket.id, "support ticket opened");
            (StatusCode::CREATED, Json(ticket)).into_response()
        }
        Err(err) => internal_error("create ticket", err),
    }
}

async fn get_ticket(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Response {
    match find_visible_ticket(&state.db, &user, id).await {
        Ok(Some(ticket)) => ticket_with_messages(&state.db, ticket).await,
        Ok(None) => not_found("Ticket"),
        Err(err) => internal_error("load ticket", err),
    }
}

async fn update_ticket(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(id): Path<i64>,
    Json(patch): Json<TicketPatch>,
) -> Response {
    let ticket = match find_visible_ticket(&state.db, &staff, id).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => return not_found("Ticket"),
        Err(err) => return internal_error("load ticket", err),
    };
    let mut active: TicketActiveModel = ticket.into();
    if let Some(status) = patch.status {
        active.status = Set(status);
    }
    if let Some(priority) = patch.priority {
        active.priority = Set(priority);
    }
    if let Some(category) = patch.category.map(|c| c.trim().to_lowercase()) {
        if category.is_empty() {
            return bad_request("Category must not be empty");
        }
        active.category = Set(category);
    }
    active.updated_at = Set(Utc::now());
    match active.update(&state.db).await {
        Ok(ticket) => {
            info!(staff_id = staff.id, ticket_id = ticket.id, "support ticket updated");
            Json(ticket).into_response()
        }
        Err(err) => internal_error("update ticket", err),
    }
}

async fn add_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<MessagePayload>,
) -> Response {
    let body = payload.body.trim().to_string();
    if body.is_empty() {
        return bad_request("Message is required");
    }
    let ticket = match find_visible_ticket(&state.db, &user, id).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => return not_found("Ticket"),
        Err(err) => return internal_error("load ticket", err),
    };
    if ticket.status == TicketStatus::Closed {
        return conflict("Ticket is closed");
    }

    let now = Utc::now();
    let next_status = status_after_message(ticket.status, user.is_staff);
    let result = async {
        let txn = state.db.begin().await?;
        MessageActiveModel {
            ticket_id: Set(ticket.id),
            author_id: Set(user.id),
            from_staff: Set(user.is_staff),
            body: Set(body),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        let mut active: TicketActiveModel = ticket.into();
        active.status = Set(next_status);
        active.updated_at = Set(now);
        let ticket = active.update(&txn).await?;
        txn.commit().await?;
        Ok::<_, DbErr>(ticket)
    }
    .await;

    match result {
        Ok(ticket) => ticket_with_messages(&state.db, ticket).await,
        Err(err) => internal_error("add ticket message", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_after_message() {
        assert_eq!(
            status_after_message(TicketStatus::Open, true),
            TicketStatus::InProgress
        );
        assert_eq!(
            status_after_message(TicketStatus::Open, false),
            TicketStatus::Open
        );
        assert_eq!(
            status_after_message(TicketStatus::Resolved, false),
            TicketStatus::Open
        );
        assert_eq!(
            status_after_message(TicketStatus::Resolved, true),
            TicketStatus::Resolved
        );
    }
}
