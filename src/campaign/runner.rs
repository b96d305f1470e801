use super::state::{CampaignAction, CampaignError, transition};
use crate::billing::{
    PlanCatalog,
    usage::{UsageSnapshot, check_call_permitted, refresh_period},
};
use crate::models::{
    agent::{Entity as AgentEntity, Model as AgentModel},
    call_record::{
        ActiveModel as CallActiveModel, CallDirection, CallStatus, Column as CallColumn,
        Entity as CallEntity,
    },
    campaign::{
        ActiveModel as CampaignActiveModel, CampaignStatus, Entity as CampaignEntity,
        Model as CampaignModel,
    },
    contact::{
        ActiveModel as ContactActiveModel, Column as ContactColumn, ContactStatus,
        Entity as ContactEntity, Model as ContactModel,
    },
    user::Entity as UserEntity,
};
use crate::provider::{OutboundCallRequest, VoiceProvider};
use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub slots: u32,
    pub attempted: u32,
    pub placed: u32,
    pub failed: u32,
    pub in_flight: u64,
    pub remaining: u64,
    /// Set when usage limits paused the campaign.
    pub paused_reason: Option<String>,
}

/// Contact ids that already have a call in this campaign.
async fn dialled_contact_ids<C: ConnectionTrait>(
    db: &C,
    campaign_id: i64,
) -> anyhow::Result<Vec<i64>> {
    let ids: Vec<Option<i64>> = CallEntity::find()
        .select_only()
        .column(CallColumn::ContactId)
        .filter(CallColumn::CampaignId.eq(campaign_id))
        .filter(CallColumn::ContactId.is_not_null())
        .into_tuple()
        .all(db)
        .await
        .context("failed to load dialled contacts")?;
    Ok(ids.into_iter().flatten().collect())
}

/// Contacts without a call record in the campaign, in insertion order.
pub async fn pending_contacts<C: ConnectionTrait>(
    db: &C,
    campaign_id: i64,
    limit: Option<u64>,
) -> anyhow::Result<Vec<ContactModel>> {
    let dialled = dialled_contact_ids(db, campaign_id).await?;
    let mut query = ContactEntity::find()
        .filter(ContactColumn::CampaignId.eq(campaign_id))
        .filter(ContactColumn::Status.ne(ContactStatus::Skipped));
    if !dialled.is_empty() {
        query = query.filter(ContactColumn::Id.is_not_in(dialled));
    }
    query
        .order_by_asc(ContactColumn::Id)
        .limit(limit)
        .all(db)
        .await
        .context("failed to load pending contacts")
}

pub async fn count_pending<C: ConnectionTrait>(db: &C, campaign_id: i64) -> anyhow::Result<u64> {
    let dialled = dialled_contact_ids(db, campaign_id).await?;
    let mut query = ContactEntity::find()
        .filter(ContactColumn::CampaignId.eq(campaign_id))
        .filter(ContactColumn::Status.ne(ContactStatus::Skipped));
    if !dialled.is_empty() {
        query = query.filter(ContactColumn::Id.is_not_in(dialled));
    }
    query
        .count(db)
        .await
        .context("failed to count pending contacts")
}

pub async fn count_in_flight<C: ConnectionTrait>(db: &C, campaign_id: i64) -> anyhow::Result<u64> {
    CallEntity::find()
        .filter(CallColumn::CampaignId.eq(campaign_id))
        .filter(CallColumn::Status.is_in(CallStatus::in_flight()))
        .count(db)
        .await
        .context("failed to count in-flight calls")
}

fn ready_agent(agent: Option<AgentModel>) -> Result<AgentModel, CampaignError> {
    match agent {
        None => Err(CampaignError::AgentNotReady("agent no longer exists".into())),
        Some(agent) if !agent.is_active => {
            Err(CampaignError::AgentNotReady("agent is disabled".into()))
        }
        Some(agent) if !agent.can_place_calls() => Err(CampaignError::AgentNotReady(
            "agent has no provider agent or phone number".into(),
        )),
        Some(agent) => Ok(agent),
    }
}

fn call_variables(contact: &ContactModel) -> Map<String, Value> {
    let mut vars = Map::new();
    if let Some(Value::Object(extra)) = &contact.variables {
        for (k, v) in extra {
            vars.insert(k.clone(), v.clone());
        }
    }
    vars.insert("name".into(), Value::String(contact.name.clone()));
    vars.insert(
        "phone_number".into(),
        Value::String(contact.phone_number.clone()),
    );
    if let Some(email) = &contact.email {
        vars.insert("email".into(), Value::String(email.clone()));
    }
    vars
}

/// Completes an in-progress campaign once nothing is left to dial or awaiting
/// a result.
pub async fn complete_if_exhausted<C: ConnectionTrait>(
    db: &C,
    campaign: CampaignModel,
    now: DateTime<Utc>,
) -> anyhow::Result<CampaignModel> {
    if campaign.status != CampaignStatus::InProgress {
        return Ok(campaign);
    }
    if count_pending(db, campaign.id).await? > 0 {
        return Ok(campaign);
    }
    if count_in_flight(db, campaign.id).await? > 0 {
        return Ok(campaign);
    }
    let campaign_id = campaign.id;
    let mut active: CampaignActiveModel = campaign.into();
    active.status = Set(CampaignStatus::Completed);
    active.completed_at = Set(Some(now));
    active.updated_at = Set(now);
    let updated = active
        .update(db)
        .await
        .context("failed to complete campaign")?;
    info!(campaign_id, "campaign completed");
    Ok(updated)
}

async fn pause_for(
    db: &DatabaseConnection,
    campaign: CampaignModel,
    reason: String,
    now: DateTime<Utc>,
) -> anyhow::Result<CampaignModel> {
    warn!(campaign_id = campaign.id, reason = %reason, "pausing campaign");
    let mut active: CampaignActiveModel = campaign.into();
    active.status = Set(CampaignStatus::Paused);
    active.paused_at = Set(Some(now));
    active.last_error = Set(Some(reason));
    active.updated_at = Set(now);
    active
        .update(db)
        .await
        .context("failed to pause campaign")
}

/// Places calls for the next pending contacts, bounded by the free concurrency
/// slots.
pub async fn process_batch(
    db: &DatabaseConnection,
    provider: &dyn VoiceProvider,
    plans: &PlanCatalog,
    campaign_id: i64,
    now: DateTime<Utc>,
) -> Result<BatchReport, CampaignError> {
    let mut campaign = CampaignEntity::find_by_id(campaign_id)
        .one(db)
        .await?
        .ok_or(CampaignError::NotFound)?;
    if campaign.status != CampaignStatus::InProgress {
        return Err(CampaignError::NotRunning(campaign.status));
    }

    let agent = ready_agent(AgentEntity::find_by_id(campaign.agent_id).one(db).await?)?;
    let mut user = UserEntity::find_by_id(campaign.user_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow!("campaign owner {} not found", campaign.user_id))?;
    let plan = plans.get(&user.plan);

    let plan_cap = plan.map(|p| p.max_concurrent_calls).unwrap_or(1);
    let cap = (campaign.concurrency_limit.max(1) as u32).min(plan_cap.max(1));
    let in_flight = count_in_flight(db, campaign.id).await?;
    let slots = (cap as u64).saturating_sub(in_flight) as u32;

    let mut report = BatchReport {
        campaign_id,
        status: campaign.status,
        slots,
        attempted: 0,
        placed: 0,
        failed: 0,
        in_flight,
        remaining: 0,
        paused_reason: None,
    };

    let contacts = if slots == 0 {
        Vec::new()
    } else {
        pending_contacts(db, campaign.id, Some(slots as u64)).await?
    };

    let provider_agent_id = agent.provider_agent_id.clone().unwrap_or_default();
    let phone_number_id = agent.phone_number_id.clone().unwrap_or_default();

    for contact in contacts {
        user = refresh_period(db, user, now).await?;
        if let Err(denied) = check_call_permitted(&UsageSnapshot::from(&user), plan) {
            let reason = denied.to_string();
            campaign = pause_for(db, campaign, reason.clone(), now).await?;
            report.paused_reason = Some(reason);
            break;
        }

        report.attempted += 1;
        let request = OutboundCallRequest {
            provider_agent_id: provider_agent_id.clone(),
            phone_number_id: phone_number_id.clone(),
            to_number: contact.phone_number.clone(),
            dynamic_variables: call_variables(&contact),
        };

        let mut call = CallActiveModel {
            user_id: Set(campaign.user_id),
            agent_id: Set(agent.id),
            campaign_id: Set(Some(campaign.id)),
            contact_id: Set(Some(contact.id)),
            direction: Set(CallDirection::Outbound),
            to_number: Set(Some(contact.phone_number.clone())),
            started_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let contact_status = match provider.place_call(&request).await {
            Ok(placed) => {
                call.status = Set(CallStatus::Initiated);
                call.conversation_id = Set(placed.conversation_id);
                call.call_sid = Set(placed.call_sid);
                report.placed += 1;
                ContactStatus::Calling
            }
            Err(err) => {
                warn!(
                    campaign_id,
                    contact_id = contact.id,
                    "failed to place campaign call: {}",
                    err
                );
                call.status = Set(CallStatus::Failed);
                call.error = Set(Some(err.to_string()));
                call.ended_at = Set(Some(now));
                report.failed += 1;
                ContactStatus::Failed
            }
        };
        call.insert(db)
            .await
            .context("failed to record campaign call")?;

        let mut contact_active: ContactActiveModel = contact.into();
        contact_active.status = Set(contact_status);
        contact_active.updated_at = Set(now);
        contact_active
            .update(db)
            .await
            .context("failed to update contact status")?;
    }

    if report.attempted > 0 {
        let calls_placed = campaign.calls_placed + report.placed as i32;
        let failed_calls = campaign.failed_calls + report.failed as i32;
        let mut active: CampaignActiveModel = campaign.into();
        active.calls_placed = Set(calls_placed);
        active.failed_calls = Set(failed_calls);
        active.updated_at = Set(now);
        campaign = active
            .update(db)
            .await
            .context("failed to update campaign counters")?;
    }

    let campaign = complete_if_exhausted(db, campaign, now).await?;
    report.status = campaign.status;
    report.in_flight = count_in_flight(db, campaign_id).await?;
    report.remaining = count_pending(db, campaign_id).await?;
    info!(
        campaign_id,
        slots = report.slots,
        placed = report.placed,
        failed = report.failed,
        remaining = report.remaining,
        "campaign batch processed"
    );
    Ok(report)
}

/// Applies a user action. Start and resume immediately run one batch.
pub async fn apply_action(
    db: &DatabaseConnection,
    provider: &dyn VoiceProvider,
    plans: &PlanCatalog,
    campaign: CampaignModel,
    action: CampaignAction,
    now: DateTime<Utc>,
) -> Result<(CampaignModel, Option<BatchReport>), CampaignError> {
    let next = transition(campaign.status, action)?;

    if matches!(action, CampaignAction::Start | CampaignAction::Resume) {
        ready_agent(AgentEntity::find_by_id(campaign.agent_id).one(db).await?)?;
    }
    if action == CampaignAction::Start {
        let contacts = ContactEntity::find()
            .filter(ContactColumn::CampaignId.eq(campaign.id))
            .count(db)
            .await?;
        if contacts == 0 {
            return Err(CampaignError::NoContacts);
        }
    }

    let campaign_id = campaign.id;
    let scheduled_at = campaign.scheduled_at;
    let mut active: CampaignActiveModel = campaign.into();
    active.status = Set(next);
    active.updated_at = Set(now);
    match action {
        CampaignAction::Schedule => {
            active.scheduled_at = Set(scheduled_at.or(Some(now)));
        }
        CampaignAction::Start => {
            active.started_at = Set(Some(now));
            active.last_error = Set(None);
        }
        CampaignAction::Pause => {
            active.paused_at = Set(Some(now));
        }
        CampaignAction::Resume => {
            active.paused_at = Set(None);
            active.last_error = Set(None);
        }
        CampaignAction::Cancel => {
            active.cancelled_at = Set(Some(now));
        }
        CampaignAction::Complete => {
            active.completed_at = Set(Some(now));
        }
    }
    let updated = active
        .update(db)
        .await
        .context("failed to update campaign status")?;
    info!(campaign_id, action = %action, "campaign action applied");

    match action {
        CampaignAction::Start | CampaignAction::Resume => {
            let report = process_batch(db, provider, plans, campaign_id, now).await?;
            let campaign = CampaignEntity::find_by_id(campaign_id)
                .one(db)
                .await?
                .ok_or(CampaignError::NotFound)?;
            Ok((campaign, Some(report)))
        }
        CampaignAction::Cancel => {
            skip_pending(db, campaign_id, now).await?;
            Ok((updated, None))
        }
        _ => Ok((updated, None)),
    }
}

/// Marks never-dialled contacts as skipped.
async fn skip_pending(
    db: &DatabaseConnection,
    campaign_id: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    for contact in pending_contacts(db, campaign_id, None).await? {
        let mut active: ContactActiveModel = contact.into();
        active.status = Set(ContactStatus::Skipped);
        active.updated_at = Set(now);
        active
            .update(db)
            .await
            .context("failed to skip contact")?;
    }
    Ok(())
}
