use super::event::{InitiationFailureData, TranscriptionData, WebhookEvent};
use crate::billing::{PlanCatalog, usage::record_call_usage};
use crate::campaign::complete_if_exhausted;
use crate::classifier::OutcomeClassifier;
use crate::models::{
    agent::{Column as AgentColumn, Entity as AgentEntity},
    call_record::{
        ActiveModel as CallActiveModel, CallDirection, CallStatus, Column as CallColumn,
        Entity as CallEntity, Model as CallModel,
    },
    campaign::{ActiveModel as CampaignActiveModel, Entity as CampaignEntity},
    contact::{ActiveModel as ContactActiveModel, ContactStatus, Entity as ContactEntity},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    Reconciled {
        call_id: i64,
        status: CallStatus,
        billable_secs: i64,
        charge: f64,
        unpaid: f64,
    },
    Failed {
        call_id: i64,
    },
    Duplicate {
        call_id: i64,
    },
    Ignored {
        reason: String,
    },
}

pub struct WebhookContext<'a> {
    pub db: &'a DatabaseConnection,
    pub plans: &'a PlanCatalog,
    pub currency: &'a str,
    pub classifier: Option<&'a dyn OutcomeClassifier>,
}

async fn find_call(
    db: &DatabaseConnection,
    conversation_id: Option<&str>,
    call_sid: Option<&str>,
) -> Result<Option<CallModel>> {
    if let Some(conversation_id) = conversation_id.filter(|v| !v.is_empty()) {
        let found = CallEntity::find()
            .filter(CallColumn::ConversationId.eq(conversation_id))
            .one(db)
            .await
            .context("failed to look up call by conversation id")?;
        if found.is_some() {
            return Ok(found);
        }
    }
    if let Some(call_sid) = call_sid.filter(|v| !v.is_empty()) {
        return CallEntity::find()
            .filter(CallColumn::CallSid.eq(call_sid))
            .one(db)
            .await
            .context("failed to look up call by call sid");
    }
    Ok(None)
}

/// Unknown conversations on a known agent are inbound calls.
async fn create_inbound_call(
    db: &DatabaseConnection,
    data: &TranscriptionData,
    now: DateTime<Utc>,
) -> Result<Option<CallModel>> {
    let Some(provider_agent_id) = data.agent_id.as_deref() else {
        return Ok(None);
    };
    let Some(agent) = AgentEntity::find()
        .filter(AgentColumn::ProviderAgentId.eq(provider_agent_id))
        .one(db)
        .await
        .context("failed to look up agent for inbound call")?
    else {
        return Ok(None);
    };

    let phone_call = data.metadata.phone_call.clone().unwrap_or_default();
    let started_at = data
        .metadata
        .start_time_unix_secs
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or(now);
    let call = CallActiveModel {
        user_id: Set(agent.user_id),
        agent_id: Set(agent.id),
        direction: Set(CallDirection::Inbound),
        status: Set(CallStatus::InProgress),
        from_number: Set(phone_call.external_number),
        to_number: Set(phone_call.agent_number),
        conversation_id: Set(data.conversation_id.clone()),
        call_sid: Set(phone_call.call_sid),
        started_at: Set(started_at),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .context("failed to create inbound call")?;
    info!(call_id = call.id, agent_id = agent.id, "inbound call registered from webhook");
    Ok(Some(call))
}

fn clamp_secs(secs: i64) -> i32 {
    i32::try_from(secs.max(0)).unwrap_or(i32::MAX)
}

fn final_status(data: &TranscriptionData) -> CallStatus {
    if data.provider_failed() {
        CallStatus::Failed
    } else if data.duration_secs() == 0 {
        CallStatus::NoAnswer
    } else {
        CallStatus::Completed
    }
}

/// Mirrors a finished call onto its campaign contact and counters. Runs in
/// the caller's transaction so counters move together with the call row.
async fn settle_campaign<C: ConnectionTrait>(
    db: &C,
    call: &CallModel,
    status: CallStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(campaign_id) = call.campaign_id else {
        return Ok(());
    };
    if let Some(contact_id) = call.contact_id {
        if let Some(contact) = ContactEntity::find_by_id(contact_id)
            .one(db)
            .await
            .context("failed to load campaign contact")?
        {
            let mut active: ContactActiveModel = contact.into();
            active.status = Set(if status == CallStatus::Completed {
                ContactStatus::Completed
            } else {
                ContactStatus::Failed
            });
            active.updated_at = Set(now);
            active
                .update(db)
                .await
                .context("failed to update contact status")?;
        }
    }

    let Some(campaign) = CampaignEntity::find_by_id(campaign_id)
        .one(db)
        .await
        .context("failed to load campaign")?
    else {
        return Ok(());
    };
    let completed_calls = campaign.completed_calls + i32::from(status == CallStatus::Completed);
    let failed_calls = campaign.failed_calls + i32::from(status != CallStatus::Completed);
    let mut active: CampaignActiveModel = campaign.into();
    active.completed_calls = Set(completed_calls);
    active.failed_calls = Set(failed_calls);
    active.updated_at = Set(now);
    let campaign = active
        .update(db)
        .await
        .context("failed to update campaign counters")?;
    complete_if_exhausted(db, campaign, now).await?;
    Ok(())
}

async fn reconcile_transcription(
    ctx: &WebhookContext<'_>,
    data: &TranscriptionData,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    let call = match find_call(ctx.db, data.conversation_id.as_deref(), data.call_sid()).await? {
        Some(call) => call,
        None => match create_inbound_call(ctx.db, data, now).await? {
            Some(call) => call,
            None => {
                return Ok(IngestOutcome::Ignored {
                    reason: "unknown conversation".to_string(),
                });
            }
        },
    };
    if call.usage_recorded {
        debug!(call_id = call.id, "webhook already applied");
        return Ok(IngestOutcome::Duplicate { call_id: call.id });
    }

    let status = final_status(data);
    let duration = data.duration_secs();
    let txn = ctx.db.begin().await.context("failed to begin transaction")?;
    let (billable, split) = record_call_usage(
        &txn,
        ctx.plans,
        ctx.currency,
        call.user_id,
        call.id,
        duration,
        now,
    )
    .await?;

    let call_id = call.id;
    let ended_at = Duration::try_seconds(duration)
        .and_then(|elapsed| call.started_at.checked_add_signed(elapsed))
        .unwrap_or(now);
    let conversation_id = call.conversation_id.clone().or(data.conversation_id.clone());
    let call_sid = call.call_sid.clone().or(data.call_sid().map(str::to_string));
    let mut active: CallActiveModel = call.into();
    active.status = Set(status);
    active.conversation_id = Set(conversation_id);
    active.call_sid = Set(call_sid);
    active.duration_secs = Set(clamp_secs(duration));
    active.billable_secs = Set(clamp_secs(billable));
    active.plan_secs = Set(clamp_secs(split.plan_secs));
    active.overage_secs = Set(clamp_secs(split.overage_secs));
    active.charge = Set(split.charge);
    active.usage_recorded = Set(true);
    active.transcript = Set(data.transcript.clone());
    active.summary = Set(data.summary().map(str::to_string));
    if status == CallStatus::Failed {
        active.error = Set(data.metadata.termination_reason.clone());
    }
    active.ended_at = Set(Some(ended_at.min(now)));
    active.updated_at = Set(now);
    let call = active
        .update(&txn)
        .await
        .context("failed to update call from webhook")?;
    settle_campaign(&txn, &call, status, now).await?;
    txn.commit().await.context("failed to commit call usage")?;

    info!(
        call_id,
        status = ?status,
        duration,
        billable,
        charge = split.charge,
        "call reconciled"
    );

    classify(ctx, &call, now).await;

    Ok(IngestOutcome::Reconciled {
        call_id,
        status,
        billable_secs: billable,
        charge: split.charge,
        unpaid: split.unpaid,
    })
}

/// Labels any reconciled call that carries a transcript, whatever its status.
/// Best effort; failures only log.
async fn classify(ctx: &WebhookContext<'_>, call: &CallModel, now: DateTime<Utc>) {
    let Some(classifier) = ctx.classifier else {
        return;
    };
    let Some(transcript) = call
        .transcript
        .as_ref()
        .filter(|t| !t.is_null() && t.as_array().is_none_or(|turns| !turns.is_empty()))
    else {
        return;
    };
    let label = match classifier
        .classify(transcript, call.summary.as_deref())
        .await
    {
        Ok(label) => label,
        Err(err) => {
            warn!(call_id = call.id, "outcome classification failed: {}", err);
            return;
        }
    };
    let mut active: CallActiveModel = call.clone().into();
    active.outcome = Set(Some(label));
    active.updated_at = Set(now);
    if let Err(err) = active.update(ctx.db).await {
        warn!(call_id = call.id, "failed to store call outcome: {}", err);
    }
}

async fn reconcile_failure(
    ctx: &WebhookContext<'_>,
    data: &InitiationFailureData,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    let Some(call) = find_call(ctx.db, data.conversation_id.as_deref(), data.call_sid()).await?
    else {
        return Ok(IngestOutcome::Ignored {
            reason: "unknown conversation".to_string(),
        });
    };
    if call.usage_recorded || call.status.is_terminal() {
        return Ok(IngestOutcome::Duplicate { call_id: call.id });
    }

    let call_id = call.id;
    let reason = data
        .failure_reason
        .clone()
        .unwrap_or_else(|| "call initiation failed".to_string());
    let txn = ctx.db.begin().await.context("failed to begin transaction")?;
    let mut active: CallActiveModel = call.into();
    active.status = Set(CallStatus::Failed);
    active.error = Set(Some(reason.clone()));
    active.usage_recorded = Set(true);
    active.ended_at = Set(Some(now));
    active.updated_at = Set(now);
    let call = active
        .update(&txn)
        .await
        .context("failed to mark call failed")?;
    settle_campaign(&txn, &call, CallStatus::Failed, now).await?;
    txn.commit().await.context("failed to commit call failure")?;
    warn!(call_id, reason = %reason, "call initiation failed");
    Ok(IngestOutcome::Failed { call_id })
}

pub async fn handle_event(
    ctx: &WebhookContext<'_>,
    event: &WebhookEvent,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    match event {
        WebhookEvent::PostCallTranscription(data) => reconcile_transcription(ctx, data, now).await,
        WebhookEvent::CallInitiationFailure(data) => reconcile_failure(ctx, data, now).await,
        WebhookEvent::Other(kind) => Ok(IngestOutcome::Ignored {
            reason: format!("unhandled event type {}", kind),
        }),
    }
}
