use crate::billing::usage::period_from;
use crate::models::{
    self, agent::ActiveModel as AgentActiveModel, campaign::ActiveModel as CampaignActiveModel,
    campaign::CampaignStatus, user::ActiveModel as UserActiveModel,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ACCOUNT: AtomicUsize = AtomicUsize::new(1);

pub async fn setup_db() -> DatabaseConnection {
    models::create_db("sqlite::memory:").await.unwrap()
}

pub async fn create_user(
    db: &DatabaseConnection,
    plan: &str,
    wallet_balance: f64,
) -> models::user::Model {
    let n = NEXT_ACCOUNT.fetch_add(1, Ordering::SeqCst);
    let now = Utc::now();
    let (period_start, period_end) = period_from(now);
    UserActiveModel {
        email: Set(format!("tenant{}@example.com", n)),
        username: Set(format!("tenant{}", n)),
        password_hash: Set(crate::auth::hash_password("password").unwrap()),
        is_active: Set(true),
        is_staff: Set(false),
        plan: Set(plan.to_string()),
        plan_period_start: Set(period_start),
        plan_period_end: Set(period_end),
        seconds_used: Set(0),
        wallet_balance: Set(wallet_balance),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn create_agent(db: &DatabaseConnection, user_id: i64) -> models::agent::Model {
    let now = Utc::now();
    AgentActiveModel {
        user_id: Set(user_id),
        name: Set("Sales agent".into()),
        provider_agent_id: Set(Some(format!("agent_u{}", user_id))),
        language: Set("en".into()),
        phone_number_id: Set(Some("phnum_1".into())),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn create_campaign(
    db: &DatabaseConnection,
    user_id: i64,
    agent_id: i64,
    concurrency_limit: i32,
) -> models::campaign::Model {
    let now = Utc::now();
    CampaignActiveModel {
        user_id: Set(user_id),
        agent_id: Set(agent_id),
        name: Set("Renewals".into()),
        status: Set(CampaignStatus::Draft),
        concurrency_limit: Set(concurrency_limit),
        total_contacts: Set(0),
        calls_placed: Set(0),
        completed_calls: Set(0),
        failed_calls: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}
