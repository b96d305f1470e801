use super::plan::{Plan, PlanCatalog};
use crate::models::{
    billing_transaction::{
        ActiveModel as TransactionActiveModel, TransactionKind, TransactionStatus,
    },
    user::{ActiveModel as UserActiveModel, Entity as UserEntity, Model as UserModel},
};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Months, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectionTrait, EntityTrait};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageDenied {
    #[error("account has no active plan '{0}'")]
    NoPlan(String),
    #[error("monthly call allowance exhausted")]
    AllowanceExhausted,
    #[error("wallet balance {balance:.2} is below the required {required:.2}")]
    InsufficientBalance { balance: f64, required: f64 },
}

/// The usage-relevant part of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub plan_key: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub seconds_used: i64,
    pub wallet_balance: f64,
}

impl From<&UserModel> for UsageSnapshot {
    fn from(user: &UserModel) -> Self {
        Self {
            plan_key: user.plan.clone(),
            period_start: user.plan_period_start,
            period_end: user.plan_period_end,
            seconds_used: user.seconds_used,
            wallet_balance: user.wallet_balance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Apportionment {
    pub plan_secs: i64,
    pub overage_secs: i64,
    pub charge: f64,
    /// Overage cost the wallet could not cover.
    pub unpaid: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub plan: String,
    pub plan_name: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub minutes_included: i64,
    pub minutes_used: f64,
    pub minutes_remaining: f64,
    pub wallet_balance: f64,
    pub overage_rate_per_minute: f64,
    pub allow_overage: bool,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn next_month(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or_else(|| at + Duration::days(30))
}

/// Period covering `start`, one month long.
pub fn period_from(start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (start, next_month(start))
}

/// Resets usage when the billing period has elapsed. Returns true if the
/// snapshot changed.
pub fn roll_period(snapshot: &mut UsageSnapshot, now: DateTime<Utc>) -> bool {
    if now < snapshot.period_end {
        return false;
    }
    let mut start = snapshot.period_end;
    let mut end = next_month(start);
    while end <= now {
        start = end;
        end = next_month(start);
    }
    snapshot.period_start = start;
    snapshot.period_end = end;
    snapshot.seconds_used = 0;
    true
}

pub fn remaining_allowance_secs(snapshot: &UsageSnapshot, plan: &Plan) -> i64 {
    (plan.allowance_secs() - snapshot.seconds_used).max(0)
}

/// First `initial_increment_secs` are charged whole, then each started
/// `billing_increment_secs`.
pub fn billable_seconds(duration_secs: i64, plan: &Plan) -> i64 {
    if duration_secs <= 0 {
        return 0;
    }
    let initial = plan.initial_increment_secs.max(1);
    let step = plan.billing_increment_secs.max(1);
    if duration_secs <= initial {
        return initial;
    }
    let rest = duration_secs - initial;
    let steps = rest / step + i64::from(rest % step != 0);
    initial.saturating_add(steps.saturating_mul(step))
}

pub fn check_call_permitted(
    snapshot: &UsageSnapshot,
    plan: Option<&Plan>,
) -> Result<(), UsageDenied> {
    let plan = plan.ok_or_else(|| UsageDenied::NoPlan(snapshot.plan_key.clone()))?;
    if remaining_allowance_secs(snapshot, plan) > 0 {
        return Ok(());
    }
    if !plan.allow_overage {
        return Err(UsageDenied::AllowanceExhausted);
    }
    let required = round_cents(
        plan.billing_increment_secs as f64 / 60.0 * plan.overage_rate_per_minute,
    );
    if required > 0.0 && snapshot.wallet_balance < required {
        return Err(UsageDenied::InsufficientBalance {
            balance: snapshot.wallet_balance,
            required,
        });
    }
    Ok(())
}

pub fn apportion(
    billable_secs: i64,
    remaining_allowance_secs: i64,
    wallet_balance: f64,
    rate_per_minute: f64,
) -> Apportionment {
    let billable_secs = billable_secs.max(0);
    let plan_secs = billable_secs.min(remaining_allowance_secs.max(0));
    let overage_secs = billable_secs - plan_secs;
    let gross = round_cents(overage_secs as f64 / 60.0 * rate_per_minute.max(0.0));
    let charge = round_cents(gross.min(wallet_balance.max(0.0)));
    Apportionment {
        plan_secs,
        overage_secs,
        charge,
        unpaid: round_cents(gross - charge),
    }
}

pub fn summarize(snapshot: &UsageSnapshot, plan: Option<&Plan>) -> UsageSummary {
    let minutes_used = snapshot.seconds_used as f64 / 60.0;
    let (included, remaining) = match plan {
        Some(plan) => (
            plan.monthly_minutes,
            remaining_allowance_secs(snapshot, plan) as f64 / 60.0,
        ),
        None => (0, 0.0),
    };
    UsageSummary {
        plan: snapshot.plan_key.clone(),
        plan_name: plan.map(|p| p.name.clone()),
        period_start: snapshot.period_start,
        period_end: snapshot.period_end,
        minutes_included: included,
        minutes_used: round_cents(minutes_used),
        minutes_remaining: round_cents(remaining),
        wallet_balance: round_cents(snapshot.wallet_balance),
        overage_rate_per_minute: plan.map(|p| p.overage_rate_per_minute).unwrap_or(0.0),
        allow_overage: plan.map(|p| p.allow_overage).unwrap_or(false),
        max_concurrent_calls: plan.map(|p| p.max_concurrent_calls).unwrap_or(0),
        max_agents: plan.map(|p| p.max_agents).unwrap_or(0),
    }
}

/// Persists a period rollover if one is due and returns the current account.
pub async fn refresh_period<C: ConnectionTrait>(
    db: &C,
    user: UserModel,
    now: DateTime<Utc>,
) -> Result<UserModel> {
    let mut snapshot = UsageSnapshot::from(&user);
    if !roll_period(&mut snapshot, now) {
        return Ok(user);
    }
    info!(
        user_id = user.id,
        period_start = %snapshot.period_start,
        "billing period rolled over"
    );
    let mut active: UserActiveModel = user.into();
    active.plan_period_start = Set(snapshot.period_start);
    active.plan_period_end = Set(snapshot.period_end);
    active.seconds_used = Set(0);
    active.updated_at = Set(now);
    active
        .update(db)
        .await
        .context("failed to persist billing period rollover")
}

/// Meters a finished call against the owner's plan and wallet.
pub async fn record_call_usage<C: ConnectionTrait>(
    db: &C,
    plans: &PlanCatalog,
    currency: &str,
    user_id: i64,
    call_id: i64,
    duration_secs: i64,
    now: DateTime<Utc>,
) -> Result<(i64, Apportionment)> {
    let user = UserEntity::find_by_id(user_id)
        .one(db)
        .await
        .context("failed to load account for metering")?
        .ok_or_else(|| anyhow!("account {} not found", user_id))?;
    let user = refresh_period(db, user, now).await?;

    let Some(plan) = plans.get(&user.plan) else {
        warn!(user_id, plan = %user.plan, "account plan is unknown, call not metered");
        return Ok((0, apportion(0, 0, 0.0, 0.0)));
    };

    let snapshot = UsageSnapshot::from(&user);
    let billable = billable_seconds(duration_secs, plan);
    let split = apportion(
        billable,
        remaining_allowance_secs(&snapshot, plan),
        snapshot.wallet_balance,
        plan.overage_rate_per_minute,
    );
    let balance_after = round_cents(snapshot.wallet_balance - split.charge);

    let mut active: UserActiveModel = user.into();
    active.seconds_used = Set(snapshot.seconds_used.saturating_add(billable));
    active.wallet_balance = Set(balance_after);
    active.updated_at = Set(now);
    active
        .update(db)
        .await
        .context("failed to update account usage")?;

    if split.charge > 0.0 {
        TransactionActiveModel {
            user_id: Set(user_id),
            kind: Set(TransactionKind::CallCharge),
            status: Set(TransactionStatus::Completed),
            amount: Set(split.charge),
            currency: Set(currency.to_string()),
            call_id: Set(Some(call_id)),
            description: Set(Some(format!(
                "Overage for call {} ({} s)",
                call_id, split.overage_secs
            ))),
            balance_after: Set(Some(balance_after)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .context("failed to record call charge")?;
    }
    if split.unpaid > 0.0 {
        warn!(user_id, call_id, unpaid = split.unpaid, "wallet could not cover call overage");
    }
    Ok((billable, split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn plan(key: &str) -> Plan {
        PlanCatalog::default().get(key).cloned().unwrap()
    }

    fn snapshot(seconds_used: i64, wallet_balance: f64) -> UsageSnapshot {
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let (period_start, period_end) = period_from(start);
        UsageSnapshot {
            plan_key: "starter".into(),
            period_start,
            period_end,
            seconds_used,
            wallet_balance,
        }
    }

    #[test]
    fn test_billable_seconds_whole_minutes() {
        let p = plan("starter");
        assert_eq!(billable_seconds(0, &p), 0);
        assert_eq!(billable_seconds(1, &p), 60);
        assert_eq!(billable_seconds(60, &p), 60);
        assert_eq!(billable_seconds(61, &p), 120);
        assert_eq!(billable_seconds(185, &p), 240);
    }

    #[test]
    fn test_billable_seconds_split_increments() {
        let mut p = plan("starter");
        p.initial_increment_secs = 30;
        p.billing_increment_secs = 6;
        assert_eq!(billable_seconds(10, &p), 30);
        assert_eq!(billable_seconds(30, &p), 30);
        assert_eq!(billable_seconds(31, &p), 36);
        assert_eq!(billable_seconds(42, &p), 42);
    }

    #[test]
    fn test_billable_seconds_saturates() {
        let mut p = plan("starter");
        assert_eq!(billable_seconds(i64::MAX, &p), i64::MAX);
        p.initial_increment_secs = 30;
        p.billing_increment_secs = 7;
        assert_eq!(billable_seconds(i64::MAX, &p), i64::MAX);
        assert_eq!(billable_seconds(i64::MIN, &p), 0);
    }

    #[test]
    fn test_apportion_within_allowance() {
        let split = apportion(120, 600, 100.0, 8.0);
        assert_eq!(split.plan_secs, 120);
        assert_eq!(split.overage_secs, 0);
        assert_eq!(split.charge, 0.0);
        assert_eq!(split.unpaid, 0.0);
    }

    #[test]
    fn test_apportion_crosses_allowance() {
        let split = apportion(180, 60, 100.0, 8.0);
        assert_eq!(split.plan_secs, 60);
        assert_eq!(split.overage_secs, 120);
        assert_eq!(split.charge, 16.0);
        assert_eq!(split.unpaid, 0.0);
    }

    #[test]
    fn test_apportion_caps_charge_at_balance() {
        let split = apportion(300, 0, 10.0, 7.0);
        assert_eq!(split.overage_secs, 300);
        assert_eq!(split.charge, 10.0);
        assert_eq!(split.unpaid, 25.0);

        let broke = apportion(60, 0, -5.0, 7.0);
        assert_eq!(broke.charge, 0.0);
        assert_eq!(broke.unpaid, 7.0);
    }

    #[test]
    fn test_check_call_permitted() {
        let starter = plan("starter");
        assert!(check_call_permitted(&snapshot(0, 0.0), Some(&starter)).is_ok());

        let exhausted = snapshot(starter.allowance_secs(), 0.0);
        assert_eq!(
            check_call_permitted(&exhausted, Some(&starter)),
            Err(UsageDenied::InsufficientBalance {
                balance: 0.0,
                required: 8.0
            })
        );
        let funded = snapshot(starter.allowance_secs(), 8.0);
        assert!(check_call_permitted(&funded, Some(&starter)).is_ok());

        // The wallet must cover one billing increment, not the initial one.
        let mut fine_grained = plan("starter");
        fine_grained.initial_increment_secs = 30;
        fine_grained.billing_increment_secs = 6;
        fine_grained.overage_rate_per_minute = 4.0;
        let exhausted = snapshot(fine_grained.allowance_secs(), 0.3);
        assert_eq!(
            check_call_permitted(&exhausted, Some(&fine_grained)),
            Err(UsageDenied::InsufficientBalance {
                balance: 0.3,
                required: 0.4
            })
        );
        let funded = snapshot(fine_grained.allowance_secs(), 0.4);
        assert!(check_call_permitted(&funded, Some(&fine_grained)).is_ok());

        let trial = plan("trial");
        let trial_used = snapshot(trial.allowance_secs() + 5, 1_000.0);
        assert_eq!(
            check_call_permitted(&trial_used, Some(&trial)),
            Err(UsageDenied::AllowanceExhausted)
        );

        assert!(matches!(
            check_call_permitted(&snapshot(0, 0.0), None),
            Err(UsageDenied::NoPlan(_))
        ));
    }

    #[test]
    fn test_roll_period_resets_usage() {
        let mut snap = snapshot(1_200, 50.0);
        let before = Utc.with_ymd_and_hms(2026, 2, 14, 23, 0, 0).unwrap();
        assert!(!roll_period(&mut snap, before));
        assert_eq!(snap.seconds_used, 1_200);

        let later = Utc.with_ymd_and_hms(2026, 4, 20, 0, 0, 0).unwrap();
        assert!(roll_period(&mut snap, later));
        assert_eq!(snap.seconds_used, 0);
        assert_eq!(
            snap.period_start,
            Utc.with_ymd_and_hms(2026, 4, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            snap.period_end,
            Utc.with_ymd_and_hms(2026, 5, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(snap.wallet_balance, 50.0);
    }

    #[test]
    fn test_summarize_reports_remaining_minutes() {
        let starter = plan("starter");
        let summary = summarize(&snapshot(90, 12.346), Some(&starter));
        assert_eq!(summary.minutes_included, 500);
        assert_eq!(summary.minutes_used, 1.5);
        assert_eq!(summary.minutes_remaining, 498.5);
        assert_eq!(summary.wallet_balance, 12.35);
        assert!(summary.allow_overage);
    }
}
