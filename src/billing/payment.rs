use super::plan::PlanCatalog;
use super::usage::{period_from, round_cents};
use crate::config::PaymentConfig;
use crate::models::{
    billing_transaction::{
        ActiveModel as TransactionActiveModel, Column as TransactionColumn,
        Entity as TransactionEntity, Model as TransactionModel, TransactionKind,
        TransactionStatus,
    },
    user::{ActiveModel as UserActiveModel, Entity as UserEntity, Model as UserModel},
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

const MAX_TOPUP_AMOUNT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget.
    fn key_id(&self) -> &str;

    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder>;

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

pub fn payment_signature(secret: &str, order_id: &str, payment_id: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_with_secret(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

pub struct RazorpayGateway {
    config: PaymentConfig,
    client: reqwest::Client,
}

impl RazorpayGateway {
    pub fn new(config: PaymentConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(10_000));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::version::get_useragent())
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.config.key_id
    }

    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder> {
        let url = format!("{}/v1/orders", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await
            .context("payment gateway request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("payment gateway returned {}: {}", status, body));
        }
        response
            .json::<GatewayOrder>()
            .await
            .context("invalid payment gateway order response")
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_with_secret(&self.config.key_secret, order_id, payment_id, signature)
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("amount must be between 1 and 1000000")]
    InvalidAmount,
    #[error("plan '{0}' is not available for purchase")]
    UnknownPlan(String),
    #[error("order not found")]
    OrderNotFound,
    #[error("payment signature mismatch")]
    SignatureMismatch,
    #[error("payment gateway error: {0}")]
    Gateway(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderRequest {
    Topup { amount: f64 },
    Plan { plan: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOrder {
    pub transaction_id: i64,
    pub order_id: String,
    pub amount: f64,
    pub currency: String,
    pub key_id: String,
    pub kind: TransactionKind,
}

pub async fn create_order(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    plans: &PlanCatalog,
    currency: &str,
    user: &UserModel,
    request: OrderRequest,
) -> Result<CheckoutOrder, PaymentError> {
    let (kind, amount, plan_key, description) = match request {
        OrderRequest::Topup { amount } => {
            if !amount.is_finite() || amount < 1.0 || amount > MAX_TOPUP_AMOUNT {
                return Err(PaymentError::InvalidAmount);
            }
            let amount = round_cents(amount);
            (
                TransactionKind::Topup,
                amount,
                None,
                format!("Wallet top-up of {:.2}", amount),
            )
        }
        OrderRequest::Plan { plan } => {
            let found = plans
                .get(&plan)
                .filter(|p| p.price > 0.0)
                .ok_or_else(|| PaymentError::UnknownPlan(plan.clone()))?;
            (
                TransactionKind::PlanPurchase,
                found.price,
                Some(found.key.clone()),
                format!("{} plan", found.name),
            )
        }
    };

    let receipt = format!("zv-{}-{}", user.id, uuid::Uuid::new_v4().simple());
    let amount_minor = (amount * 100.0).round() as i64;
    let order = gateway
        .create_order(amount_minor, currency, &receipt)
        .await
        .map_err(PaymentError::Gateway)?;

    let now = Utc::now();
    let txn = TransactionActiveModel {
        user_id: Set(user.id),
        kind: Set(kind),
        status: Set(TransactionStatus::Pending),
        amount: Set(amount),
        currency: Set(currency.to_string()),
        gateway_order_id: Set(Some(order.id.clone())),
        plan_key: Set(plan_key),
        description: Set(Some(description)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .context("failed to record payment order")?;

    info!(user_id = user.id, order_id = %order.id, amount, "payment order created");
    Ok(CheckoutOrder {
        transaction_id: txn.id,
        order_id: order.id,
        amount,
        currency: currency.to_string(),
        key_id: gateway.key_id().to_string(),
        kind,
    })
}

pub async fn create_topup_order(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    plans: &PlanCatalog,
    currency: &str,
    user: &UserModel,
    amount: f64,
) -> Result<CheckoutOrder, PaymentError> {
    create_order(db, gateway, plans, currency, user, OrderRequest::Topup { amount }).await
}

pub async fn create_plan_order(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    plans: &PlanCatalog,
    currency: &str,
    user: &UserModel,
    plan: &str,
) -> Result<CheckoutOrder, PaymentError> {
    let request = OrderRequest::Plan {
        plan: plan.to_string(),
    };
    create_order(db, gateway, plans, currency, user, request).await
}

/// Applies a paid order. Confirming an already completed order returns it
/// unchanged.
pub async fn confirm_payment(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    user_id: i64,
    order_id: &str,
    payment_id: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<TransactionModel, PaymentError> {
    let txn = TransactionEntity::find()
        .filter(TransactionColumn::GatewayOrderId.eq(order_id))
        .filter(TransactionColumn::UserId.eq(user_id))
        .one(db)
        .await
        .context("failed to load payment order")?
        .ok_or(PaymentError::OrderNotFound)?;

    if txn.status == TransactionStatus::Completed {
        return Ok(txn);
    }
    if !gateway.verify_payment_signature(order_id, payment_id, signature) {
        warn!(user_id, order_id, "payment signature mismatch");
        return Err(PaymentError::SignatureMismatch);
    }

    let tx = db.begin().await.context("failed to begin transaction")?;
    let user = UserEntity::find_by_id(user_id)
        .one(&tx)
        .await
        .context("failed to load account")?
        .ok_or_else(|| anyhow!("account {} not found", user_id))?;

    let mut account: UserActiveModel = user.clone().into();
    let mut balance_after = user.wallet_balance;
    match txn.kind {
        TransactionKind::Topup => {
            balance_after = round_cents(user.wallet_balance + txn.amount);
            account.wallet_balance = Set(balance_after);
        }
        TransactionKind::PlanPurchase => {
            let plan_key = txn
                .plan_key
                .clone()
                .ok_or_else(|| anyhow!("plan order {} has no plan", txn.id))?;
            let (start, end) = period_from(now);
            account.plan = Set(plan_key);
            account.plan_period_start = Set(start);
            account.plan_period_end = Set(end);
            account.seconds_used = Set(0);
        }
        TransactionKind::CallCharge => {
            return Err(PaymentError::OrderNotFound);
        }
    }
    account.updated_at = Set(now);
    account
        .update(&tx)
        .await
        .context("failed to apply payment to account")?;

    let mut active: TransactionActiveModel = txn.into();
    active.status = Set(TransactionStatus::Completed);
    active.gateway_payment_id = Set(Some(payment_id.to_string()));
    active.balance_after = Set(Some(balance_after));
    active.updated_at = Set(now);
    let updated = active
        .update(&tx)
        .await
        .context("failed to complete payment order")?;
    tx.commit().await.context("failed to commit payment")?;

    info!(user_id, order_id, payment_id, "payment confirmed");
    Ok(updated)
}

pub async fn list_transactions(
    db: &DatabaseConnection,
    user_id: i64,
) -> anyhow::Result<Vec<TransactionModel>> {
    TransactionEntity::find()
        .filter(TransactionColumn::UserId.eq(user_id))
        .order_by_desc(TransactionColumn::CreatedAt)
        .order_by_desc(TransactionColumn::Id)
        .all(db)
        .await
        .context("failed to list billing transactions")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Gateway double that hands out sequential order ids and signs with a
    /// fixed secret.
    pub struct FakeGateway {
        pub secret: String,
        pub orders: Mutex<Vec<(i64, String)>>,
    }

    impl FakeGateway {
        pub fn new(secret: &str) -> Self {
            Self {
                secret: secret.to_string(),
                orders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        fn key_id(&self) -> &str {
            "rzp_test_key"
        }

        async fn create_order(
            &self,
            amount_minor: i64,
            currency: &str,
            receipt: &str,
        ) -> anyhow::Result<GatewayOrder> {
            let mut orders = self.orders.lock().unwrap();
            let id = format!("order_{}", orders.len() + 1);
            orders.push((amount_minor, receipt.to_string()));
            Ok(GatewayOrder {
                id,
                amount: amount_minor,
                currency: currency.to_string(),
                status: "created".into(),
            })
        }

        fn verify_payment_signature(
            &self,
            order_id: &str,
            payment_id: &str,
            signature: &str,
        ) -> bool {
            verify_with_secret(&self.secret, order_id, payment_id, signature)
        }
    }

    #[test]
    fn test_payment_signature_roundtrip() {
        let signature = payment_signature("secret", "order_1", "pay_1").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_with_secret("secret", "order_1", "pay_1", &signature));
        assert!(!verify_with_secret("secret", "order_1", "pay_2", &signature));
        assert!(!verify_with_secret("other", "order_1", "pay_1", &signature));
        assert!(!verify_with_secret("secret", "order_1", "pay_1", "not-hex"));
    }

    #[test]
    fn test_order_request_parses_kinds() {
        let topup: OrderRequest =
            serde_json::from_value(json!({"kind": "topup", "amount": 500.0})).unwrap();
        assert!(matches!(topup, OrderRequest::Topup { amount } if amount == 500.0));
        let plan: OrderRequest =
            serde_json::from_value(json!({"kind": "plan", "plan": "growth"})).unwrap();
        assert!(matches!(plan, OrderRequest::Plan { plan } if plan == "growth"));
    }

    #[tokio::test]
    async fn test_plan_purchase_switches_plan_once() {
        use crate::testutil::{create_user, setup_db};
        use chrono::TimeZone;

        let db = setup_db().await;
        let gateway = FakeGateway::new("secret");
        let user = create_user(&db, "trial", 0.0).await;
        let mut active: UserActiveModel = user.clone().into();
        active.seconds_used = Set(540);
        let user = active.update(&db).await.unwrap();

        let order = create_plan_order(
            &db,
            &gateway,
            &PlanCatalog::default(),
            "INR",
            &user,
            "starter",
        )
        .await
        .unwrap();
        assert_eq!(order.kind, TransactionKind::PlanPurchase);

        let paid_at = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let signature = payment_signature("secret", &order.order_id, "pay_1").unwrap();
        let confirmed = confirm_payment(
            &db,
            &gateway,
            user.id,
            &order.order_id,
            "pay_1",
            &signature,
            paid_at,
        )
        .await
        .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Completed);
        assert_eq!(confirmed.gateway_payment_id.as_deref(), Some("pay_1"));

        let account = UserEntity::find_by_id(user.id).one(&db).await.unwrap().unwrap();
        let (start, end) = period_from(paid_at);
        assert_eq!(account.plan, "starter");
        assert_eq!(account.seconds_used, 0);
        assert_eq!(account.plan_period_start, start);
        assert_eq!(account.plan_period_end, end);

        // Usage after the purchase survives a repeated confirmation.
        let mut active: UserActiveModel = account.into();
        active.seconds_used = Set(300);
        active.update(&db).await.unwrap();
        let again = confirm_payment(
            &db,
            &gateway,
            user.id,
            &order.order_id,
            "pay_2",
            "stale-signature",
            paid_at + chrono::Duration::days(3),
        )
        .await
        .unwrap();
        assert_eq!(again.id, confirmed.id);
        assert_eq!(again.gateway_payment_id.as_deref(), Some("pay_1"));

        let account = UserEntity::find_by_id(user.id).one(&db).await.unwrap().unwrap();
        assert_eq!(account.seconds_used, 300);
        assert_eq!(account.plan_period_start, start);
        assert_eq!(list_transactions(&db, user.id).await.unwrap().len(), 1);
    }
}
