use crate::billing::{PlanCatalog, usage::period_from};
use crate::models::user::{
    ActiveModel as UserActiveModel, Column as UserColumn, Entity as UserEntity, Model as UserModel,
};
use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION, header::COOKIE};
use base64::engine::{Engine, general_purpose::STANDARD_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sea_orm::sea_query::Condition;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const SESSION_COOKIE_NAME: &str = "zapvoice_session";
const SESSION_TTL_HOURS: i64 = 12;

type HmacSha256 = Hmac<Sha256>;

/// Signs and checks `"{user_id}:{expires}:{sig}"` session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    key: Vec<u8>,
}

impl SessionSigner {
    pub fn new(session_secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(session_secret.as_bytes()).into();
        Self { key: key.to_vec() }
    }

    fn mac(&self, payload: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload.as_bytes());
        Some(mac)
    }

    pub fn issue(&self, user_id: i64, now: DateTime<Utc>) -> Option<(String, DateTime<Utc>)> {
        let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
        let payload = format!("{}:{}", user_id, expires_at.timestamp());
        let signature = STANDARD_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());
        Some((format!("{}:{}", payload, signature), expires_at))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Option<i64> {
        let mut segments = token.split(':');
        let user_id: i64 = segments.next()?.parse().ok()?;
        let expires: i64 = segments.next()?.parse().ok()?;
        let signature = segments.next()?;
        if segments.next().is_some() {
            return None;
        }
        if expires <= now.timestamp() {
            return None;
        }
        let signature = STANDARD_NO_PAD.decode(signature).ok()?;
        self.mac(&format!("{}:{}", user_id, expires))?
            .verify_slice(&signature)
            .ok()?;
        Some(user_id)
    }

    pub fn session_cookie_header(&self, token: &str) -> Option<HeaderValue> {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE_NAME,
            token,
            SESSION_TTL_HOURS * 3600
        );
        match HeaderValue::from_str(&cookie) {
            Ok(header) => Some(header),
            Err(err) => {
                warn!("failed to build session cookie header: {}", err);
                None
            }
        }
    }

    pub fn clear_session_cookie(&self) -> HeaderValue {
        HeaderValue::from_static("zapvoice_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

/// Bearer token first, then the session cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    for cookie_header in headers.get_all(COOKIE) {
        if let Ok(s) = cookie_header.to_str() {
            let found = s.split(';').find_map(|pair| {
                let mut parts = pair.trim().splitn(2, '=');
                let key = parts.next()?.trim();
                if key == SESSION_COOKIE_NAME {
                    Some(parts.next().unwrap_or("").trim().to_string())
                } else {
                    None
                }
            });
            if found.is_some() {
                return found;
            }
        }
    }
    None
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("invalid stored password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Looks the account up by email or username. Inactive accounts never
/// authenticate.
pub async fn authenticate(
    db: &DatabaseConnection,
    identifier: &str,
    password: &str,
) -> Result<Option<UserModel>> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let condition = Condition::any()
        .add(UserColumn::Email.eq(trimmed.to_lowercase()))
        .add(UserColumn::Username.eq(trimmed));

    let user = UserEntity::find()
        .filter(condition)
        .one(db)
        .await
        .context("failed to query user for authentication")?;

    match user {
        Some(user) if user.is_active && verify_password(password, &user.password_hash)? => {
            Ok(Some(user))
        }
        _ => Ok(None),
    }
}

pub async fn current_user(
    db: &DatabaseConnection,
    signer: &SessionSigner,
    token: Option<&str>,
) -> Result<Option<UserModel>> {
    let Some(user_id) = token.and_then(|t| signer.verify(t, Utc::now())) else {
        return Ok(None);
    };
    let user = UserEntity::find_by_id(user_id)
        .one(db)
        .await
        .context("failed to lookup current user")?;
    Ok(user.filter(|u| u.is_active))
}

pub async fn email_exists(db: &DatabaseConnection, email: &str) -> Result<bool> {
    let user = UserEntity::find()
        .filter(UserColumn::Email.eq(email))
        .one(db)
        .await
        .context("failed to check email uniqueness")?;
    Ok(user.is_some())
}

pub async fn username_exists(db: &DatabaseConnection, username: &str) -> Result<bool> {
    let user = UserEntity::find()
        .filter(UserColumn::Username.eq(username))
        .one(db)
        .await
        .context("failed to check username uniqueness")?;
    Ok(user.is_some())
}

pub struct NewAccount<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub full_name: Option<String>,
    pub company: Option<String>,
}

/// Creates an account on the catalogue's default plan with a fresh period.
pub async fn create_user(
    db: &DatabaseConnection,
    plans: &PlanCatalog,
    account: NewAccount<'_>,
    now: DateTime<Utc>,
) -> Result<UserModel> {
    let hashed = hash_password(account.password)?;
    let plan = plans
        .default_plan()
        .map(|p| p.key.clone())
        .unwrap_or_else(|| "trial".to_string());
    let (period_start, period_end) = period_from(now);

    let model = UserActiveModel {
        email: Set(account.email.trim().to_lowercase()),
        username: Set(account.username.trim().to_string()),
        password_hash: Set(hashed),
        full_name: Set(account.full_name),
        company: Set(account.company),
        is_active: Set(true),
        is_staff: Set(false),
        plan: Set(plan),
        plan_period_start: Set(period_start),
        plan_period_end: Set(period_end),
        seconds_used: Set(0),
        wallet_balance: Set(0.0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .context("failed to insert new user")?;
    info!(user_id = model.id, plan = %model.plan, "account registered");
    Ok(model)
}

/// Creates a support staff account, or promotes and resets an existing one
/// with the same username.
pub async fn upsert_staff_user(
    db: &DatabaseConnection,
    plans: &PlanCatalog,
    username: &str,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<UserModel> {
    let existing = UserEntity::find()
        .filter(UserColumn::Username.eq(username.trim()))
        .one(db)
        .await
        .context("failed to lookup staff user")?;
    let user = match existing {
        Some(user) => user,
        None => {
            create_user(
                db,
                plans,
                NewAccount {
                    email,
                    username,
                    password,
                    full_name: None,
                    company: None,
                },
                now,
            )
            .await?
        }
    };

    let mut active: UserActiveModel = user.into();
    active.password_hash = Set(hash_password(password)?);
    active.is_staff = Set(true);
    active.is_active = Set(true);
    active.updated_at = Set(now);
    let user = active
        .update(db)
        .await
        .context("failed to promote staff user")?;
    info!(user_id = user.id, username = %user.username, "staff user ensured");
    Ok(user)
}

pub async fn touch_login(
    db: &DatabaseConnection,
    user: UserModel,
    now: DateTime<Utc>,
) -> Result<UserModel> {
    let mut active: UserActiveModel = user.into();
    active.last_login_at = Set(Some(now));
    active.updated_at = Set(now);
    active
        .update(db)
        .await
        .context("failed to record login time")
}
