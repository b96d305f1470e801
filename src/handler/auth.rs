use crate::app::AppState;
use crate::auth::{
    NewAccount, authenticate, create_user, email_exists, touch_login, username_exists,
};
use crate::handler::{bad_request, conflict, internal_error, json_error, middleware::auth::AuthUser};
use crate::models::user::Model as UserModel;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub identifier: String,
    pub password: String,
}

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

fn validate_registration(form: &RegisterForm) -> Result<(), &'static str> {
    let email = form.email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err("A valid email address is required");
    }
    let username = form.username.trim();
    if username.is_empty()
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err("Username may only contain letters, digits, '.', '_' and '-'");
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters");
    }
    Ok(())
}

/// Issues a session for `user` and answers with the token and a cookie.
fn session_response(state: &AppState, status: StatusCode, user: UserModel) -> Response {
    let Some((token, expires_at)) = state.sessions.issue(user.id, Utc::now()) else {
        return internal_error("issue session", "session key rejected");
    };
    let body = Json(json!({
        "user": user,
        "token": token,
        "expires_at": expires_at,
    }));
    match state.sessions.session_cookie_header(&token) {
        Some(cookie) => (status, [(SET_COOKIE, cookie)], body).into_response(),
        None => (status, body).into_response(),
    }
}

async fn register(State(state): State<AppState>, Json(form): Json<RegisterForm>) -> Response {
    if let Err(message) = validate_registration(&form) {
        return bad_request(message);
    }
    let email = form.email.trim().to_lowercase();
    let username = form.username.trim().to_string();

    match email_exists(&state.db, &email).await {
        Ok(true) => return conflict("Email is already registered"),
        Ok(false) => {}
        Err(err) => return internal_error("check email", err),
    }
    match username_exists(&state.db, &username).await {
        Ok(true) => return conflict("Username is already taken"),
        Ok(false) => {}
        Err(err) => return internal_error("check username", err),
    }

    let account = NewAccount {
        email: &email,
        username: &username,
        password: &form.password,
        full_name: form.full_name.filter(|v| !v.trim().is_empty()),
        company: form.company.filter(|v| !v.trim().is_empty()),
    };
    match create_user(&state.db, &state.plans, account, Utc::now()).await {
        Ok(user) => session_response(&state, StatusCode::CREATED, user),
        Err(err) => internal_error("create account", err),
    }
}

async fn login(State(state): State<AppState>, Json(form): Json<LoginForm>) -> Response {
    let user = match authenticate(&state.db, &form.identifier, &form.password).await {
        Ok(Some(user)) => user,
        Ok(None) => return json_error(StatusCode::UNAUTHORIZED, "Invalid credentials"),
        Err(err) => return internal_error("authenticate", err),
    };
    let user = match touch_login(&state.db, user, Utc::now()).await {
        Ok(user) => user,
        Err(err) => return internal_error("record login", err),
    };
    info!(user_id = user.id, "user logged in");
    session_response(&state, StatusCode::OK, user)
}

async fn logout(State(state): State<AppState>) -> Response {
    (
        [(SET_COOKIE, state.sessions.clear_session_cookie())],
        Json(json!({"status": "ok"})),
    )
        .into_response()
}

async fn me(AuthUser(user): AuthUser) -> Response {
    Json(user).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, username: &str, password: &str) -> RegisterForm {
        RegisterForm {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            full_name: None,
            company: None,
        }
    }

    #[test]
    fn test_validate_registration() {
        assert!(validate_registration(&form("a@b.co", "alice", "longpassword")).is_ok());
        assert!(validate_registration(&form("not-an-email", "alice", "longpassword")).is_err());
        assert!(validate_registration(&form("a@b.co", "al ice", "longpassword")).is_err());
        assert!(validate_registration(&form("a@b.co", "", "longpassword")).is_err());
        assert!(validate_registration(&form("a@b.co", "alice", "short")).is_err());
    }
}
