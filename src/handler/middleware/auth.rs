use crate::app::AppState;
use crate::auth::{current_user, extract_session_token};
use crate::handler::{forbidden, internal_error, unauthorized};
use crate::models::user::Model as UserModel;
use axum::{extract::FromRequestParts, http::request::Parts, response::Response};

/// The signed-in account. Rejects with 401.
pub struct AuthUser(pub UserModel);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(&parts.headers).ok_or_else(unauthorized)?;
        match current_user(&state.db, &state.sessions, Some(&token)).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => Err(unauthorized()),
            Err(err) => Err(internal_error("load current user", err)),
        }
    }
}

/// A signed-in support staff account. Rejects with 401 or 403.
pub struct StaffUser(pub UserModel);

impl FromRequestParts<AppState> for StaffUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(forbidden("Staff access required"));
        }
        Ok(StaffUser(user))
    }
}
