//! Caller identity.
//!
//! Sessions are issued by the external auth provider and stored in the
//! `sessions` table. A request carries the session token either as a bearer
//! token or in the session cookie; the token resolves to a stable user id
//! while the session is unexpired.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use tracing::{debug, error};

use crate::entities::session;
use crate::http::HttpError;
use crate::state::AppState;

pub const MAX_TOKEN_LEN: usize = 255;

/// Authenticated caller. Rejects with 401 when no valid session is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Caller identity when one is present; anonymous otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUser(pub Option<String>);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match resolve_request_user(parts, state).await? {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => Err(HttpError::new(
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
            )),
        }
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve_request_user(parts, state).await.map(MaybeUser)
    }
}

async fn resolve_request_user(parts: &Parts, state: &AppState) -> Result<Option<String>, HttpError> {
    let Some(token) = session_token(&parts.headers, &state.session.cookie_name) else {
        return Ok(None);
    };
    resolve_session(&state.database, token).await.map_err(|err| {
        error!("Session lookup failed: {err}");
        HttpError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to resolve session".to_string(),
        )
    })
}

/// Returns the user behind `token` if the session exists and has not expired.
pub async fn resolve_session(
    database: &DatabaseConnection,
    token: &str,
) -> Result<Option<String>, DbErr> {
    let Some(session) = session::Entity::find_by_id(token.to_owned())
        .one(database)
        .await?
    else {
        debug!("Unknown session token presented");
        return Ok(None);
    };

    if session.expires_at.with_timezone(&Utc) <= Utc::now() {
        debug!(user_id = %session.user_id, "Expired session presented");
        return Ok(None);
    }

    Ok(Some(session.user_id))
}

/// Extracts the session token, preferring `Authorization: Bearer` over the
/// session cookie.
pub fn session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if let Some(token) = bearer.filter(|token| valid_token(token)) {
        return Some(token);
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim())
        .filter(|token| valid_token(token))
}

fn valid_token(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_TOKEN_LEN
}
