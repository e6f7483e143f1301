//! Session Routes

use axum::{extract::State, http::StatusCode, Json};
use auth::{Role, Session};
use chrono::{DateTime, Utc};
use data_validator::normalizer;
use serde::{Deserialize, Serialize};
use storage::User;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::{AuthContext, Payload, VerifiedIssuer};
use crate::SharedState;

/// Session request for a member already verified by the identity provider
#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub email: String,
    pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub organization_id: Uuid,
    pub role: Role,
    pub user: User,
}

impl SessionResponse {
    pub fn new(session: Session, user: User, role: Role) -> Self {
        Self {
            token: session.token,
            expires_at: session.expires_at,
            organization_id: session.organization_id,
            role,
            user,
        }
    }
}

fn unknown_member() -> ApiError {
    ApiError::Unauthorized("unknown member".to_string())
}

/// Open a session on behalf of the identity provider
pub async fn create(
    State(state): State<SharedState>,
    _issuer: VerifiedIssuer,
    Payload(body): Payload<CreateSession>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let state = state.read().await;
    let email = normalizer::email(&body.email);

    let user = state
        .repository
        .find_user_by_email(&email)?
        .ok_or_else(unknown_member)?;
    let membership = state
        .repository
        .membership(body.organization_id, user.id)?
        .ok_or_else(unknown_member)?;

    let session = state.sessions.issue(user.id, body.organization_id)?;
    info!("Session opened for {} in {}", user.id, body.organization_id);

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(session, user, membership.role)),
    ))
}

/// Revoke the current session
pub async fn destroy(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<StatusCode, ApiError> {
    state.read().await.sessions.revoke(&ctx.token)?;
    Ok(StatusCode::NO_CONTENT)
}
