//! Member Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{AuditAction, Membership, StorageError, User};
use tracing::info;
use uuid::Uuid;

use super::audit_entity;
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::{AppState, SharedState};

/// A user as seen from one organization
#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl From<(User, Membership)> for MemberResponse {
    fn from((user, membership): (User, Membership)) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: membership.role,
            joined_at: membership.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

fn member(state: &AppState, organization_id: Uuid, user_id: Uuid) -> Result<MemberResponse, ApiError> {
    state
        .repository
        .members(organization_id)?
        .into_iter()
        .find(|(user, _)| user.id == user_id)
        .map(MemberResponse::from)
        .ok_or_else(|| {
            StorageError::NotFound {
                kind: "user",
                id: user_id,
            }
            .into()
        })
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    let state = state.read().await;
    let members = state
        .repository
        .members(ctx.organization_id)?
        .into_iter()
        .map(MemberResponse::from)
        .collect();
    Ok(Json(members))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<MemberResponse>, ApiError> {
    let state = state.read().await;
    Ok(Json(member(&state, ctx.organization_id, id)?))
}

/// Change a member's role
pub async fn update_role(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<RoleUpdate>,
) -> Result<Json<MemberResponse>, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;

    let membership = state
        .repository
        .set_member_role(ctx.organization_id, id, body.role)?;
    audit_entity(
        &state,
        ctx.organization_id,
        ctx.user.id,
        AuditAction::Update,
        "membership",
        membership.id,
        format!("set role of {} to {}", id, body.role),
    );

    Ok(Json(member(&state, ctx.organization_id, id)?))
}

/// Remove a member and end their sessions in this organization
pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;

    let membership = state.repository.remove_member(ctx.organization_id, id)?;
    let revoked = state.sessions.revoke_member(id, ctx.organization_id)?;
    audit_entity(
        &state,
        ctx.organization_id,
        ctx.user.id,
        AuditAction::Delete,
        "membership",
        membership.id,
        format!("removed member {}", id),
    );

    info!("Removed member {} ({} sessions revoked)", id, revoked);
    Ok(StatusCode::NO_CONTENT)
}
