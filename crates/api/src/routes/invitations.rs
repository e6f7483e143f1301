//! Invitation Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::Utc;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::{Deserialize, Serialize};
use storage::{AuditAction, Invitation};
use tracing::info;
use uuid::Uuid;

use super::sessions::SessionResponse;
use super::{audit, audit_entity, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

fn default_role() -> Role {
    Role::Viewer
}

#[derive(Debug, Deserialize)]
pub struct InvitationRequest {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

impl Normalize for InvitationRequest {
    fn normalize(self) -> Self {
        Self {
            email: normalizer::email(&self.email),
            ..self
        }
    }
}

impl Validate for InvitationRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_email("email", &self.email));
        result.into_result()
    }
}

/// Returned once, at creation; listings never expose the token
#[derive(Debug, Serialize)]
pub struct CreatedInvitation {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitation {
    pub name: String,
}

impl Normalize for AcceptInvitation {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
        }
    }
}

impl Validate for AcceptInvitation {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_name("name", &self.name));
        result.into_result()
    }
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;
    Ok(Json(state.repository.list::<Invitation>(ctx.organization_id)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<InvitationRequest>,
) -> Result<(StatusCode, Json<CreatedInvitation>), ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let invitation = state.repository.create_invitation(Invitation {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        email: body.email,
        role: body.role,
        token: Uuid::new_v4().simple().to_string(),
        invited_by: ctx.user.id,
        created_at: Utc::now(),
        accepted_at: None,
    })?;
    audit(
        &state,
        &ctx,
        AuditAction::Create,
        &invitation,
        format!("invited {} as {}", invitation.email, invitation.role),
    );

    info!("Invitation {} created for {}", invitation.id, invitation.email);
    let token = invitation.token.clone();
    Ok((StatusCode::CREATED, Json(CreatedInvitation { invitation, token })))
}

pub async fn revoke(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;

    let invitation = state.repository.delete::<Invitation>(ctx.organization_id, id)?;
    audit(
        &state,
        &ctx,
        AuditAction::Delete,
        &invitation,
        format!("revoked invitation for {}", invitation.email),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Accept an invitation by token and open a session for the new member
pub async fn accept(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Payload(body): Payload<AcceptInvitation>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let (user, membership) = state.repository.accept_invitation(&token, &body.name)?;
    let session = state.sessions.issue(user.id, membership.organization_id)?;
    audit_entity(
        &state,
        membership.organization_id,
        user.id,
        AuditAction::Create,
        "membership",
        membership.id,
        format!("{} joined as {}", user.email, membership.role),
    );

    info!("User {} joined organization {}", user.id, membership.organization_id);
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(session, user, membership.role)),
    ))
}
