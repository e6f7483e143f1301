//! Organization Routes

use axum::{extract::State, http::StatusCode, Json};
use auth::Role;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::{Deserialize, Serialize};
use storage::{AuditAction, Organization};
use tracing::info;

use super::{audit_entity, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct OrganizationRequest {
    pub name: String,
}

impl Normalize for OrganizationRequest {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
        }
    }
}

impl Validate for OrganizationRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_name("name", &self.name));
        result.into_result()
    }
}

/// An organization together with the caller's role in it
#[derive(Debug, Serialize)]
pub struct OrganizationMembership {
    #[serde(flatten)]
    pub organization: Organization,
    pub role: Role,
}

/// Organizations the caller belongs to
pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<OrganizationMembership>>, ApiError> {
    let state = state.read().await;
    let organizations = state
        .repository
        .organizations_of(ctx.user.id)?
        .into_iter()
        .map(|(organization, role)| OrganizationMembership { organization, role })
        .collect();
    Ok(Json(organizations))
}

/// Create an organization; the caller becomes its admin
pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<OrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let (organization, _) = state.repository.create_organization(&body.name, ctx.user.id)?;
    audit_entity(
        &state,
        organization.id,
        ctx.user.id,
        AuditAction::Create,
        "organization",
        organization.id,
        format!("created organization {}", organization.name),
    );

    info!("User {} created organization {}", ctx.user.id, organization.id);
    Ok((StatusCode::CREATED, Json(organization)))
}

/// The organization bound to the caller's session
pub async fn current(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Organization>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.get_organization(ctx.organization_id)?))
}

/// Rename the current organization
pub async fn update(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<OrganizationRequest>,
) -> Result<Json<Organization>, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let organization = state
        .repository
        .rename_organization(ctx.organization_id, &body.name)?;
    audit_entity(
        &state,
        organization.id,
        ctx.user.id,
        AuditAction::Update,
        "organization",
        organization.id,
        format!("renamed organization to {}", organization.name),
    );

    Ok(Json(organization))
}
