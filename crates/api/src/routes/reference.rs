//! Budget domain and budget type routes
//!
//! Listings go through the reference cache and carry a `Cache-Control`
//! header; every write drops the organization's cached lists.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use auth::Role;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetDomain, BudgetType, StorageError};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub name: String,
}

impl Normalize for ReferenceRequest {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
        }
    }
}

impl Validate for ReferenceRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_name("name", &self.name));
        result.into_result()
    }
}

/// Names are unique per organization, ignoring case
fn unique_name(new: &str, existing: &str) -> Result<(), StorageError> {
    if new.eq_ignore_ascii_case(existing) {
        Err(StorageError::conflict("name", format!("{} already exists", new)))
    } else {
        Ok(())
    }
}

pub async fn list_domains(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let state = state.read().await;
    let domains = state.cache.domains(&state.repository, ctx.organization_id)?;
    Ok(([(header::CACHE_CONTROL, state.cache.cache_control())], Json(domains)))
}

pub async fn create_domain(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<ReferenceRequest>,
) -> Result<(StatusCode, Json<BudgetDomain>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let domain = state.repository.insert_checked(
        BudgetDomain {
            id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            name: body.name,
        },
        |new, existing| unique_name(&new.name, &existing.name),
    )?;
    state.cache.invalidate_organization(ctx.organization_id);
    audit(&state, &ctx, AuditAction::Create, &domain, format!("created domain {}", domain.name));

    Ok((StatusCode::CREATED, Json(domain)))
}

pub async fn delete_domain(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let domain = state.repository.delete_domain(ctx.organization_id, id)?;
    state.cache.invalidate_organization(ctx.organization_id);
    audit(&state, &ctx, AuditAction::Delete, &domain, format!("deleted domain {}", domain.name));

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_types(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ApiError> {
    let state = state.read().await;
    let types = state.cache.types(&state.repository, ctx.organization_id)?;
    Ok(([(header::CACHE_CONTROL, state.cache.cache_control())], Json(types)))
}

pub async fn create_type(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<ReferenceRequest>,
) -> Result<(StatusCode, Json<BudgetType>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let budget_type = state.repository.insert_checked(
        BudgetType {
            id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            name: body.name,
        },
        |new, existing| unique_name(&new.name, &existing.name),
    )?;
    state.cache.invalidate_organization(ctx.organization_id);
    audit(&state, &ctx, AuditAction::Create, &budget_type, format!("created type {}", budget_type.name));

    Ok((StatusCode::CREATED, Json(budget_type)))
}

pub async fn delete_type(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let budget_type = state.repository.delete_type(ctx.organization_id, id)?;
    state.cache.invalidate_organization(ctx.organization_id);
    audit(&state, &ctx, AuditAction::Delete, &budget_type, format!("deleted type {}", budget_type.name));

    Ok(StatusCode::NO_CONTENT)
}
