//! Service Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, Service, StorageError};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub code: String,
}

impl Normalize for ServiceRequest {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
            code: normalizer::code(&self.code),
        }
    }
}

impl Validate for ServiceRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_name("name", &self.name))
            .check(validator.validate_name("code", &self.code));
        result.into_result()
    }
}

/// Service codes are unique within an organization
fn unique_code(new: &Service, existing: &Service) -> Result<(), StorageError> {
    if new.code == existing.code {
        Err(StorageError::conflict("code", format!("code {} is already used", new.code)))
    } else {
        Ok(())
    }
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<Service>>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.list::<Service>(ctx.organization_id)?))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.get::<Service>(ctx.organization_id, id)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<ServiceRequest>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let service = state.repository.insert_checked(
        Service {
            id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            name: body.name,
            code: body.code,
        },
        unique_code,
    )?;
    audit(&state, &ctx, AuditAction::Create, &service, format!("created service {}", service.name));

    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<ServiceRequest>,
) -> Result<Json<Service>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let service = state.repository.update_checked(
        ctx.organization_id,
        id,
        |s: &mut Service| {
            s.name = body.name;
            s.code = body.code;
        },
        unique_code,
    )?;
    audit(&state, &ctx, AuditAction::Update, &service, format!("updated service {}", service.name));

    Ok(Json(service))
}

pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let service = state.repository.delete_service(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &service, format!("deleted service {}", service.name));

    Ok(StatusCode::NO_CONTENT)
}
