//! Pole Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, Pole, Service};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct PoleRequest {
    pub service_id: Uuid,
    pub name: String,
}

impl Normalize for PoleRequest {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
            ..self
        }
    }
}

impl Validate for PoleRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_name("name", &self.name));
        result.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PoleQuery {
    pub service_id: Option<Uuid>,
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<PoleQuery>,
) -> Result<Json<Vec<Pole>>, ApiError> {
    let state = state.read().await;
    let poles = state.repository.find(ctx.organization_id, |p: &Pole| {
        query.service_id.map_or(true, |id| p.service_id == id)
    })?;
    Ok(Json(poles))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Pole>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.get::<Pole>(ctx.organization_id, id)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<PoleRequest>,
) -> Result<(StatusCode, Json<Pole>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    state
        .repository
        .ensure_exists::<Service>(ctx.organization_id, "service_id", body.service_id)?;

    let pole = state.repository.insert(Pole {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        service_id: body.service_id,
        name: body.name,
    })?;
    audit(&state, &ctx, AuditAction::Create, &pole, format!("created pole {}", pole.name));

    Ok((StatusCode::CREATED, Json(pole)))
}

pub async fn update(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<PoleRequest>,
) -> Result<Json<Pole>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    state
        .repository
        .ensure_exists::<Service>(ctx.organization_id, "service_id", body.service_id)?;

    let pole = state.repository.update(ctx.organization_id, id, |p: &mut Pole| {
        p.service_id = body.service_id;
        p.name = body.name;
    })?;
    audit(&state, &ctx, AuditAction::Update, &pole, format!("updated pole {}", pole.name));

    Ok(Json(pole))
}

pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let pole = state.repository.delete_pole(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &pole, format!("deleted pole {}", pole.name));

    Ok(StatusCode::NO_CONTENT)
}
