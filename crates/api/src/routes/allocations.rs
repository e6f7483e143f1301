//! Pole allocations of a budget line
//!
//! The allocations of one line never add up to more than its budget amount.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use data_validator::{Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetLine, PoleAllocation};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    pub pole_id: Uuid,
    pub amount: f64,
}

impl Normalize for AllocationRequest {
    fn normalize(self) -> Self {
        self
    }
}

impl Validate for AllocationRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_amount("amount", self.amount));
        result.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct AllocationUpdate {
    pub amount: f64,
}

impl Normalize for AllocationUpdate {
    fn normalize(self) -> Self {
        self
    }
}

impl Validate for AllocationUpdate {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_amount("amount", self.amount));
        result.into_result()
    }
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(line_id): Path<Uuid>,
) -> Result<Json<Vec<PoleAllocation>>, ApiError> {
    let state = state.read().await;
    state.repository.get::<BudgetLine>(ctx.organization_id, line_id)?;

    let allocations = state.repository.find(ctx.organization_id, |a: &PoleAllocation| {
        a.budget_line_id == line_id
    })?;
    Ok(Json(allocations))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(line_id): Path<Uuid>,
    Payload(body): Payload<AllocationRequest>,
) -> Result<(StatusCode, Json<PoleAllocation>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let line = state.repository.get::<BudgetLine>(ctx.organization_id, line_id)?;
    let body = checked(&state.validator, body)?;

    let allocation = state.repository.insert_allocation(PoleAllocation {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        budget_line_id: line.id,
        pole_id: body.pole_id,
        amount: body.amount,
    })?;
    audit(
        &state,
        &ctx,
        AuditAction::Create,
        &allocation,
        format!("allocated {:.2} of {}", allocation.amount, line.name),
    );

    Ok((StatusCode::CREATED, Json(allocation)))
}

pub async fn update(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<AllocationUpdate>,
) -> Result<Json<PoleAllocation>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let current = state.repository.get::<PoleAllocation>(ctx.organization_id, id)?;
    let line = state
        .repository
        .get::<BudgetLine>(ctx.organization_id, current.budget_line_id)?;
    let body = checked(&state.validator, body)?;

    let allocation = state
        .repository
        .set_allocation_amount(ctx.organization_id, id, body.amount)?;
    audit(
        &state,
        &ctx,
        AuditAction::Update,
        &allocation,
        format!("reallocated {:.2} of {}", allocation.amount, line.name),
    );

    Ok(Json(allocation))
}

pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let allocation = state.repository.delete::<PoleAllocation>(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &allocation, "removed allocation");

    Ok(StatusCode::NO_CONTENT)
}
