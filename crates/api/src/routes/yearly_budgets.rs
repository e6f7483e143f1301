//! Per-year amounts of a budget line

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use data_validator::{Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetLine, StorageError, YearlyBudget};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct YearlyBudgetRequest {
    pub budget_line_id: Uuid,
    pub year: i32,
    pub amount: f64,
}

impl Normalize for YearlyBudgetRequest {
    fn normalize(self) -> Self {
        self
    }
}

impl Validate for YearlyBudgetRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_year("year", self.year))
            .check(validator.validate_amount("amount", self.amount));
        result.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct YearlyBudgetUpdate {
    pub year: i32,
    pub amount: f64,
}

impl Normalize for YearlyBudgetUpdate {
    fn normalize(self) -> Self {
        self
    }
}

impl Validate for YearlyBudgetUpdate {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_year("year", self.year))
            .check(validator.validate_amount("amount", self.amount));
        result.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct YearlyBudgetQuery {
    pub budget_line_id: Option<Uuid>,
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<YearlyBudgetQuery>,
) -> Result<Json<Vec<YearlyBudget>>, ApiError> {
    let state = state.read().await;
    let mut budgets = state.repository.find(ctx.organization_id, |y: &YearlyBudget| {
        query.budget_line_id.map_or(true, |id| y.budget_line_id == id)
    })?;
    budgets.sort_by_key(|y| y.year);
    Ok(Json(budgets))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<YearlyBudgetRequest>,
) -> Result<(StatusCode, Json<YearlyBudget>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    state
        .repository
        .ensure_exists::<BudgetLine>(ctx.organization_id, "budget_line_id", body.budget_line_id)?;

    let budget = state.repository.insert_yearly_budget(YearlyBudget {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        budget_line_id: body.budget_line_id,
        year: body.year,
        amount: body.amount,
    })?;
    audit(
        &state,
        &ctx,
        AuditAction::Create,
        &budget,
        format!("set {} budget to {:.2}", budget.year, budget.amount),
    );

    Ok((StatusCode::CREATED, Json(budget)))
}

pub async fn update(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<YearlyBudgetUpdate>,
) -> Result<Json<YearlyBudget>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let budget = state.repository.update_checked(
        ctx.organization_id,
        id,
        |y: &mut YearlyBudget| {
            y.year = body.year;
            y.amount = body.amount;
        },
        |updated: &YearlyBudget, other: &YearlyBudget| {
            if other.budget_line_id == updated.budget_line_id && other.year == updated.year {
                Err(StorageError::conflict(
                    "year",
                    format!("a yearly budget already exists for {}", updated.year),
                ))
            } else {
                Ok(())
            }
        },
    )?;
    audit(
        &state,
        &ctx,
        AuditAction::Update,
        &budget,
        format!("set {} budget to {:.2}", budget.year, budget.amount),
    );

    Ok(Json(budget))
}

pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let budget = state.repository.delete::<YearlyBudget>(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &budget, format!("removed {} budget", budget.year));

    Ok(StatusCode::NO_CONTENT)
}
