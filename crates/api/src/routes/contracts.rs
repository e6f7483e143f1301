//! Contract Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::{NaiveDate, Utc};
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetLine, Contract, Invoice};
use uuid::Uuid;

use super::{audit, checked, nullable};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::{AppState, SharedState};

#[derive(Debug, Deserialize)]
pub struct ContractRequest {
    #[serde(default)]
    pub budget_line_id: Option<Uuid>,
    pub name: String,
    pub supplier: String,
    pub amount: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Normalize for ContractRequest {
    fn normalize(self) -> Self {
        Self {
            name: normalizer::name(&self.name),
            supplier: normalizer::name(&self.supplier),
            ..self
        }
    }
}

impl Validate for ContractRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_name("name", &self.name))
            .check(validator.validate_name("supplier", &self.supplier))
            .check(validator.validate_amount("amount", self.amount))
            .check(validator.validate_period("start_date", self.start_date, "end_date", self.end_date));
        result.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContractPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub budget_line_id: Option<Option<Uuid>>,
    pub name: Option<String>,
    pub supplier: Option<String>,
    pub amount: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ContractPatch {
    fn apply(self, contract: &Contract) -> ContractRequest {
        ContractRequest {
            budget_line_id: self.budget_line_id.unwrap_or(contract.budget_line_id),
            name: self.name.unwrap_or_else(|| contract.name.clone()),
            supplier: self.supplier.unwrap_or_else(|| contract.supplier.clone()),
            amount: self.amount.unwrap_or(contract.amount),
            start_date: self.start_date.unwrap_or(contract.start_date),
            end_date: self.end_date.unwrap_or(contract.end_date),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContractQuery {
    pub budget_line_id: Option<Uuid>,
}

fn check_references(state: &AppState, organization_id: Uuid, body: &ContractRequest) -> Result<(), ApiError> {
    if let Some(id) = body.budget_line_id {
        state
            .repository
            .ensure_exists::<BudgetLine>(organization_id, "budget_line_id", id)?;
    }
    Ok(())
}

fn store(state: &AppState, ctx: &AuthContext, id: Uuid, body: ContractRequest) -> Result<Contract, ApiError> {
    check_references(state, ctx.organization_id, &body)?;

    let contract = state.repository.update(ctx.organization_id, id, |c: &mut Contract| {
        c.budget_line_id = body.budget_line_id;
        c.name = body.name;
        c.supplier = body.supplier;
        c.amount = body.amount;
        c.start_date = body.start_date;
        c.end_date = body.end_date;
    })?;
    audit(state, ctx, AuditAction::Update, &contract, format!("updated contract {}", contract.name));
    Ok(contract)
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<ContractQuery>,
) -> Result<Json<Vec<Contract>>, ApiError> {
    let state = state.read().await;
    let contracts = state.repository.find(ctx.organization_id, |c: &Contract| {
        query.budget_line_id.map_or(true, |id| c.budget_line_id == Some(id))
    })?;
    Ok(Json(contracts))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.get::<Contract>(ctx.organization_id, id)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<ContractRequest>,
) -> Result<(StatusCode, Json<Contract>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    check_references(&state, ctx.organization_id, &body)?;

    let contract = state.repository.insert(Contract {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        budget_line_id: body.budget_line_id,
        name: body.name,
        supplier: body.supplier,
        amount: body.amount,
        start_date: body.start_date,
        end_date: body.end_date,
        created_at: Utc::now(),
    })?;
    audit(
        &state,
        &ctx,
        AuditAction::Create,
        &contract,
        format!("created contract {} ending {}", contract.name, contract.end_date),
    );

    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn replace(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<ContractRequest>,
) -> Result<Json<Contract>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

pub async fn patch(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<ContractPatch>,
) -> Result<Json<Contract>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let current = state.repository.get::<Contract>(ctx.organization_id, id)?;
    let body = checked(&state.validator, body.apply(&current))?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

/// Delete a contract that no invoice references
pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let invoiced = state.repository.find(ctx.organization_id, |i: &Invoice| {
        i.contract_id == Some(id)
    })?;
    if !invoiced.is_empty() {
        return Err(ApiError::validation("contract_id", "contract has invoices"));
    }

    let contract = state.repository.delete::<Contract>(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &contract, format!("deleted contract {}", contract.name));

    Ok(StatusCode::NO_CONTENT)
}
