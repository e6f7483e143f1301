//! Budget Line Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::Utc;
use data_validator::{
    normalizer, NormalizationMethod, Normalize, Normalizer, Validate, ValidationErrors, ValidationResult, Validator,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use storage::{AuditAction, BudgetDomain, BudgetLine, BudgetType, ExpenseKind, Service};
use uuid::Uuid;

use super::{audit, checked, nullable};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::{AppState, SharedState};

/// Full budget line body, used for create and replace
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetLineRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub year: i32,
    pub kind: ExpenseKind,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub domain_id: Option<Uuid>,
    #[serde(default)]
    pub type_id: Option<Uuid>,
    pub budget_amount: f64,
}

impl Normalize for BudgetLineRequest {
    fn normalize(self) -> Self {
        let description = Normalizer::new(NormalizationMethod::Text).normalize_optional(self.description.as_deref());
        Self {
            name: normalizer::name(&self.name),
            description,
            ..self
        }
    }
}

impl Validate for BudgetLineRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_name("name", &self.name))
            .check(validator.validate_year("year", self.year))
            .check(validator.validate_amount("budget_amount", self.budget_amount));
        if let Some(description) = &self.description {
            result.check(validator.validate_comment("description", description));
        }
        result.into_result()
    }
}

/// Partial update; absent fields keep their current value, `null`
/// clears an optional one
#[derive(Debug, Default, Deserialize)]
pub struct BudgetLinePatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub year: Option<i32>,
    pub kind: Option<ExpenseKind>,
    #[serde(default, deserialize_with = "nullable")]
    pub service_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub domain_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub type_id: Option<Option<Uuid>>,
    pub budget_amount: Option<f64>,
}

impl BudgetLinePatch {
    fn apply(self, line: &BudgetLine) -> BudgetLineRequest {
        BudgetLineRequest {
            name: self.name.unwrap_or_else(|| line.name.clone()),
            description: self.description.unwrap_or_else(|| line.description.clone()),
            year: self.year.unwrap_or(line.year),
            kind: self.kind.unwrap_or(line.kind),
            service_id: self.service_id.unwrap_or(line.service_id),
            domain_id: self.domain_id.unwrap_or(line.domain_id),
            type_id: self.type_id.unwrap_or(line.type_id),
            budget_amount: self.budget_amount.unwrap_or(line.budget_amount),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetLineQuery {
    pub year: Option<i32>,
    pub service_id: Option<Uuid>,
    pub kind: Option<ExpenseKind>,
}

impl BudgetLineQuery {
    fn matches(&self, line: &BudgetLine) -> bool {
        self.year.map_or(true, |year| line.year == year)
            && self.service_id.map_or(true, |id| line.service_id == Some(id))
            && self.kind.map_or(true, |kind| line.kind == kind)
    }
}

/// A budget line with its invoiced and remaining amounts
#[derive(Debug, Serialize)]
pub struct BudgetLineResponse {
    #[serde(flatten)]
    pub line: BudgetLine,
    pub invoiced_amount: f64,
    pub remaining_amount: f64,
}

impl BudgetLineResponse {
    fn new(line: BudgetLine, invoiced_amount: f64) -> Self {
        let remaining_amount = line.budget_amount - invoiced_amount;
        Self {
            line,
            invoiced_amount,
            remaining_amount,
        }
    }
}

fn check_references(state: &AppState, organization_id: Uuid, body: &BudgetLineRequest) -> Result<(), ApiError> {
    if let Some(id) = body.service_id {
        state.repository.ensure_exists::<Service>(organization_id, "service_id", id)?;
    }
    if let Some(id) = body.domain_id {
        state.repository.ensure_exists::<BudgetDomain>(organization_id, "domain_id", id)?;
    }
    if let Some(id) = body.type_id {
        state.repository.ensure_exists::<BudgetType>(organization_id, "type_id", id)?;
    }
    Ok(())
}

fn respond(state: &AppState, line: BudgetLine) -> Result<BudgetLineResponse, ApiError> {
    let totals = state.repository.budget_line_total(line.organization_id, line.id)?;
    Ok(BudgetLineResponse::new(line, totals.invoiced_amount))
}

/// Write a validated body onto an existing line
fn store(state: &AppState, ctx: &AuthContext, id: Uuid, body: BudgetLineRequest) -> Result<BudgetLineResponse, ApiError> {
    check_references(state, ctx.organization_id, &body)?;

    let line = state.repository.update_budget_line(ctx.organization_id, id, |l| {
        l.name = body.name;
        l.description = body.description;
        l.year = body.year;
        l.kind = body.kind;
        l.service_id = body.service_id;
        l.domain_id = body.domain_id;
        l.type_id = body.type_id;
        l.budget_amount = body.budget_amount;
        l.updated_at = Utc::now();
    })?;
    audit(state, ctx, AuditAction::Update, &line, format!("updated budget line {}", line.name));

    respond(state, line)
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<BudgetLineQuery>,
) -> Result<Json<Vec<BudgetLineResponse>>, ApiError> {
    let state = state.read().await;

    let invoiced: HashMap<Uuid, f64> = state
        .repository
        .budget_line_totals(ctx.organization_id)?
        .into_iter()
        .map(|t| (t.budget_line_id, t.invoiced_amount))
        .collect();

    let lines = state
        .repository
        .find(ctx.organization_id, |l: &BudgetLine| query.matches(l))?
        .into_iter()
        .map(|line| {
            let amount = invoiced.get(&line.id).copied().unwrap_or(0.0);
            BudgetLineResponse::new(line, amount)
        })
        .collect();

    Ok(Json(lines))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<BudgetLineResponse>, ApiError> {
    let state = state.read().await;
    let line = state.repository.get::<BudgetLine>(ctx.organization_id, id)?;
    Ok(Json(respond(&state, line)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<BudgetLineRequest>,
) -> Result<(StatusCode, Json<BudgetLineResponse>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    check_references(&state, ctx.organization_id, &body)?;

    let now = Utc::now();
    let line = state.repository.insert(BudgetLine {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        name: body.name,
        description: body.description,
        year: body.year,
        kind: body.kind,
        service_id: body.service_id,
        domain_id: body.domain_id,
        type_id: body.type_id,
        budget_amount: body.budget_amount,
        created_at: now,
        updated_at: now,
    })?;
    audit(&state, &ctx, AuditAction::Create, &line, format!("created budget line {}", line.name));

    Ok((StatusCode::CREATED, Json(BudgetLineResponse::new(line, 0.0))))
}

pub async fn replace(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<BudgetLineRequest>,
) -> Result<Json<BudgetLineResponse>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

pub async fn patch(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<BudgetLinePatch>,
) -> Result<Json<BudgetLineResponse>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let current = state.repository.get::<BudgetLine>(ctx.organization_id, id)?;
    let body = checked(&state.validator, body.apply(&current))?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

/// Delete a budget line that no invoice or contract references
pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let line = state.repository.delete_budget_line(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &line, format!("deleted budget line {}", line.name));

    Ok(StatusCode::NO_CONTENT)
}
