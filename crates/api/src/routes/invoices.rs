//! Invoice Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::{Datelike, NaiveDate, Utc};
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetLine, Contract, Invoice, InvoiceStatus};
use tracing::info;
use uuid::Uuid;

use super::{audit, checked, nullable};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::{AppState, SharedState};

fn default_status() -> InvoiceStatus {
    InvoiceStatus::Pending
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub budget_line_id: Uuid,
    #[serde(default)]
    pub contract_id: Option<Uuid>,
    pub number: String,
    pub supplier: String,
    pub amount: f64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default = "default_status")]
    pub status: InvoiceStatus,
}

impl Normalize for InvoiceRequest {
    fn normalize(self) -> Self {
        Self {
            number: normalizer::name(&self.number),
            supplier: normalizer::name(&self.supplier),
            ..self
        }
    }
}

impl Validate for InvoiceRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_name("number", &self.number))
            .check(validator.validate_name("supplier", &self.supplier))
            .check(validator.validate_amount("amount", self.amount))
            .check(validator.validate_period("issue_date", self.issue_date, "due_date", self.due_date));
        result.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoicePatch {
    pub budget_line_id: Option<Uuid>,
    #[serde(default, deserialize_with = "nullable")]
    pub contract_id: Option<Option<Uuid>>,
    pub number: Option<String>,
    pub supplier: Option<String>,
    pub amount: Option<f64>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<InvoiceStatus>,
}

impl InvoicePatch {
    fn apply(self, invoice: &Invoice) -> InvoiceRequest {
        InvoiceRequest {
            budget_line_id: self.budget_line_id.unwrap_or(invoice.budget_line_id),
            contract_id: self.contract_id.unwrap_or(invoice.contract_id),
            number: self.number.unwrap_or_else(|| invoice.number.clone()),
            supplier: self.supplier.unwrap_or_else(|| invoice.supplier.clone()),
            amount: self.amount.unwrap_or(invoice.amount),
            issue_date: self.issue_date.unwrap_or(invoice.issue_date),
            due_date: self.due_date.unwrap_or(invoice.due_date),
            status: self.status.unwrap_or(invoice.status),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub year: Option<i32>,
    pub status: Option<InvoiceStatus>,
    pub budget_line_id: Option<Uuid>,
}

impl InvoiceQuery {
    fn matches(&self, invoice: &Invoice) -> bool {
        self.year.map_or(true, |year| invoice.issue_date.year() == year)
            && self.status.map_or(true, |status| invoice.status == status)
            && self.budget_line_id.map_or(true, |id| invoice.budget_line_id == id)
    }
}

fn check_references(state: &AppState, organization_id: Uuid, body: &InvoiceRequest) -> Result<(), ApiError> {
    state
        .repository
        .ensure_exists::<BudgetLine>(organization_id, "budget_line_id", body.budget_line_id)?;
    if let Some(id) = body.contract_id {
        state.repository.ensure_exists::<Contract>(organization_id, "contract_id", id)?;
    }
    Ok(())
}

fn store(state: &AppState, ctx: &AuthContext, id: Uuid, body: InvoiceRequest) -> Result<Invoice, ApiError> {
    check_references(state, ctx.organization_id, &body)?;

    let invoice = state.repository.update(ctx.organization_id, id, |i: &mut Invoice| {
        i.budget_line_id = body.budget_line_id;
        i.contract_id = body.contract_id;
        i.number = body.number;
        i.supplier = body.supplier;
        i.amount = body.amount;
        i.issue_date = body.issue_date;
        i.due_date = body.due_date;
        i.status = body.status;
    })?;
    audit(
        state,
        ctx,
        AuditAction::Update,
        &invoice,
        format!("updated invoice {} ({:?})", invoice.number, invoice.status),
    );
    Ok(invoice)
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    let state = state.read().await;
    let invoices = state
        .repository
        .find(ctx.organization_id, |i: &Invoice| query.matches(i))?;
    Ok(Json(invoices))
}

pub async fn get(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.repository.get::<Invoice>(ctx.organization_id, id)?))
}

pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<InvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    check_references(&state, ctx.organization_id, &body)?;

    let invoice = state.repository.insert(Invoice {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        budget_line_id: body.budget_line_id,
        contract_id: body.contract_id,
        number: body.number,
        supplier: body.supplier,
        amount: body.amount,
        issue_date: body.issue_date,
        due_date: body.due_date,
        status: body.status,
        created_at: Utc::now(),
    })?;
    audit(
        &state,
        &ctx,
        AuditAction::Create,
        &invoice,
        format!("created invoice {} for {:.2}", invoice.number, invoice.amount),
    );

    info!("Invoice {} recorded on budget line {}", invoice.id, invoice.budget_line_id);
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn replace(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<InvoiceRequest>,
) -> Result<Json<Invoice>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

pub async fn patch(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Payload(body): Payload<InvoicePatch>,
) -> Result<Json<Invoice>, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let current = state.repository.get::<Invoice>(ctx.organization_id, id)?;
    let body = checked(&state.validator, body.apply(&current))?;
    Ok(Json(store(&state, &ctx, id, body)?))
}

pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;

    let invoice = state.repository.delete::<Invoice>(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &invoice, format!("deleted invoice {}", invoice.number));

    Ok(StatusCode::NO_CONTENT)
}
